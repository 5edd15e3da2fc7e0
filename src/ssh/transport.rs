//! Capability interface over the remote-session transport.
//!
//! A [`SessionClient`] reports session progress as [`SessionEvent`]s and each
//! command channel's progress as [`ChannelEvent`]s. Both arrive over tokio mpsc
//! channels, so an implementation may emit from background tasks and may emit
//! more than once (e.g. an error followed by end and close).

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::keys::PrivateKeyMaterial;
use super::SessionOptions;

/// Receiver of session-level notifications for one connection.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Receiver of one command channel's output and exit status.
pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// Severity tag attached to a connection failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultLevel {
    ClientAuthentication,
    ClientTimeout,
    Other,
}

impl fmt::Display for FaultLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            FaultLevel::ClientAuthentication => "client-authentication",
            FaultLevel::ClientTimeout => "client-timeout",
            FaultLevel::Other => "other",
        };
        f.write_str(tag)
    }
}

/// A session-level failure reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionFault {
    pub level: FaultLevel,
    pub message: String,
}

impl SessionFault {
    pub fn new(level: FaultLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connected and authenticated.
    Ready,
    Error(SessionFault),
    End,
    Close,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Standard output bytes.
    Data(Vec<u8>),
    /// Standard error bytes.
    ExtendedData(Vec<u8>),
    /// The channel closed. `-1` when the remote sent no exit status.
    Close { exit_code: i32 },
}

/// Everything needed to open and authenticate one session.
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key: PrivateKeyMaterial,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Remote-session capability consumed by the runner.
#[async_trait]
pub trait SessionClient: Send {
    /// Begin connecting. Progress is reported on the returned receiver.
    fn connect(&mut self, params: ConnectParams) -> SessionEvents;

    /// Open a channel and start `command` on it.
    async fn exec(&mut self, command: &str) -> Result<ChannelEvents, anyhow::Error>;

    /// Close the session. Must tolerate repeated calls.
    async fn end(&mut self);
}

/// Builds a fresh client for each run.
pub type ClientFactory = dyn Fn(&SessionOptions) -> Box<dyn SessionClient> + Send + Sync;
