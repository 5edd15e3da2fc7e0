pub mod error;
pub mod keys;
pub mod runner;
pub mod sequencer;
pub mod session;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use error::ExecError;

/// A batch of commands to run on one host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecRequest {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Falls back to the invoking OS user when unset.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

fn default_port() -> u16 {
    22
}

impl Default for ExecRequest {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: None,
            commands: Vec::new(),
        }
    }
}

impl ExecRequest {
    pub fn new(host: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            host: host.into(),
            commands,
            ..Default::default()
        }
    }

    /// Check the request shape. Performs no I/O.
    pub fn validate(&self) -> Result<(), ExecError> {
        if self.host.trim().is_empty() || self.commands.is_empty() {
            return Err(ExecError::InvalidRequest);
        }
        Ok(())
    }

    /// The username to authenticate as.
    pub fn resolved_username(&self) -> String {
        match &self.username {
            Some(name) if !name.is_empty() => name.clone(),
            _ => whoami::username(),
        }
    }
}

/// Output of one command: stdout and stderr in arrival order, plus exit code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub result: String,
    pub code: i32,
}

/// Transport-level timeouts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Deadline for TCP connect, handshake and authentication.
    pub connect_timeout_secs: u64,
    pub inactivity_timeout_secs: Option<u64>,
    pub keepalive_interval_secs: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            inactivity_timeout_secs: None,
            keepalive_interval_secs: None,
        }
    }
}

impl SessionOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
