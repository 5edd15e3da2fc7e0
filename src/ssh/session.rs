use super::keys::PrivateKeyMaterial;
use super::transport::{
    ChannelEvent, ChannelEvents, ConnectParams, FaultLevel, SessionClient, SessionEvent,
    SessionEvents, SessionFault,
};
use super::SessionOptions;
use async_trait::async_trait;
use russh::keys::{decode_secret_key, PrivateKeyWithHashAlg};
use russh::{client, ChannelMsg, Disconnect};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// [`SessionClient`] backed by russh.
pub struct RusshClient {
    options: SessionOptions,
    handle: Arc<Mutex<Option<client::Handle<SshHandler>>>>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    ended: bool,
}

/// Minimal SSH client handler. Reports session failures as they happen and
/// `Close` when russh drops it at the end of the session.
pub(crate) struct SshHandler {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // TODO: check ~/.ssh/known_hosts before accepting the server key
        log::warn!("Accepting server key without verification");
        Ok(true)
    }

    async fn disconnected(
        &mut self,
        reason: client::DisconnectReason<Self::Error>,
    ) -> Result<(), Self::Error> {
        match reason {
            client::DisconnectReason::Error(e) => {
                let fault = classify(&e);
                log::warn!("SSH session aborted ({}): {}", fault.level, fault.message);
                let _ = self.events.send(SessionEvent::Error(fault));
            }
            _ => {
                log::debug!("SSH server closed the session");
                let _ = self.events.send(SessionEvent::End);
            }
        }
        Ok(())
    }
}

impl Drop for SshHandler {
    fn drop(&mut self) {
        let _ = self.events.send(SessionEvent::Close);
    }
}

impl RusshClient {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            handle: Arc::new(Mutex::new(None)),
            events: None,
            ended: false,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.handle.lock().await.is_some()
    }
}

#[async_trait]
impl SessionClient for RusshClient {
    fn connect(&mut self, params: ConnectParams) -> SessionEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        let options = self.options.clone();
        let slot = self.handle.clone();
        let events = tx.clone();

        tokio::spawn(async move {
            let endpoint = format!("{}:{}", params.host, params.port);
            let deadline = options.connect_timeout();
            let outcome = match tokio::time::timeout(
                deadline,
                open_session(&options, params, events.clone()),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(SessionFault::new(
                    FaultLevel::ClientTimeout,
                    format!("Timed out while waiting for handshake after {}s", deadline.as_secs()),
                )),
            };

            match outcome {
                Ok(session) => {
                    *slot.lock().await = Some(session);
                    log::info!("SSH connected to {}", endpoint);
                    let _ = events.send(SessionEvent::Ready);
                }
                Err(fault) => {
                    log::error!("SSH connect to {} failed: {}", endpoint, fault.message);
                    let _ = events.send(SessionEvent::Error(fault));
                }
            }
        });

        self.events = Some(tx);
        rx
    }

    async fn exec(&mut self, command: &str) -> Result<ChannelEvents, anyhow::Error> {
        let mut channel = {
            let guard = self.handle.lock().await;
            let handle = guard
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Not connected"))?;
            handle.channel_open_session().await?
        };
        channel.exec(true, command).await?;

        // Hold output that races ahead of the server's reply to the request.
        let mut early = Vec::new();
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Success) => break,
                Some(ChannelMsg::Failure) => {
                    return Err(anyhow::anyhow!("Unable to exec on channel"));
                }
                Some(msg) => early.push(msg),
                None => {
                    return Err(anyhow::anyhow!("Channel closed before exec was acknowledged"));
                }
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_channel(channel, early, tx));
        Ok(rx)
    }

    async fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                log::debug!("SSH disconnect error: {}", e);
            }
        }
        if let Some(events) = self.events.take() {
            let _ = events.send(SessionEvent::End);
        }
    }
}

/// Connect and authenticate with the private key. One attempt only.
async fn open_session(
    options: &SessionOptions,
    params: ConnectParams,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Result<client::Handle<SshHandler>, SessionFault> {
    let ConnectParams {
        host,
        port,
        username,
        private_key,
    } = params;
    let key = parse_key(private_key)?;

    let ssh_config = client::Config {
        inactivity_timeout: options.inactivity_timeout_secs.map(Duration::from_secs),
        keepalive_interval: options.keepalive_interval_secs.map(Duration::from_secs),
        ..Default::default()
    };
    let handler = SshHandler { events };

    let mut session = client::connect(Arc::new(ssh_config), (host.as_str(), port), handler)
        .await
        .map_err(|e| classify(&e))?;

    let hash_alg = session
        .best_supported_rsa_hash()
        .await
        .map_err(|e| classify(&e.into()))?
        .flatten();
    let result = session
        .authenticate_publickey(&username, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
        .await
        .map_err(|e| classify(&e.into()))?;

    match result {
        client::AuthResult::Success => Ok(session),
        client::AuthResult::Failure { .. } => Err(SessionFault::new(
            FaultLevel::ClientAuthentication,
            "All configured authentication methods failed",
        )),
    }
}

/// Decode the key text. The text is dropped as soon as it is parsed.
fn parse_key(private_key: PrivateKeyMaterial) -> Result<russh::keys::PrivateKey, SessionFault> {
    decode_secret_key(private_key.expose(), None).map_err(|e| {
        SessionFault::new(
            FaultLevel::ClientAuthentication,
            format!("Cannot parse privateKey: {}", e),
        )
    })
}

/// Map a russh-side failure to a severity tag.
fn classify(error: &anyhow::Error) -> SessionFault {
    let level = match error.downcast_ref::<russh::Error>() {
        Some(russh::Error::InactivityTimeout) | Some(russh::Error::KeepaliveTimeout) => {
            FaultLevel::ClientTimeout
        }
        Some(russh::Error::IO(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
            FaultLevel::ClientTimeout
        }
        _ => match error.downcast_ref::<std::io::Error>() {
            Some(e) if e.kind() == std::io::ErrorKind::TimedOut => FaultLevel::ClientTimeout,
            _ => FaultLevel::Other,
        },
    };
    SessionFault::new(level, error.to_string())
}

/// Turns russh channel messages into [`ChannelEvent`]s.
#[derive(Debug, Default)]
struct ChannelTranslator {
    exit_code: Option<i32>,
    closed: bool,
}

impl ChannelTranslator {
    /// The event to forward for `msg`, if any.
    fn on_message(&mut self, msg: ChannelMsg) -> Option<ChannelEvent> {
        match msg {
            ChannelMsg::Data { data } => Some(ChannelEvent::Data(data.to_vec())),
            ChannelMsg::ExtendedData { data, .. } => Some(ChannelEvent::ExtendedData(data.to_vec())),
            ChannelMsg::ExitStatus { exit_status } => {
                self.exit_code = Some(i32::try_from(exit_status).unwrap_or(-1));
                None
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                log::debug!("Remote command terminated by signal {:?}", signal_name);
                None
            }
            ChannelMsg::Close => {
                self.closed = true;
                None
            }
            _ => None,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    /// The closing event once no more messages will arrive. `None` when the
    /// channel vanished without a close or exit status, which means the
    /// session went away; dropping the sender lets the runner report it.
    fn finish(self) -> Option<ChannelEvent> {
        if self.closed || self.exit_code.is_some() {
            Some(ChannelEvent::Close {
                exit_code: self.exit_code.unwrap_or(-1),
            })
        } else {
            None
        }
    }
}

/// Forward one channel's output until it closes.
async fn pump_channel(
    mut channel: russh::Channel<client::Msg>,
    early: Vec<ChannelMsg>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut translator = ChannelTranslator::default();

    for msg in early {
        if let Some(event) = translator.on_message(msg) {
            let _ = events.send(event);
        }
    }
    while !translator.is_closed() {
        let Some(msg) = channel.wait().await else {
            break;
        };
        if let Some(event) = translator.on_message(msg) {
            let _ = events.send(event);
        }
    }

    if let Some(event) = translator.finish() {
        let _ = events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::client::Handler;
    use russh::CryptoVec;

    fn translate(messages: Vec<ChannelMsg>) -> Vec<ChannelEvent> {
        let mut translator = ChannelTranslator::default();
        let mut events: Vec<ChannelEvent> = messages
            .into_iter()
            .filter_map(|msg| translator.on_message(msg))
            .collect();
        events.extend(translator.finish());
        events
    }

    fn data(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::Data {
            data: CryptoVec::from_slice(bytes),
        }
    }

    fn stderr(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(bytes),
            ext: 1,
        }
    }

    #[test]
    fn test_translate_keeps_arrival_order() {
        let events = translate(vec![
            data(b"out:1"),
            stderr(b"err:1"),
            data(b"out:2"),
            ChannelMsg::ExitStatus { exit_status: 0 },
            ChannelMsg::Eof,
            ChannelMsg::Close,
        ]);
        assert_eq!(
            events,
            vec![
                ChannelEvent::Data(b"out:1".to_vec()),
                ChannelEvent::ExtendedData(b"err:1".to_vec()),
                ChannelEvent::Data(b"out:2".to_vec()),
                ChannelEvent::Close { exit_code: 0 },
            ]
        );
    }

    #[test]
    fn test_translate_exit_status_then_close() {
        let events = translate(vec![ChannelMsg::ExitStatus { exit_status: 3 }, ChannelMsg::Close]);
        assert_eq!(events, vec![ChannelEvent::Close { exit_code: 3 }]);
    }

    #[test]
    fn test_translate_close_without_exit_status() {
        let events = translate(vec![data(b"partial"), ChannelMsg::Close]);
        assert_eq!(
            events,
            vec![
                ChannelEvent::Data(b"partial".to_vec()),
                ChannelEvent::Close { exit_code: -1 },
            ]
        );
    }

    #[test]
    fn test_translate_vanished_channel_has_no_close() {
        let mut translator = ChannelTranslator::default();
        assert!(translator.on_message(data(b"out")).is_some());
        assert!(!translator.is_closed());
        assert!(translator.finish().is_none());
    }

    #[test]
    fn test_translate_exit_status_out_of_range() {
        let events = translate(vec![ChannelMsg::ExitStatus { exit_status: u32::MAX }]);
        assert_eq!(events, vec![ChannelEvent::Close { exit_code: -1 }]);
    }

    #[tokio::test]
    async fn test_keepalive_timeout_reported_as_session_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = SshHandler { events: tx };
        handler
            .disconnected(client::DisconnectReason::Error(anyhow::Error::from(
                russh::Error::KeepaliveTimeout,
            )))
            .await
            .unwrap();
        drop(handler);

        match rx.recv().await {
            Some(SessionEvent::Error(fault)) => {
                assert_eq!(fault.level, FaultLevel::ClientTimeout);
                assert!(!fault.message.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(rx.recv().await, Some(SessionEvent::Close));
    }

    #[test]
    fn test_classify_timeouts() {
        let inactivity = anyhow::Error::from(russh::Error::InactivityTimeout);
        assert_eq!(classify(&inactivity).level, FaultLevel::ClientTimeout);

        let keepalive = anyhow::Error::from(russh::Error::KeepaliveTimeout);
        assert_eq!(classify(&keepalive).level, FaultLevel::ClientTimeout);

        let io = anyhow::Error::from(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert_eq!(classify(&io).level, FaultLevel::ClientTimeout);
    }

    #[test]
    fn test_classify_other() {
        let refused = anyhow::Error::from(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        let fault = classify(&refused);
        assert_eq!(fault.level, FaultLevel::Other);
        assert!(!fault.message.is_empty());

        let plain = anyhow::anyhow!("netfail");
        assert_eq!(classify(&plain), SessionFault::new(FaultLevel::Other, "netfail"));
    }

    #[test]
    fn test_unparseable_key_is_auth_failure() {
        let fault = parse_key(PrivateKeyMaterial::new("PRIVATEKEY")).unwrap_err();
        assert_eq!(fault.level, FaultLevel::ClientAuthentication);
        assert!(fault.message.starts_with("Cannot parse privateKey"));
    }

    #[tokio::test]
    async fn test_exec_requires_connection() {
        let mut client = RusshClient::new(SessionOptions::default());
        assert!(!client.is_connected().await);
        let err = client.exec("uptime").await.unwrap_err();
        assert_eq!(err.to_string(), "Not connected");
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let mut client = RusshClient::new(SessionOptions::default());
        client.end().await;
        client.end().await;
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_bad_key_reports_auth_error() {
        let mut client = RusshClient::new(SessionOptions::default());
        let mut events = client.connect(ConnectParams {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "tester".to_string(),
            private_key: PrivateKeyMaterial::new("not a key"),
        });
        match events.recv().await {
            Some(SessionEvent::Error(fault)) => {
                assert_eq!(fault.level, FaultLevel::ClientAuthentication)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
