//! Runs a batch of commands over one SSH session.

use std::collections::VecDeque;
use std::sync::Arc;

use super::error::ExecError;
use super::keys::{FileReader, HomeResolver, KeyLocator, SystemHome, TokioFs};
use super::sequencer::{Action, Outcome, Sequencer};
use super::session::RusshClient;
use super::transport::{
    ChannelEvent, ChannelEvents, ClientFactory, ConnectParams, FaultLevel, SessionClient,
    SessionEvent, SessionEvents, SessionFault,
};
use super::{CommandResult, ExecRequest, SessionOptions};

/// Collaborators used by [`RemoteCommandRunner`].
#[derive(Clone)]
pub struct RunnerConfig {
    pub connector: Arc<ClientFactory>,
    pub reader: Arc<dyn FileReader>,
    pub home: Arc<dyn HomeResolver>,
    pub options: SessionOptions,
}

impl RunnerConfig {
    /// russh transport, `tokio::fs` and the OS home directory.
    pub fn system() -> Self {
        Self {
            connector: Arc::new(|options: &SessionOptions| {
                Box::new(RusshClient::new(options.clone())) as Box<dyn SessionClient>
            }),
            reader: Arc::new(TokioFs),
            home: Arc::new(SystemHome),
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::system()
    }
}

pub struct RemoteCommandRunner {
    config: RunnerConfig,
}

impl RemoteCommandRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Run every command in order and return one result per command.
    ///
    /// Either all results are returned or a single error is; a command's
    /// non-zero exit status is a result, not an error.
    pub async fn run(&self, request: ExecRequest) -> Result<Vec<CommandResult>, ExecError> {
        request.validate()?;

        let locator = KeyLocator::new(self.config.home.clone(), self.config.reader.clone());
        let private_key = locator.locate().await?;

        let params = ConnectParams {
            username: request.resolved_username(),
            host: request.host,
            port: request.port,
            private_key,
        };
        log::info!(
            "Running {} command(s) on {}@{}:{}",
            request.commands.len(),
            params.username,
            params.host,
            params.port
        );

        let mut client = (self.config.connector)(&self.config.options);
        let session_events = client.connect(params);
        drive(client.as_mut(), session_events, Sequencer::new(request.commands)).await
    }
}

/// Feed transport notifications to the sequencer until it settles.
async fn drive(
    client: &mut dyn SessionClient,
    mut session_events: SessionEvents,
    mut sequencer: Sequencer,
) -> Outcome {
    let mut channel: Option<ChannelEvents> = None;

    loop {
        let actions = tokio::select! {
            biased;
            event = next_channel_event(&mut channel) => match event {
                Some(event) => {
                    if matches!(event, ChannelEvent::Close { .. }) {
                        channel = None;
                    }
                    sequencer.on_channel_event(event)
                }
                None => {
                    channel = None;
                    // The session failure that took the channel down is
                    // usually already queued; it decides the outcome.
                    let mut actions = Vec::new();
                    while let Ok(event) = session_events.try_recv() {
                        actions.extend(sequencer.on_session_event(event));
                    }
                    actions.extend(sequencer.on_session_event(SessionEvent::Error(
                        SessionFault::new(
                            FaultLevel::Other,
                            "channel closed before reporting an exit status",
                        ),
                    )));
                    actions
                }
            },
            event = session_events.recv() => match event {
                Some(event) => sequencer.on_session_event(event),
                None => sequencer.on_session_event(SessionEvent::Error(SessionFault::new(
                    FaultLevel::Other,
                    "session terminated unexpectedly",
                ))),
            },
        };

        if let Some(outcome) = perform(client, &mut sequencer, &mut channel, actions).await {
            return outcome;
        }
    }
}

/// Carry out sequencer actions, feeding follow-up actions back in.
async fn perform(
    client: &mut dyn SessionClient,
    sequencer: &mut Sequencer,
    channel: &mut Option<ChannelEvents>,
    actions: Vec<Action>,
) -> Option<Outcome> {
    let mut queue = VecDeque::from(actions);

    while let Some(action) = queue.pop_front() {
        match action {
            Action::Exec(command) => {
                log::debug!("Executing: {}", command);
                match client.exec(&command).await {
                    Ok(events) => *channel = Some(events),
                    Err(e) => {
                        log::error!("SSH exec failed: {}", e);
                        queue.extend(sequencer.on_dispatch_error(e.to_string()));
                    }
                }
            }
            Action::End => {
                client.end().await;
                queue.extend(sequencer.on_end_complete());
            }
            Action::Settle(outcome) => return Some(outcome),
        }
    }

    None
}

async fn next_channel_event(channel: &mut Option<ChannelEvents>) -> Option<ChannelEvent> {
    match channel {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
