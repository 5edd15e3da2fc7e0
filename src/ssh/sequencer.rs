//! Command sequencing state machine.
//!
//! The sequencer performs no I/O. Transport notifications go in, [`Action`]s
//! come out, and the runner carries them out. Once [`Phase::Settled`] is
//! reached every further notification is ignored, so the outcome is produced
//! exactly once no matter how many error/end/close notifications follow.

use std::mem;

use super::error::ExecError;
use super::transport::{ChannelEvent, SessionEvent};
use super::CommandResult;

pub type Outcome = Result<Vec<CommandResult>, ExecError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the session to become ready.
    Connecting,
    /// `commands[cursor]` has an open channel.
    Running { cursor: usize },
    /// Outcome decided, waiting for the session close to be performed.
    Closing,
    Settled,
}

#[derive(Debug, PartialEq)]
pub enum Action {
    /// Open a channel and run this command.
    Exec(String),
    /// Close the session, then report back with [`Sequencer::on_end_complete`].
    End,
    Settle(Outcome),
}

pub struct Sequencer {
    commands: Vec<String>,
    phase: Phase,
    results: Vec<CommandResult>,
    output: Vec<u8>,
    /// Session has ended or an end was already issued.
    ended: bool,
    pending: Option<Outcome>,
}

impl Sequencer {
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            results: Vec::with_capacity(commands.len()),
            commands,
            phase: Phase::Connecting,
            output: Vec::new(),
            ended: false,
            pending: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_settled(&self) -> bool {
        self.phase == Phase::Settled
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn on_session_event(&mut self, event: SessionEvent) -> Vec<Action> {
        match event {
            SessionEvent::Ready => {
                if self.phase != Phase::Connecting {
                    log::debug!("Ignoring ready notification in {:?}", self.phase);
                    return Vec::new();
                }
                if self.commands.is_empty() {
                    return self.finish(Ok(Vec::new()));
                }
                self.dispatch(0)
            }
            SessionEvent::Error(fault) => {
                if self.is_finishing() {
                    log::debug!("Ignoring session error after outcome: {}", fault.message);
                    return Vec::new();
                }
                log::warn!("SSH session error ({}): {}", fault.level, fault.message);
                self.finish(Err(fault.into()))
            }
            SessionEvent::End | SessionEvent::Close => {
                self.ended = true;
                Vec::new()
            }
        }
    }

    pub fn on_channel_event(&mut self, event: ChannelEvent) -> Vec<Action> {
        let Phase::Running { cursor } = self.phase else {
            return Vec::new();
        };

        match event {
            ChannelEvent::Data(bytes) | ChannelEvent::ExtendedData(bytes) => {
                self.output.extend_from_slice(&bytes);
                Vec::new()
            }
            ChannelEvent::Close { exit_code } => {
                let output = mem::take(&mut self.output);
                log::debug!(
                    "Command #{} exited with {} ({} bytes)",
                    cursor + 1,
                    exit_code,
                    output.len()
                );
                self.results.push(CommandResult {
                    result: String::from_utf8_lossy(&output).into_owned(),
                    code: exit_code,
                });

                let next = cursor + 1;
                if next < self.commands.len() {
                    self.dispatch(next)
                } else {
                    let results = mem::take(&mut self.results);
                    self.finish(Ok(results))
                }
            }
        }
    }

    /// The channel for the current command could not be opened.
    pub fn on_dispatch_error(&mut self, message: String) -> Vec<Action> {
        if !matches!(self.phase, Phase::Running { .. }) {
            return Vec::new();
        }
        self.finish(Err(ExecError::CommandDispatch(message)))
    }

    pub fn on_end_complete(&mut self) -> Vec<Action> {
        self.ended = true;
        if self.phase != Phase::Closing {
            return Vec::new();
        }
        match self.pending.take() {
            Some(outcome) => self.settle(outcome),
            None => Vec::new(),
        }
    }

    fn is_finishing(&self) -> bool {
        matches!(self.phase, Phase::Closing | Phase::Settled)
    }

    fn dispatch(&mut self, cursor: usize) -> Vec<Action> {
        self.phase = Phase::Running { cursor };
        self.output.clear();
        vec![Action::Exec(self.commands[cursor].clone())]
    }

    fn finish(&mut self, outcome: Outcome) -> Vec<Action> {
        if outcome.is_err() {
            self.results.clear();
        }
        self.output.clear();

        if self.ended {
            return self.settle(outcome);
        }
        self.ended = true;
        self.phase = Phase::Closing;
        self.pending = Some(outcome);
        vec![Action::End]
    }

    fn settle(&mut self, outcome: Outcome) -> Vec<Action> {
        self.phase = Phase::Settled;
        vec![Action::Settle(outcome)]
    }
}
