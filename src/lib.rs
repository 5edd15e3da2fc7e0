//! sshexec core: run an ordered batch of shell commands on one host over a
//! key-authenticated SSH session.
//!
//! Provides the command runner, the russh transport adapter, and a C FFI
//! interface for embedding hosts.

pub mod ffi;
pub mod ssh;

pub use ssh::error::ExecError;
pub use ssh::runner::{RemoteCommandRunner, RunnerConfig};
pub use ssh::{CommandResult, ExecRequest, SessionOptions};
