use thiserror::Error;

use super::transport::{FaultLevel, SessionFault};

/// Why a run failed. Every variant is terminal for the invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("host and commands[] are required")]
    InvalidRequest,

    #[error("No private key found in ~/.ssh/")]
    KeyNotFound,

    /// A channel could not be opened or started for a command.
    #[error("SSH exec error: {0}")]
    CommandDispatch(String),

    #[error("SSH authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("SSH connection timed out: {0}")]
    Timeout(String),

    #[error("SSH connection error: {0}")]
    Connection(String),
}

impl From<SessionFault> for ExecError {
    fn from(fault: SessionFault) -> Self {
        match fault.level {
            FaultLevel::ClientAuthentication => ExecError::AuthenticationFailed(fault.message),
            FaultLevel::ClientTimeout => ExecError::Timeout(fault.message),
            FaultLevel::Other => ExecError::Connection(fault.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_classification() {
        let auth: ExecError = SessionFault::new(FaultLevel::ClientAuthentication, "bad auth").into();
        assert_eq!(auth.to_string(), "SSH authentication failed: bad auth");

        let timeout: ExecError = SessionFault::new(FaultLevel::ClientTimeout, "timeout").into();
        assert_eq!(timeout.to_string(), "SSH connection timed out: timeout");

        let other: ExecError = SessionFault::new(FaultLevel::Other, "netfail").into();
        assert_eq!(other.to_string(), "SSH connection error: netfail");
    }

    #[test]
    fn test_fixed_messages() {
        assert_eq!(ExecError::KeyNotFound.to_string(), "No private key found in ~/.ssh/");
        assert_eq!(
            ExecError::CommandDispatch("execfail".into()).to_string(),
            "SSH exec error: execfail"
        );
    }
}
