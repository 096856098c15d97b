//! Error types shared across berth crates.
//!
//! Errors are grouped by how a caller reacts to them:
//! - resolution errors name the user's reference and abort that reference
//! - spec errors abort before any process is started
//! - runtime errors (`NotFound`, `Rpc`, `Transport`) are propagated unmodified
//! - `ExecFailed` is an application outcome, not a transport failure

use thiserror::Error;

/// Result alias used throughout berth.
pub type BerthResult<T> = Result<T, BerthError>;

#[derive(Debug, Error)]
pub enum BerthError {
    /// No container matched the user's reference.
    #[error("no such container {0}")]
    NoSuchContainer(String),

    /// More than one container matched the user's reference.
    #[error("multiple IDs found with provided prefix: {reference} ({count} matches)")]
    AmbiguousReference { reference: String, count: usize },

    /// The runtime reported that the requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// User-supplied input was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// User/group identity could not be resolved inside the container.
    #[error("identity: {0}")]
    Identity(String),

    /// Process specification could not be derived.
    #[error("spec: {0}")]
    Spec(String),

    /// The exec'd process exited with a non-zero code.
    #[error("exec failed with exit code {code}")]
    ExecFailed { code: u32 },

    /// Out-of-band error reported by the runtime alongside an exit status.
    #[error("runtime: {0}")]
    Runtime(String),

    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// gRPC call failed.
    #[error("rpc: {0}")]
    Rpc(String),

    /// Connection to the runtime daemon failed.
    #[error("transport: {0}")]
    Transport(String),

    /// Local terminal could not be configured.
    #[error("terminal: {0}")]
    Terminal(String),

    #[error("serialization: {0}")]
    Serialization(String),

    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl BerthError {
    /// True when the runtime reported a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BerthError::NotFound(_))
    }

    /// Exit code the invoking process should terminate with.
    ///
    /// A failed exec propagates the remote code, clamped to 1..=255 so it
    /// survives truncation to 8 bits; everything else is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            BerthError::ExecFailed { code } => (*code).clamp(1, 255) as i32,
            _ => 1,
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<tonic::Status> for BerthError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::NotFound => BerthError::NotFound(status.message().to_string()),
            tonic::Code::InvalidArgument => {
                BerthError::InvalidArgument(status.message().to_string())
            }
            tonic::Code::Cancelled => BerthError::Cancelled,
            code => BerthError::Rpc(format!("{:?}: {}", code, status.message())),
        }
    }
}

impl From<tonic::transport::Error> for BerthError {
    fn from(err: tonic::transport::Error) -> Self {
        BerthError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for BerthError {
    fn from(err: serde_json::Error) -> Self {
        BerthError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_messages_name_reference() {
        let err = BerthError::NoSuchContainer("web1".into());
        assert_eq!(err.to_string(), "no such container web1");

        let err = BerthError::AmbiguousReference {
            reference: "ab".into(),
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "multiple IDs found with provided prefix: ab (2 matches)"
        );
    }

    #[test]
    fn test_exec_failed_carries_code() {
        let err = BerthError::ExecFailed { code: 42 };
        assert_eq!(err.to_string(), "exec failed with exit code 42");
        assert_eq!(err.exit_code(), 42);
        assert_eq!(BerthError::Cancelled.exit_code(), 1);
    }

    #[test]
    fn test_exec_failed_exit_code_never_zero() {
        for (code, expected) in [(255, 255), (256, 255), (512, 255), (u32::MAX, 255)] {
            assert_eq!(BerthError::ExecFailed { code }.exit_code(), expected);
        }
        assert_eq!(BerthError::ExecFailed { code: 0 }.exit_code(), 1);
    }

    #[test]
    fn test_status_conversion() {
        let err: BerthError = tonic::Status::not_found("task gone").into();
        assert!(err.is_not_found());

        let err: BerthError = tonic::Status::invalid_argument("bad").into();
        assert!(matches!(err, BerthError::InvalidArgument(_)));

        let err: BerthError = tonic::Status::unavailable("down").into();
        assert!(matches!(err, BerthError::Rpc(_)));
        assert!(!err.is_not_found());
    }
}
