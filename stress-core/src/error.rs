// stress-core/src/error.rs
// Error taxonomy for stressors, the harness and the controller

use crate::status::ExitStatus;
use nix::errno::Errno;
use std::result;
use thiserror::Error;

/// Main error type for sysstress
#[derive(Error, Debug)]
pub enum StressError {
    /// A syscall failed with an errno
    #[error("{operation} failed: {errno}")]
    Errno { operation: String, errno: Errno },

    /// I/O errors carrying a std error
    #[error("I/O error: {operation} failed - {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Kernel feature, device node or capability is absent
    #[error("Not available: {what} ({reason})")]
    Unavailable { what: String, reason: String },

    /// Resource exhaustion errors
    #[error("Resource exhausted: {resource} ({details})")]
    ResourceExhausted { resource: String, details: String },

    /// An observed postcondition violated the expected kernel contract
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Configuration validation errors
    #[error("Configuration error: {field} - {message}")]
    Config { field: String, message: String },

    /// Unknown stressor name
    #[error("Unknown stressor: {0}")]
    UnknownStressor(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {context} - {source}")]
    Serialization {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Too many failures across all instances
    #[error("Failure threshold exceeded: {failures} failures (limit: {limit})")]
    FailureStorm { failures: u64, limit: u64 },
}

/// Result type alias for convenience
pub type Result<T> = result::Result<T, StressError>;

impl StressError {
    pub fn errno(operation: &str, errno: Errno) -> Self {
        StressError::Errno {
            operation: operation.to_string(),
            errno,
        }
    }

    /// Capture `errno` left by the last failing libc call
    pub fn last_errno(operation: &str) -> Self {
        Self::errno(operation, Errno::last())
    }

    pub fn unavailable(what: &str, reason: impl Into<String>) -> Self {
        StressError::Unavailable {
            what: what.to_string(),
            reason: reason.into(),
        }
    }

    pub fn verification(message: impl Into<String>) -> Self {
        StressError::Verification(message.into())
    }

    pub fn io(operation: &str, source: std::io::Error) -> Self {
        // keep errno-bearing I/O errors classifiable
        match source.raw_os_error() {
            Some(code) => StressError::Errno {
                operation: operation.to_string(),
                errno: Errno::from_i32(code),
            },
            None => StressError::Io {
                operation: operation.to_string(),
                source,
            },
        }
    }
}

/// How a failure should be treated by the execution loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Deliberately provoked errno, tolerated silently
    ExpectedBenign,
    /// Missing kernel feature, capability or device node
    EnvironmentAbsent,
    /// ENOMEM, ENOSPC, EAGAIN and friends
    ResourceExhausted,
    /// Postcondition violated
    Verification,
    /// Anything else
    Unexpected,
}

/// Classify an errno into the taxonomy
pub fn classify_errno(errno: Errno) -> ErrorClass {
    match errno {
        Errno::EINTR => ErrorClass::ExpectedBenign,
        Errno::EPERM
        | Errno::EACCES
        | Errno::ENOSYS
        | Errno::ENODEV
        | Errno::ENXIO
        | Errno::EOPNOTSUPP
        | Errno::EROFS => ErrorClass::EnvironmentAbsent,
        Errno::ENOMEM
        | Errno::ENOSPC
        | Errno::EAGAIN
        | Errno::EMFILE
        | Errno::ENFILE
        | Errno::EDQUOT
        | Errno::ENOBUFS => ErrorClass::ResourceExhausted,
        _ => ErrorClass::Unexpected,
    }
}

/// Error recovery strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Retry the operation a bounded number of times
    Retry { max_attempts: u32, delay_ms: u64 },
    /// Report a failure, keep iterating
    Continue,
    /// Count nothing, move on to the next iteration
    Skip,
    /// Leave the loop with the given status
    Abort(ExitStatus),
}

/// Trait for error recovery
pub trait ErrorRecovery {
    fn error_class(&self) -> ErrorClass;
    fn recovery_strategy(&self) -> RecoveryStrategy;
    fn is_recoverable(&self) -> bool;
}

impl ErrorRecovery for StressError {
    fn error_class(&self) -> ErrorClass {
        match self {
            StressError::Errno { errno, .. } => classify_errno(*errno),
            StressError::Unavailable { .. } => ErrorClass::EnvironmentAbsent,
            StressError::ResourceExhausted { .. } => ErrorClass::ResourceExhausted,
            StressError::Verification(_) => ErrorClass::Verification,
            _ => ErrorClass::Unexpected,
        }
    }

    fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            StressError::FailureStorm { .. } => RecoveryStrategy::Abort(ExitStatus::Failure),
            StressError::Config { .. } | StressError::UnknownStressor(_) => {
                RecoveryStrategy::Abort(ExitStatus::Failure)
            }
            _ => match self.error_class() {
                ErrorClass::ExpectedBenign => RecoveryStrategy::Skip,
                ErrorClass::EnvironmentAbsent => RecoveryStrategy::Abort(ExitStatus::NotImplemented),
                ErrorClass::ResourceExhausted => RecoveryStrategy::Retry {
                    max_attempts: 3,
                    delay_ms: 50,
                },
                ErrorClass::Verification | ErrorClass::Unexpected => RecoveryStrategy::Continue,
            },
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self.recovery_strategy(), RecoveryStrategy::Abort(_))
    }
}

impl From<std::io::Error> for StressError {
    fn from(err: std::io::Error) -> Self {
        StressError::io("unknown", err)
    }
}

impl From<Errno> for StressError {
    fn from(errno: Errno) -> Self {
        StressError::errno("syscall", errno)
    }
}

impl From<serde_json::Error> for StressError {
    fn from(err: serde_json::Error) -> Self {
        StressError::Serialization {
            context: "JSON processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<toml::de::Error> for StressError {
    fn from(err: toml::de::Error) -> Self {
        StressError::Serialization {
            context: "TOML config".to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_classification() {
        assert_eq!(classify_errno(Errno::EINTR), ErrorClass::ExpectedBenign);
        assert_eq!(classify_errno(Errno::ENOSYS), ErrorClass::EnvironmentAbsent);
        assert_eq!(classify_errno(Errno::EPERM), ErrorClass::EnvironmentAbsent);
        assert_eq!(classify_errno(Errno::ENOMEM), ErrorClass::ResourceExhausted);
        assert_eq!(classify_errno(Errno::EAGAIN), ErrorClass::ResourceExhausted);
        assert_eq!(classify_errno(Errno::EBADF), ErrorClass::Unexpected);
    }

    #[test]
    fn test_error_recovery_strategy() {
        let exhausted = StressError::errno("mmap", Errno::ENOMEM);
        assert!(exhausted.is_recoverable());
        match exhausted.recovery_strategy() {
            RecoveryStrategy::Retry { max_attempts, .. } => assert_eq!(max_attempts, 3),
            other => panic!("Expected retry strategy, got {:?}", other),
        }

        let absent = StressError::unavailable("/dev/full", "no such device");
        assert!(!absent.is_recoverable());
        assert_eq!(
            absent.recovery_strategy(),
            RecoveryStrategy::Abort(ExitStatus::NotImplemented)
        );

        let verify = StressError::verification("write to /dev/full succeeded");
        assert_eq!(verify.recovery_strategy(), RecoveryStrategy::Continue);
    }

    #[test]
    fn test_io_error_keeps_errno() {
        let err = StressError::io("open", std::io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(err.error_class(), ErrorClass::ResourceExhausted);

        let err = StressError::io("parse", std::io::Error::new(std::io::ErrorKind::Other, "bad"));
        assert_eq!(err.error_class(), ErrorClass::Unexpected);
    }

    #[test]
    fn test_error_display() {
        let err = StressError::errno("getdents64", Errno::EBADF);
        assert!(err.to_string().starts_with("getdents64 failed"));
    }
}
