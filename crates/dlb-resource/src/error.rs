//! Resource manager error types.
//!
//! Two classes of failure leave the manager: a rejected request carries a
//! [`DlbStatus`] and leaves every piece of state untouched, while a fault
//! means an internal invariant no longer holds and the affected domain
//! must be treated as unusable.

use dlb_hw::HwError;
use dlb_types::DlbStatus;
use log::error;
use thiserror::Error;

/// Error type for resource manager operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The request was refused; the caller may retry with other arguments.
    #[error("request rejected: {0}")]
    Rejected(DlbStatus),

    /// An internal-consistency check failed.
    #[error("internal error in {op}: {message}")]
    Fault { op: &'static str, message: String },

    /// The hardware layer reported an error.
    #[error("hardware error: {0}")]
    Hw(#[from] HwError),

    /// The manager configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ResourceError {
    /// Creates a rejection carrying `status`.
    pub fn rejected(status: DlbStatus) -> Self {
        ResourceError::Rejected(status)
    }

    /// Creates a fault and logs it at error level.
    pub fn fault(op: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        error!("[{}()] Internal error: {}", op, message);
        ResourceError::Fault { op, message }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        ResourceError::Config(message.into())
    }

    /// Returns the user-facing status of a rejected request.
    pub fn status(&self) -> Option<DlbStatus> {
        match self {
            ResourceError::Rejected(status) => Some(*status),
            _ => None,
        }
    }

    /// Returns true for errors that leave a domain in an unknown state.
    pub fn is_fault(&self) -> bool {
        matches!(self, ResourceError::Fault { .. } | ResourceError::Hw(_))
    }
}

impl From<DlbStatus> for ResourceError {
    fn from(status: DlbStatus) -> Self {
        ResourceError::Rejected(status)
    }
}

/// Result type for resource manager operations.
pub type Result<T> = std::result::Result<T, ResourceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rejected_carries_status() {
        let err = ResourceError::rejected(DlbStatus::LdbPortsUnavailable);
        assert_eq!(err.status(), Some(DlbStatus::LdbPortsUnavailable));
        assert!(!err.is_fault());
        assert_eq!(
            err.to_string(),
            "request rejected: LDB_PORTS_UNAVAILABLE"
        );
    }

    #[test]
    fn test_fault_classification() {
        let err = ResourceError::fault("drain_mapped_queues", "loop exhausted");
        assert!(err.is_fault());
        assert_eq!(err.status(), None);
        assert_eq!(
            err.to_string(),
            "internal error in drain_mapped_queues: loop exhausted"
        );

        let err: ResourceError = HwError::reset_timeout("ldb cq 3", 16).into();
        assert!(err.is_fault());
    }

    #[test]
    fn test_config_is_not_fault() {
        let err = ResourceError::config("bad limits");
        assert!(!err.is_fault());
        assert_eq!(err.to_string(), "configuration error: bad limits");
    }

    #[test]
    fn test_from_status() {
        let err: ResourceError = DlbStatus::InvalidQid.into();
        assert_eq!(err, ResourceError::Rejected(DlbStatus::InvalidQid));
    }
}
