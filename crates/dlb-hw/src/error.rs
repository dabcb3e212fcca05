//! Hardware error types.
//!
//! Register writes are fire-and-forget, so errors only arise from the
//! interval allocator, producer-port mapping and resource reset polling.

use thiserror::Error;

/// Error type for hardware-layer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwError {
    /// A bitmap range extends past the end of the bitmap.
    #[error("bitmap range {base}+{len} exceeds capacity {capacity}")]
    RangeOutOfBounds { base: u32, len: u32, capacity: u32 },

    /// A range being returned to the bitmap was already free.
    #[error("bitmap range {base}+{len} is already free")]
    RangeAlreadyFree { base: u32, len: u32 },

    /// A bitmap could not be allocated.
    #[error("bitmap allocation failed: {message}")]
    Allocation { message: String },

    /// The producer-port doorbell region could not be mapped.
    #[error("producer port mapping failed: {port}")]
    ProducerPortMap { port: String },

    /// A hardware resource did not report reset completion in time.
    #[error("reset of {target} timed out after {polls} polls")]
    ResetTimeout { target: String, polls: u32 },
}

impl HwError {
    /// Creates an allocation error.
    pub fn allocation(message: impl Into<String>) -> Self {
        HwError::Allocation {
            message: message.into(),
        }
    }

    /// Creates a producer-port mapping error.
    pub fn producer_port_map(port: impl Into<String>) -> Self {
        HwError::ProducerPortMap { port: port.into() }
    }

    /// Creates a reset timeout error.
    pub fn reset_timeout(target: impl Into<String>, polls: u32) -> Self {
        HwError::ResetTimeout {
            target: target.into(),
            polls,
        }
    }

    /// Returns true if this error came from the interval allocator.
    pub fn is_allocator_error(&self) -> bool {
        matches!(
            self,
            HwError::RangeOutOfBounds { .. }
                | HwError::RangeAlreadyFree { .. }
                | HwError::Allocation { .. }
        )
    }
}

/// Result type for hardware-layer operations.
pub type HwResult<T> = Result<T, HwError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_display() {
        let err = HwError::RangeOutOfBounds {
            base: 10,
            len: 8,
            capacity: 16,
        };
        assert_eq!(err.to_string(), "bitmap range 10+8 exceeds capacity 16");

        let err = HwError::reset_timeout("ldb queue 3", 1024);
        assert_eq!(err.to_string(), "reset of ldb queue 3 timed out after 1024 polls");
    }

    #[test]
    fn test_error_classification() {
        assert!(HwError::allocation("zero capacity").is_allocator_error());
        assert!(HwError::RangeAlreadyFree { base: 0, len: 1 }.is_allocator_error());
        assert!(!HwError::producer_port_map("ldb 2").is_allocator_error());
    }
}
