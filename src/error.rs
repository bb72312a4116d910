//! Error types for marshaling sessions
//!
//! Every failure is fatal for the current build attempt. Nothing here is
//! retried automatically; the caller decides whether to try again with a
//! different target or corrected input.

use thiserror::Error;

use crate::backend::ToolchainError;
use crate::shm::ShmError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, MarshalError>;

/// Main error type for marshaling operations
#[derive(Debug, Error)]
pub enum MarshalError {
    /// The argument list does not match the kernel signature.
    /// Reported before any shared region is acquired.
    #[error("kernel '{kernel}' takes {expected} arguments but got {actual}")]
    ArgumentCountMismatch {
        kernel: String,
        expected: usize,
        actual: usize,
    },

    /// The compiler handed over a type code that has no native storage
    #[error("unsupported type kind: code={code}, lanes={lanes}")]
    UnsupportedTypeKind { code: u8, lanes: u16 },

    /// Element type metadata violates its own invariants
    #[error("invalid element type: {0}")]
    InvalidElementType(String),

    /// Tensor shape is not a sequence of positive extents
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// Caller buffer is smaller than the computed layout
    #[error("argument {index}: buffer holds {actual} bytes but layout needs {expected}")]
    BufferSizeMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// The OS could not provide a shared segment
    #[error("failed to acquire shared region for argument {index}: {source}")]
    ResourceAcquisitionFailure {
        index: usize,
        #[source]
        source: ShmError,
    },

    /// Copy into or out of an acquired region failed
    #[error("shared region transfer failed: {0}")]
    Transfer(#[from] ShmError),

    /// The generated program failed to build or run
    #[error("external toolchain failure: {0}")]
    ExternalToolchainFailure(#[from] ToolchainError),

    /// Writing generated files failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed kernel description
    #[error("invalid kernel description: {0}")]
    Json(#[from] serde_json::Error),
}

impl MarshalError {
    /// Whether the error was raised before any region could have been acquired
    pub fn is_pre_acquisition(&self) -> bool {
        matches!(
            self,
            MarshalError::ArgumentCountMismatch { .. }
                | MarshalError::UnsupportedTypeKind { .. }
                | MarshalError::InvalidElementType(_)
                | MarshalError::InvalidShape(_)
                | MarshalError::BufferSizeMismatch { .. }
                | MarshalError::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_mismatch_message() {
        let err = MarshalError::ArgumentCountMismatch {
            kernel: "default_function".to_string(),
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "kernel 'default_function' takes 3 arguments but got 2"
        );
        assert!(err.is_pre_acquisition());
    }

    #[test]
    fn test_toolchain_failure_is_not_pre_acquisition() {
        let err: MarshalError = ToolchainError::RunFailed {
            status: Some(1),
            stderr: "segfault".to_string(),
        }
        .into();
        assert!(!err.is_pre_acquisition());
        assert!(err.to_string().contains("segfault"));
    }
}
