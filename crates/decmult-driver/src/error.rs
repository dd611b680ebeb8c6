//! Error types for action driver operations

use decmult_chip::{JobErrorCode, LayoutError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for action operations
pub type Result<T> = std::result::Result<T, ActionError>;

/// Errors that can occur while configuring or driving the action
#[derive(Debug, Error)]
pub enum ActionError {
    /// Packing or sizing configuration is unusable
    #[error("Invalid configuration: {reason}")]
    ConfigInvalid {
        /// What is wrong with it
        reason: String,
    },

    /// Register image could not be decoded
    #[error("Layout error: {source}")]
    Layout {
        /// Underlying layout error
        #[from]
        source: LayoutError,
    },

    /// Register window reports a different layout release
    #[error("Release mismatch: host built for {expected:#x}, window reports {found:#x}")]
    ReleaseMismatch {
        /// Release this build expects
        expected: u32,
        /// Release read from the window
        found: u32,
    },

    /// Operation not allowed in the current action state
    #[error("Action in invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// The accelerator finished the job with a non-zero error code
    #[error("Job failed: {code}")]
    JobFailed {
        /// Error code read from the control block
        code: JobErrorCode,
    },

    /// Completion not observed in time
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Access outside any device-visible buffer
    #[error("Address fault: {len} B at {addr:#x}")]
    AddressFault {
        /// First byte accessed
        addr: u64,
        /// Length of the access
        len: usize,
    },

    /// Register window device node or file is missing
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Register or buffer transfer failed
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },
}

impl ActionError {
    /// Create an invalid configuration error
    pub fn config_invalid(reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Error code the accelerator reports for this failure, if it has one.
    ///
    /// Address faults map to [`JobErrorCode::AddressFault`]; job failures keep
    /// their code. Host-side errors have no register encoding.
    pub const fn job_error_code(&self) -> Option<JobErrorCode> {
        match self {
            Self::JobFailed { code } => Some(*code),
            Self::AddressFault { .. } => Some(JobErrorCode::AddressFault),
            _ => None,
        }
    }
}
