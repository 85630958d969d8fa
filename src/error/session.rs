// Session error type and code constants

use std::fmt;

use log::error;

use crate::device::Codec;
use crate::error::ErrorCode;

/// Session error code constants
///
/// Single source of truth for the numeric codes reported across the
/// bridge boundary.
///
/// Error code range: 2001-2008
pub struct SessionErrorCodes {}

impl SessionErrorCodes {
    /// Operation not valid for the session's current status
    pub const INVALID_STATE: i32 = 2001;

    /// Slot number does not resolve to a live session
    pub const UNKNOWN_SLOT: i32 = 2002;

    /// Slot table reached its configured maximum
    pub const CAPACITY_EXCEEDED: i32 = 2003;

    /// Codec not supported by the hardware capability
    pub const UNSUPPORTED_CODEC: i32 = 2004;

    /// Recorded file missing (delete on absent or streaming-mode record)
    pub const NOT_FOUND: i32 = 2005;

    /// Open called twice on the same slot without an intervening close
    pub const ALREADY_OPEN: i32 = 2006;

    /// Underlying device open/start failure
    pub const DEVICE_FAILURE: i32 = 2007;

    /// Mutex was poisoned
    pub const LOCK_POISONED: i32 = 2008;
}

/// Log a session error with structured context
///
/// `context` names the entry point where the error surfaced.
pub fn log_session_error(err: &SessionError, context: &str) {
    error!(
        "Session error in {}: code={}, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors reported by player and recorder operations
///
/// Synchronous operations report these directly as a failed result for the
/// single request. Hardware-domain failures never surface here; they arrive
/// as `playerFinished { success: false }` terminal events instead.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Operation not valid for the session's current status
    InvalidState {
        operation: &'static str,
        status: &'static str,
    },

    /// Slot number does not resolve to a live session
    UnknownSlot { slot_no: usize },

    /// Slot table reached its configured maximum
    CapacityExceeded { max_slots: usize },

    /// Codec not supported by the hardware capability
    UnsupportedCodec { codec: Codec },

    /// Recorded file missing
    NotFound { detail: String },

    /// Open called twice on the same slot without an intervening close
    AlreadyOpen { slot_no: usize },

    /// Underlying device failure
    DeviceFailure { details: String },

    /// Mutex was poisoned
    LockPoisoned { component: &'static str },
}

impl SessionError {
    /// Shorthand for the most common rejection.
    pub fn invalid_state(operation: &'static str, status: &'static str) -> Self {
        SessionError::InvalidState { operation, status }
    }
}

impl ErrorCode for SessionError {
    fn code(&self) -> i32 {
        match self {
            SessionError::InvalidState { .. } => SessionErrorCodes::INVALID_STATE,
            SessionError::UnknownSlot { .. } => SessionErrorCodes::UNKNOWN_SLOT,
            SessionError::CapacityExceeded { .. } => SessionErrorCodes::CAPACITY_EXCEEDED,
            SessionError::UnsupportedCodec { .. } => SessionErrorCodes::UNSUPPORTED_CODEC,
            SessionError::NotFound { .. } => SessionErrorCodes::NOT_FOUND,
            SessionError::AlreadyOpen { .. } => SessionErrorCodes::ALREADY_OPEN,
            SessionError::DeviceFailure { .. } => SessionErrorCodes::DEVICE_FAILURE,
            SessionError::LockPoisoned { .. } => SessionErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            SessionError::InvalidState { operation, status } => {
                format!("{} not valid while {}", operation, status)
            }
            SessionError::UnknownSlot { slot_no } => {
                format!("No open session on slot {}", slot_no)
            }
            SessionError::CapacityExceeded { max_slots } => {
                format!("All {} slots are in use", max_slots)
            }
            SessionError::UnsupportedCodec { codec } => {
                format!("Codec {:?} is not supported by this device", codec)
            }
            SessionError::NotFound { detail } => {
                format!("Record not found: {}", detail)
            }
            SessionError::AlreadyOpen { slot_no } => {
                format!("Slot {} is already open", slot_no)
            }
            SessionError::DeviceFailure { details } => {
                format!("Audio device failure: {}", details)
            }
            SessionError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::DeviceFailure {
            details: err.to_string(),
        }
    }
}
