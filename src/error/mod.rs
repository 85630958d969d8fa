// Error types for the audio session bridge
//
// This module defines the error type shared by player and recorder
// operations, with stable numeric codes suitable for an FFI boundary.

mod session;

pub use session::{log_session_error, SessionError, SessionErrorCodes};

/// Error codes for structured error reporting
///
/// Provides a standard way to get error codes and messages from error
/// types, so the transport layer can map failures without string matching.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
