//! CLI Exit Code Registry
//!
//! Single source of truth for `swctl` exit codes. Scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain    | Description                              |
//! |---------|-----------|------------------------------------------|
//! | 0       | Universal | Success                                  |
//! | 1       | Universal | General error (unspecified)              |
//! | 2       | Universal | CLI usage error (bad args, bad config)   |
//! | 20-29   | session   | Connection and protocol failures         |
//! | 30-39   | host      | The host answered with an error envelope |

use scenewire_protocol::ErrorCode;

use crate::session::SessionError;

// =============================================================================
// Universal (0-2)
// =============================================================================

pub const EXIT_SUCCESS: u8 = 0;

/// General error. Prefer a specific code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable settings.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Session (20-29)
// =============================================================================

/// No session found, connection refused.
pub const EXIT_SESSION_CONNECT: u8 = 20;

/// Bad framing, unparseable line, missing welcome.
pub const EXIT_SESSION_PROTOCOL: u8 = 21;

/// Host closed the connection.
pub const EXIT_SESSION_CLOSED: u8 = 22;

/// Session prefix matched more than one host.
pub const EXIT_SESSION_AMBIGUOUS: u8 = 23;

/// Read timed out.
pub const EXIT_SESSION_TIMEOUT: u8 = 26;

// =============================================================================
// Host errors (30-39)
// =============================================================================

/// Unknown command or a parameter failed validation.
pub const EXIT_HOST_INPUT: u8 = 30;

/// The addressed node, scene or resource does not exist.
pub const EXIT_HOST_NOT_FOUND: u8 = 31;

/// Unknown type, method, property or signal.
pub const EXIT_HOST_UNKNOWN: u8 = 32;

/// The request was understood but the operation was refused.
pub const EXIT_HOST_REFUSED: u8 = 33;

/// Failure inside the host (persist, capture, internal).
pub const EXIT_HOST_FAILURE: u8 = 34;

/// Map a host error code onto the 30-39 range.
pub fn host_exit_code(code: ErrorCode) -> u8 {
    match code {
        ErrorCode::ProtocolError | ErrorCode::MessageTooLarge | ErrorCode::ParseError => EXIT_SESSION_PROTOCOL,
        ErrorCode::UnknownCommand | ErrorCode::ValidationError | ErrorCode::ValueResolutionError => {
            EXIT_HOST_INPUT
        }
        ErrorCode::NodeNotFound | ErrorCode::NotFound => EXIT_HOST_NOT_FOUND,
        ErrorCode::UnknownType | ErrorCode::UnknownChannel | ErrorCode::UnknownMethod => EXIT_HOST_UNKNOWN,
        ErrorCode::CannotDeleteRoot
        | ErrorCode::CannotReparentRoot
        | ErrorCode::AlreadySubscribed
        | ErrorCode::NotSubscribed
        | ErrorCode::AlreadyConnected
        | ErrorCode::NotConnected => EXIT_HOST_REFUSED,
        ErrorCode::PersistError | ErrorCode::CaptureError | ErrorCode::InternalError => EXIT_HOST_FAILURE,
    }
}

/// Exit code for a session failure.
pub fn session_exit_code(err: &SessionError) -> u8 {
    match err {
        SessionError::ConnectionFailed(_) => EXIT_SESSION_CONNECT,
        SessionError::ConnectionClosed => EXIT_SESSION_CLOSED,
        SessionError::Timeout => EXIT_SESSION_TIMEOUT,
        SessionError::Io(_) => EXIT_ERROR,
        SessionError::Protocol(_) => EXIT_SESSION_PROTOCOL,
        SessionError::Ambiguous { .. } => EXIT_SESSION_AMBIGUOUS,
        SessionError::Server { code, .. } => ErrorCode::from_code(code).map_or(EXIT_ERROR, host_exit_code),
    }
}
