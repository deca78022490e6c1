//! Error taxonomy for the ACP engine.
//!
//! Every public fallible operation (`Session::start`, `Session::send`,
//! `Session::stop`) returns [`AcpError`]. Variants line up 1:1 with the kinds
//! the controller distinguishes internally: transport failures end the
//! session outright, RPC/application errors are scoped to a single call, and
//! decode/config errors degrade to an `Error` message on the output stream
//! rather than tearing anything down.

use thiserror::Error;

/// The crate's single public error type.
#[derive(Debug, Error)]
pub enum AcpError {
    #[error("failed to spawn agent process: {0}")]
    Spawn(std::io::Error),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("wire frame exceeded max size ({max} bytes)")]
    FrameTooLarge { max: usize },

    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("write failed: {0}")]
    Write(std::io::Error),

    #[error("call cancelled")]
    Cancelled,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("session is terminated")]
    Terminated,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("permission handler panicked")]
    PermissionHandlerPanicked,

    #[error("agent process exited with code {0}")]
    ProcessExited(i32),
}

impl AcpError {
    /// True for errors that should terminate the whole session rather than
    /// being scoped to the call that produced them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AcpError::TransportClosed(_)
                | AcpError::FrameTooLarge { .. }
                | AcpError::Handshake(_)
                | AcpError::SessionNotFound(_)
                | AcpError::Terminated
                | AcpError::ProcessExited(_)
        )
    }
}

/// Caps `s` at `max_bytes`, cutting back to the nearest UTF-8 character
/// boundary rather than splitting one. Used for general error strings headed
/// for a `Message::Error` (cap: 4 KiB).
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Default cap for user-facing diagnostic strings.
pub const MAX_ERROR_LEN: usize = 4096;

/// Default cap for wire-carried error-code strings (e.g. `stopReason`,
/// `errorCode`). Rejects control characters outright rather than trying to
/// sanitize them: a code string containing `\n` or `\0` is not a code this
/// system recognizes, and surfacing it truncated-but-intact risks log
/// injection or terminal escape abuse downstream.
pub const MAX_CODE_LEN: usize = 128;

/// Validates and truncates a wire-carried short code string per §7: reject
/// any control characters, then truncate to `MAX_CODE_LEN` bytes at a
/// code-point boundary. Invalid input becomes an empty string rather than an
/// error — callers treat an empty code as "absent".
pub fn sanitize_code(raw: &str) -> String {
    if raw.chars().any(|c| c.is_control()) {
        return String::new();
    }
    truncate_utf8(raw, MAX_CODE_LEN)
}

/// Truncates a diagnostic string for inclusion in a `Message::Error`.
pub fn truncate_diagnostic(s: &str) -> String {
    truncate_utf8(s, MAX_ERROR_LEN)
}

impl From<tokio::sync::oneshot::error::RecvError> for AcpError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        AcpError::TransportClosed("response channel dropped".to_string())
    }
}
