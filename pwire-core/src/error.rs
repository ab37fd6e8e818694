//! Domain-specific error types for the pwire protocol engine.
//!
//! All fallible operations return `Result<T, PwError>`.
//! No panics on untrusted input: every error is typed and recoverable
//! by the caller, even when it is fatal for the connection.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::state::ConnectionState;

/// Convenience alias used throughout the crate.
pub type Result<T, E = PwError> = std::result::Result<T, E>;

/// The canonical error type for the pwire protocol engine.
///
/// `Clone` so one transport failure can reject every waiting request.
#[derive(Debug, Clone, Error)]
pub enum PwError {
    // ── Codec Errors ─────────────────────────────────────────────
    /// A POD value could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Bytes could not be decoded into a POD value.
    #[error("decoding error: {0}")]
    Decoding(String),

    // ── Framing Errors ───────────────────────────────────────────
    /// Fewer bytes than a frame header were supplied.
    #[error("frame too short: {actual} bytes (header is {expected})")]
    FrameTooShort { expected: usize, actual: usize },

    /// The bytes following the frame header are not a valid POD.
    #[error("frame payload error: {0}")]
    FramePayload(String),

    /// A length prefix announced a frame above the configured limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Appending to the stream buffer would exceed its cap.
    #[error("buffer overflow: {buffered} + {incoming} bytes exceeds cap of {max}")]
    BufferOverflow {
        buffered: usize,
        incoming: usize,
        max: usize,
    },

    // ── State Machine Errors ─────────────────────────────────────
    /// A state transition outside the legality table was requested.
    #[error("invalid state transition: {from} → {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// A handshake step did not complete before its deadline.
    #[error("handshake timed out in {step} after {elapsed:?}")]
    HandshakeTimeout {
        step: &'static str,
        elapsed: Duration,
    },

    /// The server speaks a protocol major version we do not.
    #[error("unsupported protocol version {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },

    // ── Connection Errors ────────────────────────────────────────
    /// The connection is closed or was torn down while waiting.
    #[error("connection closed")]
    ConnectionClosed,

    /// The socket layer reported an error.
    #[error("i/o error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    // ── Correlation Errors ───────────────────────────────────────
    /// A request was not answered before its deadline.
    #[error("request {sequence} timed out after {timeout:?}")]
    Timeout { sequence: u32, timeout: Duration },

    /// The sequence has no pending request (never created or already settled).
    #[error("no pending request for sequence {0}")]
    NotFound(u32),

    /// A pending request already exists for this sequence.
    #[error("sequence {0} already has a pending request")]
    DuplicateSequence(u32),

    /// The server answered a request with a core error event.
    #[error("server error {code} for request {sequence}: {message}")]
    Remote {
        sequence: u32,
        code: i32,
        message: String,
    },

    // ── Dispatch Errors ──────────────────────────────────────────
    /// The handler queue stayed full; the frame was dropped.
    #[error("dispatch queue full, dropped event for object {object_id} (seq {sequence})")]
    Backpressure { object_id: u32, sequence: u32 },

    /// A registered handler failed while processing an event.
    #[error("handler for object {object_id} failed: {message}")]
    Handler { object_id: u32, message: String },

    // ── Configuration Errors ─────────────────────────────────────
    /// A configuration file or value was rejected.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PwError {
    /// Returns `true` for errors after which the byte stream can no
    /// longer be trusted and the connection must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PwError::Decoding(_)
                | PwError::FrameTooShort { .. }
                | PwError::FramePayload(_)
                | PwError::FrameTooLarge { .. }
                | PwError::BufferOverflow { .. }
                | PwError::Io(_)
                | PwError::ConnectionClosed
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<std::io::Error> for PwError {
    fn from(e: std::io::Error) -> Self {
        PwError::Io(Arc::new(e))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for PwError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        PwError::ConnectionClosed
    }
}

impl From<toml::de::Error> for PwError {
    fn from(e: toml::de::Error) -> Self {
        PwError::Config(e.to_string())
    }
}
