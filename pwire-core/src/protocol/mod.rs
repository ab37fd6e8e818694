//! Core-object protocol: well-known ids and the payloads the engine
//! itself speaks (handshake, sync, ping, error).
//!
//! Everything here is addressed to or emitted by object [`CORE_ID`].
//! Higher-level interfaces (registry, nodes, links) are left to callers,
//! who address them through `Connection::request` with raw [`Pod`]
//! payloads.
//!
//! Method (client → server) and event (server → client) ids live in
//! separate namespaces; both are plain `u32` opcodes on the wire.

use std::fmt;

use crate::error::PwError;
use crate::frame::Frame;
use crate::pod::Pod;

pub mod hello;
pub mod messages;

pub use hello::{HelloInfo, HelloRequest};
pub use messages::{Done, Ping, RemoteError};

/// Object id of the core singleton, present on every connection.
pub const CORE_ID: u32 = 0;

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(3, 0);

// ── ProtocolVersion ──────────────────────────────────────────────

/// A `major.minor` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Peers are compatible when their major versions agree.
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// ── CoreMethod ───────────────────────────────────────────────────

/// Methods a client invokes on the core object.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreMethod {
    /// Start the handshake.
    Hello = 0,
    /// Round-trip barrier, answered by [`CoreEvent::Done`].
    Sync = 3,
    /// Answer to a server [`CoreEvent::Ping`].
    Pong = 5,
    /// Report an error about a server object.
    Error = 6,
}

impl TryFrom<u32> for CoreMethod {
    type Error = PwError;

    fn try_from(value: u32) -> Result<Self, PwError> {
        match value {
            0 => Ok(CoreMethod::Hello),
            3 => Ok(CoreMethod::Sync),
            5 => Ok(CoreMethod::Pong),
            6 => Ok(CoreMethod::Error),
            _ => Err(PwError::Decoding(format!("unknown core method {value}"))),
        }
    }
}

impl fmt::Display for CoreMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreMethod::Hello => write!(f, "hello"),
            CoreMethod::Sync => write!(f, "sync"),
            CoreMethod::Pong => write!(f, "pong"),
            CoreMethod::Error => write!(f, "error"),
        }
    }
}

// ── CoreEvent ────────────────────────────────────────────────────

/// Events the core object emits.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreEvent {
    /// Server info, the reply to `hello`.
    Info = 0,
    /// Completion of a `sync` with the same sequence.
    Done = 3,
    /// Liveness check, must be answered with `pong`.
    Ping = 4,
    /// Failure of the request carrying the same sequence.
    Error = 6,
}

impl CoreEvent {
    /// Classify `frame` as a core event, if it is one we know.
    pub fn of(frame: &Frame) -> Option<CoreEvent> {
        if frame.object_id() != CORE_ID {
            return None;
        }
        CoreEvent::try_from(frame.opcode()).ok()
    }
}

impl TryFrom<u32> for CoreEvent {
    type Error = PwError;

    fn try_from(value: u32) -> Result<Self, PwError> {
        match value {
            0 => Ok(CoreEvent::Info),
            3 => Ok(CoreEvent::Done),
            4 => Ok(CoreEvent::Ping),
            6 => Ok(CoreEvent::Error),
            _ => Err(PwError::Decoding(format!("unknown core event {value}"))),
        }
    }
}

impl fmt::Display for CoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreEvent::Info => write!(f, "info"),
            CoreEvent::Done => write!(f, "done"),
            CoreEvent::Ping => write!(f, "ping"),
            CoreEvent::Error => write!(f, "error"),
        }
    }
}

/// Build a frame invoking `method` on the core object.
pub fn core_request(method: CoreMethod, sequence: u32, payload: Option<Pod>) -> Frame {
    Frame::new(CORE_ID, method as u32, sequence, payload)
}

/// Build a frame carrying core `event` (used by servers and test peers).
pub fn core_event(event: CoreEvent, sequence: u32, payload: Option<Pod>) -> Frame {
    Frame::new(CORE_ID, event as u32, sequence, payload)
}

/// Read field `index` of a struct payload as an `Int`.
pub(crate) fn int_field(fields: &[Pod], index: usize, what: &str) -> Result<i32, PwError> {
    fields
        .get(index)
        .and_then(Pod::as_int)
        .ok_or_else(|| PwError::Decoding(format!("{what}: field {index} is not an Int")))
}

/// Read field `index` of a struct payload as a `String`.
pub(crate) fn str_field<'a>(fields: &'a [Pod], index: usize, what: &str) -> Result<&'a str, PwError> {
    fields
        .get(index)
        .and_then(Pod::as_str)
        .ok_or_else(|| PwError::Decoding(format!("{what}: field {index} is not a String")))
}

/// Unwrap a payload that must be a struct.
pub(crate) fn struct_payload<'a>(payload: Option<&'a Pod>, what: &str) -> Result<&'a [Pod], PwError> {
    payload
        .and_then(Pod::as_struct)
        .ok_or_else(|| PwError::Decoding(format!("{what}: payload is not a Struct")))
}

// ── Tests ────────────────────────────────────────────────────────
