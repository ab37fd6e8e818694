//! Connection handshake state machine.
//!
//! Provides a `ConnectionState` enum modelling the lifecycle of one
//! protocol connection, and `ProtocolState` which guards transitions
//! and remembers what the handshake negotiated. Transitions return
//! `Result` instead of panicking.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::PwError;
use crate::protocol::{HelloInfo, ProtocolVersion};

// ── ConnectionState ──────────────────────────────────────────────

/// The current phase of a connection.
///
/// ```text
///  Disconnected ──► Connected ──► HelloSent ──► HelloReceived ──► Ready
///       ▲                                                          │
///       ├──────────────────────────────────────────────────────────┘
///       │
///       └──────── Error ◄──── (any state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No socket. Initial state.
    #[default]
    Disconnected,

    /// Socket is open, nothing sent yet.
    Connected,

    /// Hello went out, waiting for the server info.
    HelloSent,

    /// Server info arrived, waiting for the initial sync to finish.
    HelloReceived,

    /// Handshake complete; requests may flow.
    Ready,

    /// Something failed; only `reset` leads out.
    Error,
}

impl ConnectionState {
    /// Whether `self → to` is in the legality table.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connected)
                | (Connected, HelloSent)
                | (HelloSent, HelloReceived)
                | (HelloReceived, Ready)
                | (Ready, Disconnected)
                | (Error, Disconnected)
                | (_, Error)
        )
    }

    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }

    /// `true` while the handshake is still running.
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::HelloSent | ConnectionState::HelloReceived
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
            Self::HelloSent => write!(f, "HelloSent"),
            Self::HelloReceived => write!(f, "HelloReceived"),
            Self::Ready => write!(f, "Ready"),
            Self::Error => write!(f, "Error"),
        }
    }
}

// ── ProtocolState ────────────────────────────────────────────────

/// Guarded connection state plus what the handshake negotiated.
#[derive(Debug)]
pub struct ProtocolState {
    state: ConnectionState,
    since: Instant,
    version: Option<ProtocolVersion>,
    capabilities: BTreeSet<String>,
    last_error: Option<String>,
}

impl ProtocolState {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            since: Instant::now(),
            version: None,
            capabilities: BTreeSet::new(),
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// How long the current state has been active.
    pub fn time_in_state(&self) -> Duration {
        self.since.elapsed()
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Move to `to` if the table allows it.
    ///
    /// On failure the state is left unchanged.
    pub fn transition_to(&mut self, to: ConnectionState) -> Result<(), PwError> {
        if !self.state.can_transition_to(to) {
            return Err(PwError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::trace!(from = %self.state, %to, "state transition");
        self.state = to;
        self.since = Instant::now();
        Ok(())
    }

    /// Enter `Error` and remember why. Legal from every state.
    pub fn set_error(&mut self, err: &PwError) {
        self.last_error = Some(err.to_string());
        if self.state != ConnectionState::Error {
            tracing::debug!(from = %self.state, error = %err, "connection entered error state");
            self.state = ConnectionState::Error;
            self.since = Instant::now();
        }
    }

    /// Force back to `Disconnected`, forgetting negotiated data.
    ///
    /// `last_error` survives so a failed connection can still be
    /// diagnosed after the reset.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.since = Instant::now();
        self.version = None;
        self.capabilities.clear();
    }

    // ── Negotiated data ──────────────────────────────────────────

    /// Store what the server announced in its hello reply.
    pub fn record_hello(&mut self, info: &HelloInfo) {
        self.version = Some(info.version);
        self.capabilities = info.capabilities.iter().cloned().collect();
    }

    /// Negotiated protocol version, once hello was answered.
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.capabilities.iter().map(String::as_str)
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl Default for ProtocolState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
