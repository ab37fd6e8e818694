//! Message framing: a fixed header followed by an optional POD payload.
//!
//! ## Wire format
//!
//! ```text
//! object_id:  u32  (4)   target (requests) or source (events) object
//! opcode:     u32  (4)   method id (requests) or event id (events)
//! sequence:   u32  (4)   correlation number
//! payload:    POD        optional, absent = no trailing bytes
//! ```
//!
//! On the socket every frame is additionally preceded by a `u32` LE
//! length (see [`crate::buffer`]). The frame itself carries no
//! request/response marker; which frames answer our requests is
//! decided by the connection from its own pending sequences.

use std::fmt;

use crate::error::PwError;
use crate::pod::{self, Pod};

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 12;

// ── FrameHeader ──────────────────────────────────────────────────

/// The routing part of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    pub object_id: u32,
    pub opcode: u32,
    pub sequence: u32,
}

impl FrameHeader {
    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.object_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.opcode.to_le_bytes());
        buf[8..12].copy_from_slice(&self.sequence.to_le_bytes());
        buf
    }

    /// Deserialize from the first [`HEADER_SIZE`] bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, PwError> {
        let header: &[u8; HEADER_SIZE] = data
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or(PwError::FrameTooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            })?;
        let word = |i: usize| u32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);
        Ok(Self {
            object_id: word(0),
            opcode: word(4),
            sequence: word(8),
        })
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    header: FrameHeader,
    payload: Option<Pod>,
}

impl Frame {
    /// Build a frame addressed to `object_id`.
    pub fn new(object_id: u32, opcode: u32, sequence: u32, payload: Option<Pod>) -> Self {
        Self {
            header: FrameHeader {
                object_id,
                opcode,
                sequence,
            },
            payload,
        }
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn object_id(&self) -> u32 {
        self.header.object_id
    }

    pub fn opcode(&self) -> u32 {
        self.header.opcode
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn payload(&self) -> Option<&Pod> {
        self.payload.as_ref()
    }

    pub fn into_payload(self) -> Option<Pod> {
        self.payload
    }

    /// Serialize header and payload (without the stream length prefix).
    pub fn marshal(&self) -> Result<Vec<u8>, PwError> {
        let mut out = self.header.encode().to_vec();
        if let Some(payload) = &self.payload {
            out.extend_from_slice(&pod::encode(payload)?);
        }
        Ok(out)
    }

    /// Parse a frame occupying all of `bytes`.
    ///
    /// Anything after the header must be exactly one POD.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, PwError> {
        let header = FrameHeader::decode(bytes)?;
        let rest = &bytes[HEADER_SIZE..];
        let payload = if rest.is_empty() {
            None
        } else {
            let pod = Pod::from_bytes(rest).map_err(|e| match e {
                PwError::Decoding(msg) => PwError::FramePayload(msg),
                other => other,
            })?;
            Some(pod)
        };
        Ok(Self { header, payload })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame(obj={}, op={}, seq={}",
            self.header.object_id, self.header.opcode, self.header.sequence
        )?;
        match &self.payload {
            Some(p) => write!(f, ", {p})"),
            None => write!(f, ")"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
