//! Stream reassembly: turns arbitrary socket reads back into frames.
//!
//! ## Stream format
//!
//! ```text
//! length:  u32  (4)   byte count of the frame that follows (>= 12)
//! frame:   [u8]       header + optional POD payload, see `frame`
//! ```
//!
//! The length prefix is what makes payload-less frames delimitable:
//! without it, the header of the next frame would be indistinguishable
//! from a POD payload.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::PwError;
use crate::frame::{Frame, HEADER_SIZE};

/// Size of the per-frame length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default cap on buffered, not yet extracted bytes (1 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Default cap on a single frame (header + payload).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024;

/// Append `frame` to `dst` with its length prefix.
pub fn write_frame(frame: &Frame, dst: &mut BytesMut) -> Result<(), PwError> {
    put_prefixed(&frame.marshal()?, dst)
}

/// Append already marshaled frame bytes with their length prefix.
pub(crate) fn put_prefixed(bytes: &[u8], dst: &mut BytesMut) -> Result<(), PwError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| PwError::Encoding(format!("frame of {} bytes", bytes.len())))?;
    dst.reserve(LENGTH_PREFIX_SIZE + bytes.len());
    dst.put_u32_le(len);
    dst.put_slice(bytes);
    Ok(())
}

/// Split one complete frame off the front of `src`.
///
/// `Ok(None)` means more bytes are needed; nothing is consumed in that
/// case. Errors leave `src` in an unspecified state: the stream is no
/// longer trustworthy.
pub(crate) fn extract_frame(
    src: &mut BytesMut,
    max_frame_size: usize,
) -> Result<Option<Frame>, PwError> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }
    let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len < HEADER_SIZE {
        return Err(PwError::FrameTooShort {
            expected: HEADER_SIZE,
            actual: len,
        });
    }
    if len > max_frame_size {
        return Err(PwError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }
    if src.len() < LENGTH_PREFIX_SIZE + len {
        src.reserve(LENGTH_PREFIX_SIZE + len - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    let bytes = src.split_to(len);
    Frame::unmarshal(&bytes).map(Some)
}

// ── StreamBuffer ─────────────────────────────────────────────────

/// Bounded FIFO of raw transport bytes, owned by the connection reader.
#[derive(Debug)]
pub struct StreamBuffer {
    buf: BytesMut,
    max_size: usize,
    max_frame_size: usize,
}

impl StreamBuffer {
    /// Create a buffer holding at most `max_size` unconsumed bytes.
    pub fn new(max_size: usize) -> Self {
        Self::with_limits(max_size, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a buffer with explicit byte and frame caps.
    ///
    /// The frame cap is clamped so that a maximal frame always fits.
    pub fn with_limits(max_size: usize, max_frame_size: usize) -> Self {
        let max_size = max_size.max(LENGTH_PREFIX_SIZE + HEADER_SIZE);
        Self {
            buf: BytesMut::with_capacity(max_size.min(64 * 1024)),
            max_size,
            max_frame_size: max_frame_size.min(max_size - LENGTH_PREFIX_SIZE),
        }
    }

    /// Queue bytes read from the transport.
    ///
    /// Fails with [`PwError::BufferOverflow`] if the cap would be
    /// exceeded; the buffer is left unchanged.
    pub fn append(&mut self, data: &[u8]) -> Result<(), PwError> {
        if self.buf.len() + data.len() > self.max_size {
            return Err(PwError::BufferOverflow {
                buffered: self.buf.len(),
                incoming: data.len(),
                max: self.max_size,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Extract the oldest complete frame, if one is buffered.
    pub fn try_extract_frame(&mut self) -> Result<Option<Frame>, PwError> {
        extract_frame(&mut self.buf, self.max_frame_size)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity_limit(&self) -> usize {
        self.max_size
    }

    /// Bytes that can still be appended before the cap is hit.
    pub fn remaining(&self) -> usize {
        self.max_size.saturating_sub(self.buf.len())
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }
}

// ── Tests ────────────────────────────────────────────────────────
