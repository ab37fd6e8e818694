//! `tokio_util` codec for length-prefixed frames.
//!
//! Shares its wire discipline with [`StreamBuffer`](crate::buffer::StreamBuffer):
//! the connection writer drives it through `FramedWrite`, and peers
//! (servers, test doubles) can read with `Framed`/`FramedRead`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::buffer::{DEFAULT_MAX_FRAME_SIZE, extract_frame, put_prefixed};
use crate::error::PwError;
use crate::frame::Frame;

#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = PwError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        extract_frame(src, self.max_frame_size)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = PwError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.marshal()?;
        if bytes.len() > self.max_frame_size {
            return Err(PwError::FrameTooLarge {
                size: bytes.len(),
                max: self.max_frame_size,
            });
        }
        put_prefixed(&bytes, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::Pod;

    #[test]
    fn encode_then_decode() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let frame = Frame::new(3, 1, 11, Some(Pod::from("hi")));
        codec.encode(frame.clone(), &mut buf).unwrap();
        // prefix + header + 16-byte string pod
        assert_eq!(buf.len(), 4 + 12 + 16);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_input_waits() {
        let mut codec = FrameCodec::default();
        let mut full = BytesMut::new();
        codec
            .encode(Frame::new(0, 2, 5, None), &mut full)
            .unwrap();

        let mut partial = BytesMut::from(&full[..10]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 10);
    }

    #[test]
    fn encoder_enforces_frame_cap() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::new();
        let frame = Frame::new(0, 0, 1, Some(Pod::Bytes(vec![0; 64])));
        assert!(matches!(
            codec.encode(frame, &mut buf),
            Err(PwError::FrameTooLarge { .. })
        ));
        assert!(buf.is_empty());
    }
}
