//! The per-connection reader task.
//!
//! Reads raw bytes into a [`StreamBuffer`], extracts frames in order
//! and routes each one: core pings are answered, replies settle their
//! pending request, everything else goes to the dispatch pool.
//!
//! Any read error, EOF, buffer overflow or undecodable frame ends the
//! task and fails the connection; there is no resynchronisation.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use super::connection::Shared;
use crate::buffer::StreamBuffer;
use crate::dispatch::DispatchPool;
use crate::error::PwError;
use crate::frame::Frame;
use crate::protocol::{CoreEvent, CoreMethod, Ping, core_request};

const READ_CHUNK: usize = 16 * 1024;

pub(crate) struct Reader {
    pub(crate) shared: Arc<Shared>,
    pub(crate) pool: Arc<DispatchPool>,
    pub(crate) outbound: mpsc::Sender<Frame>,
    pub(crate) buffer: StreamBuffer,
    pub(crate) read_timeout: Duration,
}

impl Reader {
    /// Run until cancellation or the first fatal error.
    pub(crate) async fn run<R>(mut self, mut io: R)
    where
        R: AsyncRead + Unpin,
    {
        let cancel = self.shared.cancel.clone();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            // never read more than the buffer can take
            let room = self.buffer.remaining().min(READ_CHUNK);
            if room == 0 {
                self.shared.fail(&PwError::BufferOverflow {
                    buffered: self.buffer.len(),
                    incoming: 0,
                    max: self.buffer.capacity_limit(),
                });
                break;
            }
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = tokio::time::timeout(self.read_timeout, io.read(&mut chunk[..room])) => read,
            };
            let n = match read {
                // nothing arrived within read_timeout; look at the token again
                Err(_) => continue,
                Ok(Ok(0)) => {
                    tracing::debug!("server closed the connection");
                    self.shared.fail(&PwError::ConnectionClosed);
                    break;
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    self.shared.fail(&PwError::from(e));
                    break;
                }
            };
            tracing::trace!(bytes = n, "read");

            if let Err(e) = self.drain(&chunk[..n]).await {
                self.shared.fail(&e);
                break;
            }
        }
        tracing::trace!("reader stopped");
    }

    /// Buffer `data` and route every complete frame.
    async fn drain(&mut self, data: &[u8]) -> Result<(), PwError> {
        self.buffer.append(data)?;
        while let Some(frame) = self.buffer.try_extract_frame()? {
            self.route(frame).await;
        }
        Ok(())
    }

    async fn route(&self, frame: Frame) {
        tracing::trace!(%frame, "received");
        if CoreEvent::of(&frame) == Some(CoreEvent::Ping) {
            self.answer_ping(&frame).await;
        }
        if let Some(event) = self.shared.dispatcher.claim_reply(frame) {
            // drops are reported by the pool itself
            let _ = self.pool.submit(event).await;
        }
    }

    async fn answer_ping(&self, frame: &Frame) {
        match Ping::from_pod(frame.payload()) {
            Ok(ping) => {
                let pong = core_request(CoreMethod::Pong, frame.sequence(), Some(ping.pong()));
                if self.outbound.send(pong).await.is_err() {
                    tracing::debug!("writer gone, pong not sent");
                }
            }
            Err(e) => self.shared.dispatcher.report(e),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::write_frame;
    use crate::dispatch::Dispatcher;
    use crate::pod::Pod;
    use crate::protocol::core_event;
    use crate::state::ConnectionState;
    use bytes::BytesMut;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    fn wire(frames: &[Frame]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for f in frames {
            write_frame(f, &mut out).unwrap();
        }
        out.to_vec()
    }

    fn reader(dispatcher: Arc<Dispatcher>) -> (Reader, mpsc::Receiver<Frame>) {
        let shared = Arc::new(Shared::new(dispatcher.clone(), CancellationToken::new()));
        shared.transition(ConnectionState::Connected).unwrap();
        let pool = Arc::new(DispatchPool::start(
            dispatcher,
            16,
            1,
            Duration::from_millis(50),
            shared.cancel.child_token(),
        ));
        let (outbound, rx) = mpsc::channel(8);
        let reader = Reader {
            shared,
            pool,
            outbound,
            buffer: StreamBuffer::default(),
            read_timeout: Duration::from_millis(50),
        };
        (reader, rx)
    }

    #[tokio::test]
    async fn split_reads_then_eof() {
        let dispatcher = Arc::new(Dispatcher::default());
        let reply_ctx = dispatcher.create_pending_request(1).unwrap();
        let orphan_ctx = dispatcher.create_pending_request(2).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        dispatcher.register_handler(5, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let bytes = wire(&[
            Frame::new(0, 3, 1, Some(Pod::Int(10))),
            Frame::new(5, 1, 77, None),
        ]);
        // split in the middle of the first header
        let io = tokio_test::io::Builder::new()
            .read(&bytes[..7])
            .read(&bytes[7..])
            .build();

        let (reader, _out) = reader(dispatcher.clone());
        let shared = reader.shared.clone();
        reader.run(io).await;

        let t = Duration::from_secs(1);
        assert_eq!(
            dispatcher.wait_for_request(reply_ctx, t).await.unwrap(),
            Some(Pod::Int(10))
        );
        // EOF rejected what was still in flight
        assert!(matches!(
            dispatcher.wait_for_request(orphan_ctx, t).await,
            Err(PwError::ConnectionClosed)
        ));
        assert_eq!(shared.state(), ConnectionState::Error);

        tokio::time::timeout(t, async {
            while hits.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn back_to_back_frames_fit_a_tight_buffer() {
        let dispatcher = Arc::new(Dispatcher::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        dispatcher.register_handler(5, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // three 32-byte frames in a single read, buffer capped at 68
        let frames: Vec<Frame> = (1..=3)
            .map(|seq| Frame::new(5, 1, seq, Some(Pod::Long(i64::from(seq)))))
            .collect();
        let bytes = wire(&frames);
        assert_eq!(bytes.len(), 96);
        let io = tokio_test::io::Builder::new().read(&bytes).build();

        let (mut reader, _out) = reader(dispatcher);
        reader.buffer = StreamBuffer::with_limits(68, 64);
        let shared = reader.shared.clone();
        reader.run(io).await;

        // only the EOF ended the connection
        let last_error = shared.last_error().unwrap();
        assert!(!last_error.contains("overflow"), "{last_error}");
        tokio::time::timeout(Duration::from_secs(1), async {
            while hits.load(Ordering::SeqCst) < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let dispatcher = Arc::new(Dispatcher::default());
        let bytes = wire(&[core_event(CoreEvent::Ping, 40, Some(Ping { id: 6 }.to_pod()))]);
        let io = tokio_test::io::Builder::new().read(&bytes).build();

        let (reader, mut out) = reader(dispatcher);
        reader.run(io).await;

        let pong = out.try_recv().unwrap();
        assert_eq!(pong.object_id(), 0);
        assert_eq!(pong.opcode(), CoreMethod::Pong as u32);
        assert_eq!(pong.sequence(), 40);
        assert_eq!(pong.payload(), Some(&Pod::Struct(vec![Pod::Int(6)])));
    }

    #[tokio::test]
    async fn garbage_fails_the_connection() {
        let dispatcher = Arc::new(Dispatcher::default());
        let ctx = dispatcher.create_pending_request(1).unwrap();
        // length prefix below the header size
        let io = tokio_test::io::Builder::new()
            .read(&3u32.to_le_bytes())
            .build();

        let (reader, _out) = reader(dispatcher.clone());
        let shared = reader.shared.clone();
        reader.run(io).await;

        assert_eq!(shared.state(), ConnectionState::Error);
        assert!(matches!(
            dispatcher.wait_for_request(ctx, Duration::from_secs(1)).await,
            Err(PwError::FrameTooShort { .. })
        ));
        assert!(shared.last_error().unwrap().contains("frame too short"));
    }
}
