//! Bounded worker pool that runs event handlers off the reader task.
//!
//! The reader submits each unclaimed frame to a bounded queue. When the
//! queue stays full for longer than the send timeout the frame is
//! dropped and [`PwError::Backpressure`] goes to the error sink, so a
//! slow handler can never stall reply correlation.
//!
//! With one worker, events are handled in arrival order. With several,
//! events for the same object may be handled out of order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Dispatcher;
use crate::error::PwError;
use crate::frame::Frame;

pub struct DispatchPool {
    tx: mpsc::Sender<Frame>,
    send_timeout: Duration,
    dispatcher: Arc<Dispatcher>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl DispatchPool {
    /// Spawn `workers` tasks draining a queue of `capacity` frames.
    ///
    /// Workers stop when `cancel` fires or the pool is dropped.
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        capacity: usize,
        workers: usize,
        send_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Frame>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles: Vec<JoinHandle<()>> = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let dispatcher = dispatcher.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        // the receiver lock is only held while waiting for a frame
                        let next = {
                            let mut rx = rx.lock().await;
                            // queued events are still delivered after cancellation
                            tokio::select! {
                                biased;
                                frame = rx.recv() => frame,
                                _ = cancel.cancelled() => None,
                            }
                        };
                        let Some(frame) = next else { break };
                        dispatcher.deliver(&frame);
                    }
                    tracing::trace!(worker, "dispatch worker stopped");
                })
            })
            .collect();

        Self {
            tx,
            send_timeout,
            dispatcher,
            workers: Mutex::new(handles),
            cancel,
        }
    }

    /// Queue `frame` for the workers.
    ///
    /// Waits up to the send timeout for space. On expiry the frame is
    /// dropped, reported to the error sink, and `Backpressure` returned.
    pub async fn submit(&self, frame: Frame) -> Result<(), PwError> {
        let (object_id, sequence) = (frame.object_id(), frame.sequence());
        match self.tx.send_timeout(frame, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                let err = PwError::Backpressure {
                    object_id,
                    sequence,
                };
                tracing::warn!(object_id, sequence, "dispatch queue full, event dropped");
                self.dispatcher.report(err.clone());
                Err(err)
            }
            Err(SendTimeoutError::Closed(_)) => Err(PwError::ConnectionClosed),
        }
    }

    /// Free slots in the queue.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// Stop the workers and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for DispatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPool")
            .field("available", &self.tx.capacity())
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn workers_run_handlers() {
        let dispatcher = Arc::new(Dispatcher::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        dispatcher.register_handler(1, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let pool = DispatchPool::start(
            dispatcher,
            8,
            2,
            Duration::from_millis(50),
            CancellationToken::new(),
        );
        for seq in 0..5 {
            pool.submit(Frame::new(1, 0, seq, None)).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(2), async {
            while hits.load(Ordering::SeqCst) < 5 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        pool.shutdown().await;
    }

    // the parked handler blocks its thread, so the test needs a second one
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_queue_reports_backpressure() {
        let (sink, mut errors) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new(Some(sink)));
        let gate = Arc::new(std::sync::Barrier::new(2));
        let g = gate.clone();
        // first event parks the only worker until the test releases it
        dispatcher.register_handler(3, move |_| {
            g.wait();
            Ok(())
        });

        let pool = DispatchPool::start(
            dispatcher,
            1,
            1,
            Duration::from_millis(20),
            CancellationToken::new(),
        );
        pool.submit(Frame::new(3, 0, 1, None)).await.unwrap();
        // wait until the worker has taken the first frame
        while pool.available() == 0 {
            tokio::task::yield_now().await;
        }
        pool.submit(Frame::new(3, 0, 2, None)).await.unwrap();
        let err = pool.submit(Frame::new(3, 0, 3, None)).await.unwrap_err();
        assert!(matches!(
            err,
            PwError::Backpressure {
                object_id: 3,
                sequence: 3
            }
        ));
        assert!(matches!(
            errors.try_recv().unwrap(),
            PwError::Backpressure { sequence: 3, .. }
        ));

        // release both queued events
        gate.wait();
        gate.wait();
        pool.shutdown().await;
    }
}
