//! Outstanding requests keyed by sequence number.
//!
//! Each entry owns the sending half of a `oneshot`; whoever removes the
//! entry first (reply, error, timeout, teardown) is the only one that
//! can settle it, which makes resolution at-most-once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::PwError;
use crate::pod::Pod;

/// What a waiting requester eventually receives.
pub type Reply = Result<Option<Pod>, PwError>;

// ── RequestContext ───────────────────────────────────────────────

/// The requester's half of a pending request.
#[derive(Debug)]
pub struct RequestContext {
    sequence: u32,
    created: Instant,
    rx: oneshot::Receiver<Reply>,
}

impl RequestContext {
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// How long this request has been in flight.
    pub fn elapsed(&self) -> Duration {
        self.created.elapsed()
    }
}

// ── PendingRequests ──────────────────────────────────────────────

#[derive(Debug)]
struct Table {
    entries: HashMap<u32, oneshot::Sender<Reply>>,
    next_sequence: u32,
}

/// Pending request table with its own sequence allocator.
#[derive(Debug)]
pub struct PendingRequests {
    table: Mutex<Table>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                entries: HashMap::new(),
                next_sequence: 1,
            }),
        }
    }

    /// Register a request under an explicit `sequence`.
    pub fn create(&self, sequence: u32) -> Result<RequestContext, PwError> {
        let mut table = self.table.lock();
        if table.entries.contains_key(&sequence) {
            return Err(PwError::DuplicateSequence(sequence));
        }
        let (tx, rx) = oneshot::channel();
        table.entries.insert(sequence, tx);
        Ok(RequestContext {
            sequence,
            created: Instant::now(),
            rx,
        })
    }

    /// Register a request under the next free sequence.
    pub fn allocate(&self) -> RequestContext {
        let mut table = self.table.lock();
        let sequence = next_free(&mut table);
        let (tx, rx) = oneshot::channel();
        table.entries.insert(sequence, tx);
        RequestContext {
            sequence,
            created: Instant::now(),
            rx,
        }
    }

    /// A fresh sequence for a frame that expects no reply.
    pub fn next_sequence(&self) -> u32 {
        next_free(&mut self.table.lock())
    }

    /// Complete `sequence` with a value.
    pub fn resolve(&self, sequence: u32, value: Option<Pod>) -> Result<(), PwError> {
        self.settle(sequence, Ok(value))
    }

    /// Complete `sequence` with an error.
    pub fn reject(&self, sequence: u32, err: PwError) -> Result<(), PwError> {
        self.settle(sequence, Err(err))
    }

    /// Reject every pending request with `err`; returns how many there were.
    pub fn reject_all(&self, err: &PwError) -> usize {
        let drained: Vec<_> = self.table.lock().entries.drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(err.clone()));
        }
        count
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.table.lock().entries.contains_key(&sequence)
    }

    pub fn pending_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Wait for the outcome of `ctx`, at most `timeout`.
    ///
    /// On timeout the entry is removed, so a late reply finds nothing to
    /// settle.
    pub async fn wait(&self, mut ctx: RequestContext, timeout: Duration) -> Reply {
        match tokio::time::timeout(timeout, &mut ctx.rx).await {
            Ok(Ok(reply)) => reply,
            // sender dropped without an answer
            Ok(Err(_)) => Err(PwError::ConnectionClosed),
            Err(_) => {
                if self.table.lock().entries.remove(&ctx.sequence).is_some() {
                    tracing::debug!(sequence = ctx.sequence, ?timeout, "request timed out");
                    return Err(PwError::Timeout {
                        sequence: ctx.sequence,
                        timeout,
                    });
                }
                // settled between the deadline and the removal
                ctx.rx.try_recv().unwrap_or(Err(PwError::ConnectionClosed))
            }
        }
    }

    fn settle(&self, sequence: u32, reply: Reply) -> Result<(), PwError> {
        let tx = self
            .table
            .lock()
            .entries
            .remove(&sequence)
            .ok_or(PwError::NotFound(sequence))?;
        if tx.send(reply).is_err() {
            tracing::trace!(sequence, "requester went away before the reply");
        }
        Ok(())
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

/// Advance the counter, skipping 0 and live sequences.
fn next_free(table: &mut Table) -> u32 {
    loop {
        let candidate = table.next_sequence;
        table.next_sequence = table.next_sequence.wrapping_add(1);
        if candidate != 0 && !table.entries.contains_key(&candidate) {
            return candidate;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
