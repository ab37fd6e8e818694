//! Event dispatch and request correlation.
//!
//! Every inbound frame is first offered to the pending request table:
//! a frame whose sequence belongs to one of our requests settles that
//! request and goes no further. Everything else is an event and is fanned
//! out to the handlers registered for its object id.
//!
//! Core `ping` events are never treated as replies, since the server
//! picks their sequence on its own.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::PwError;
use crate::frame::Frame;
use crate::pod::Pod;
use crate::protocol::{CoreEvent, RemoteError};

pub mod handlers;
pub mod pending;
pub mod pool;

pub use handlers::{Handler, HandlerRegistry};
pub use pending::{PendingRequests, Reply, RequestContext};
pub use pool::DispatchPool;

/// Receives errors nobody is waiting for (handler failures, drops).
pub type ErrorSink = mpsc::UnboundedSender<PwError>;

/// Owns the pending and handler tables of one connection.
///
/// The two tables are locked independently and neither lock is held
/// while a handler runs.
#[derive(Debug, Default)]
pub struct Dispatcher {
    pending: PendingRequests,
    handlers: HandlerRegistry,
    error_sink: Option<ErrorSink>,
}

impl Dispatcher {
    pub fn new(error_sink: Option<ErrorSink>) -> Self {
        Self {
            pending: PendingRequests::new(),
            handlers: HandlerRegistry::new(),
            error_sink,
        }
    }

    // ── Requests ─────────────────────────────────────────────────

    pub fn create_pending_request(&self, sequence: u32) -> Result<RequestContext, PwError> {
        self.pending.create(sequence)
    }

    /// Create a pending request under a freshly allocated sequence.
    pub fn allocate_request(&self) -> RequestContext {
        self.pending.allocate()
    }

    /// A sequence for a frame that expects no reply.
    pub fn next_sequence(&self) -> u32 {
        self.pending.next_sequence()
    }

    pub fn resolve(&self, sequence: u32, value: Option<Pod>) -> Result<(), PwError> {
        self.pending.resolve(sequence, value)
    }

    pub fn reject(&self, sequence: u32, err: PwError) -> Result<(), PwError> {
        self.pending.reject(sequence, err)
    }

    pub fn reject_all(&self, err: &PwError) -> usize {
        self.pending.reject_all(err)
    }

    pub async fn wait_for_request(&self, ctx: RequestContext, timeout: Duration) -> Reply {
        self.pending.wait(ctx, timeout).await
    }

    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    // ── Handlers ─────────────────────────────────────────────────

    pub fn register_handler<F>(&self, object_id: u32, handler: F)
    where
        F: Fn(&Frame) -> Result<(), PwError> + Send + Sync + 'static,
    {
        self.handlers.register(object_id, handler);
    }

    pub fn unregister_handler(&self, object_id: u32) -> usize {
        self.handlers.unregister(object_id)
    }

    pub fn handler_count(&self, object_id: u32) -> usize {
        self.handlers.handler_count(object_id)
    }

    // ── Routing ──────────────────────────────────────────────────

    /// Settle the pending request `frame` answers, if any.
    ///
    /// Returns the frame back when it is an event rather than a reply.
    pub fn claim_reply(&self, frame: Frame) -> Option<Frame> {
        let sequence = frame.sequence();
        let event = CoreEvent::of(&frame);
        if event == Some(CoreEvent::Ping) || !self.pending.contains(sequence) {
            return Some(frame);
        }

        let outcome = match event {
            Some(CoreEvent::Error) => {
                let remote = RemoteError::from_pod(frame.payload());
                tracing::debug!(sequence, code = remote.code, message = %remote.message, "request failed remotely");
                self.pending.reject(sequence, remote.into_error(sequence))
            }
            _ => self.pending.resolve(sequence, frame.into_payload()),
        };
        // a timeout may have removed the entry since `contains`
        if let Err(e) = outcome {
            tracing::trace!(sequence, error = %e, "reply arrived after its request ended");
        }
        None
    }

    /// Run every handler registered for `frame.object_id()`.
    ///
    /// A failing handler is reported and the remaining ones still run.
    /// Returns the number of handlers invoked.
    pub fn deliver(&self, frame: &Frame) -> usize {
        let object_id = frame.object_id();
        let handlers = self.handlers.snapshot(object_id);
        if handlers.is_empty() {
            tracing::trace!(%frame, "no handler for event");
            return 0;
        }
        for handler in &handlers {
            if let Err(e) = handler(frame) {
                self.report(PwError::Handler {
                    object_id,
                    message: e.to_string(),
                });
            }
        }
        handlers.len()
    }

    /// Route one inbound frame inline: reply correlation first, then
    /// handler fan-out.
    pub fn dispatch(&self, frame: Frame) {
        if let Some(event) = self.claim_reply(frame) {
            self.deliver(&event);
        }
    }

    /// Hand an error to the sink, or log it when there is none.
    pub fn report(&self, err: PwError) {
        match &self.error_sink {
            Some(sink) => {
                if let Err(mpsc::error::SendError(err)) = sink.send(err) {
                    tracing::warn!(error = %err, "error sink closed");
                }
            }
            None => tracing::warn!(error = %err, "unhandled dispatch error"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
