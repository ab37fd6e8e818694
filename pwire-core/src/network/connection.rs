use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use parking_lot::Mutex;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use super::reader::Reader;
use crate::buffer::StreamBuffer;
use crate::codec::FrameCodec;
use crate::config::ClientConfig;
use crate::dispatch::{DispatchPool, Dispatcher, ErrorSink, RequestContext};
use crate::error::PwError;
use crate::frame::Frame;
use crate::pod::Pod;
use crate::protocol::{
    CoreMethod, Done, HelloInfo, HelloRequest, PROTOCOL_VERSION, ProtocolVersion, core_request,
};
use crate::state::{ConnectionState, ProtocolState};

/// Frames that may wait for the writer.
const OUTBOUND_QUEUE: usize = 64;

// ── Shared ───────────────────────────────────────────────────────

/// State reachable from the connection handle and its tasks.
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<ProtocolState>,
    state_tx: watch::Sender<ConnectionState>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) cancel: CancellationToken,
}

impl Shared {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, cancel: CancellationToken) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state: Mutex::new(ProtocolState::new()),
            state_tx,
            dispatcher,
            cancel,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.lock().state()
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.state.lock().last_error().map(str::to_string)
    }

    pub(crate) fn transition(&self, to: ConnectionState) -> Result<(), PwError> {
        let mut state = self.state.lock();
        state.transition_to(to)?;
        self.state_tx.send_replace(to);
        Ok(())
    }

    /// Tear the connection down after `err`: state `Error`, every
    /// pending request rejected, tasks cancelled.
    ///
    /// After a local `close` only the rejection happens.
    pub(crate) fn fail(&self, err: &PwError) {
        {
            // `close` cancels under this lock
            let mut state = self.state.lock();
            if !self.cancel.is_cancelled() {
                state.set_error(err);
                self.state_tx.send_replace(ConnectionState::Error);
                tracing::warn!(error = %err, "connection failed");
            }
        }
        let rejected = self.dispatcher.reject_all(err);
        if rejected > 0 {
            tracing::debug!(rejected, "pending requests rejected");
        }
        self.cancel.cancel();
    }
}

// ── Connection ───────────────────────────────────────────────────

/// A client connection to the server socket.
///
/// Owns one reader task, one writer task and the dispatch workers.
/// Requests may be issued concurrently from any number of tasks.
pub struct Connection {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Frame>,
    pool: Arc<DispatchPool>,
    config: ClientConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Connect to `path` with default settings and run the handshake.
    pub async fn connect(path: impl AsRef<std::path::Path>) -> Result<Self, PwError> {
        Self::connect_with_config(ClientConfig::default().with_socket_path(path)).await
    }

    /// Connect as described by `config` and run the handshake.
    pub async fn connect_with_config(config: ClientConfig) -> Result<Self, PwError> {
        let conn = Self::open(config, None).await?;
        conn.handshake().await?;
        Ok(conn)
    }

    /// Open the socket and start the I/O tasks without handshaking.
    ///
    /// Errors nobody waits for (handler failures, dropped events) go to
    /// `error_sink` when one is given, and to the log otherwise.
    pub async fn open(config: ClientConfig, error_sink: Option<ErrorSink>) -> Result<Self, PwError> {
        config.validate()?;
        let path = config.socket_path();
        tracing::debug!(path = %path.display(), "connecting");
        let stream = UnixStream::connect(&path).await?;
        Self::from_stream(stream, config, error_sink)
    }

    /// Wrap an already connected socket and start the I/O tasks.
    pub fn from_stream(
        stream: UnixStream,
        config: ClientConfig,
        error_sink: Option<ErrorSink>,
    ) -> Result<Self, PwError> {
        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::new(error_sink));
        let shared = Arc::new(Shared::new(dispatcher.clone(), cancel.clone()));
        shared.transition(ConnectionState::Connected)?;

        let pool = Arc::new(DispatchPool::start(
            dispatcher,
            config.dispatch.queue_capacity,
            config.dispatch.workers,
            config.dispatch_send_timeout(),
            cancel.child_token(),
        ));

        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);

        let writer = tokio::spawn(write_loop(
            write_half,
            outbound_rx,
            shared.clone(),
            config.limits.max_frame_size,
        ));
        let reader = Reader {
            shared: shared.clone(),
            pool: pool.clone(),
            outbound: outbound.clone(),
            buffer: StreamBuffer::with_limits(
                config.limits.max_buffer_size,
                config.limits.max_frame_size,
            ),
            read_timeout: config.read_timeout(),
        };
        let reader = tokio::spawn(reader.run(read_half));

        Ok(Self {
            shared,
            outbound,
            pool,
            config,
            tasks: Mutex::new(vec![reader, writer]),
        })
    }

    // ── Handshake ────────────────────────────────────────────────

    /// Run hello and the initial sync. Each step gets the configured
    /// handshake timeout. Any failure leaves the connection in `Error`.
    pub async fn handshake(&self) -> Result<(), PwError> {
        let result = self.run_handshake().await;
        if let Err(e) = &result {
            self.shared.fail(e);
        }
        result
    }

    async fn run_handshake(&self) -> Result<(), PwError> {
        let step_timeout = self.config.handshake_timeout();

        let hello = HelloRequest::new(PROTOCOL_VERSION, self.config.connection.client_name.clone());
        let ctx = self.shared.dispatcher.allocate_request();
        let frame = core_request(CoreMethod::Hello, ctx.sequence(), Some(hello.to_pod()?));
        self.shared.transition(ConnectionState::HelloSent)?;
        let reply = self.step("hello", ctx, frame, step_timeout).await?;

        let info = HelloInfo::from_pod(reply.as_ref())?;
        if !PROTOCOL_VERSION.is_compatible_with(&info.version) {
            return Err(PwError::UnsupportedVersion {
                major: info.version.major,
                minor: info.version.minor,
            });
        }
        self.shared.state.lock().record_hello(&info);
        self.shared.transition(ConnectionState::HelloReceived)?;

        let (ctx, frame) = self.sync_frame();
        self.step("sync", ctx, frame, step_timeout).await?;
        self.shared.transition(ConnectionState::Ready)?;

        tracing::info!(
            version = %info.version,
            capabilities = info.capabilities.len(),
            "connection ready"
        );
        Ok(())
    }

    async fn step(
        &self,
        step: &'static str,
        ctx: RequestContext,
        frame: Frame,
        timeout: Duration,
    ) -> Result<Option<Pod>, PwError> {
        match self.round_trip(ctx, frame, timeout).await {
            Err(PwError::Timeout { .. }) => Err(PwError::HandshakeTimeout {
                step,
                elapsed: timeout,
            }),
            other => other,
        }
    }

    // ── Requests ─────────────────────────────────────────────────

    /// Invoke `method_id` on `object_id` and wait for the reply, using
    /// the configured request timeout.
    pub async fn request(
        &self,
        object_id: u32,
        method_id: u32,
        payload: Option<Pod>,
    ) -> Result<Option<Pod>, PwError> {
        self.request_with_timeout(object_id, method_id, payload, self.config.request_timeout())
            .await
    }

    pub async fn request_with_timeout(
        &self,
        object_id: u32,
        method_id: u32,
        payload: Option<Pod>,
        timeout: Duration,
    ) -> Result<Option<Pod>, PwError> {
        self.ensure_open()?;
        let ctx = self.shared.dispatcher.allocate_request();
        let frame = Frame::new(object_id, method_id, ctx.sequence(), payload);
        self.round_trip(ctx, frame, timeout).await
    }

    /// Send a method call that has no reply.
    pub async fn notify(
        &self,
        object_id: u32,
        method_id: u32,
        payload: Option<Pod>,
    ) -> Result<(), PwError> {
        self.ensure_open()?;
        let sequence = self.shared.dispatcher.next_sequence();
        self.outbound
            .send(Frame::new(object_id, method_id, sequence, payload))
            .await?;
        Ok(())
    }

    /// Wait until the server has processed everything sent so far.
    pub async fn sync(&self) -> Result<(), PwError> {
        self.ensure_open()?;
        let (ctx, frame) = self.sync_frame();
        self.round_trip(ctx, frame, self.config.request_timeout())
            .await
            .map(|_| ())
    }

    fn sync_frame(&self) -> (RequestContext, Frame) {
        let ctx = self.shared.dispatcher.allocate_request();
        let done = Done::for_sequence(ctx.sequence());
        let frame = core_request(CoreMethod::Sync, ctx.sequence(), Some(done.to_pod()));
        (ctx, frame)
    }

    async fn round_trip(
        &self,
        ctx: RequestContext,
        frame: Frame,
        timeout: Duration,
    ) -> Result<Option<Pod>, PwError> {
        let sequence = ctx.sequence();
        tracing::trace!(%frame, "sending");
        if self.outbound.send(frame).await.is_err() {
            let _ = self.shared.dispatcher.reject(sequence, PwError::ConnectionClosed);
            return Err(PwError::ConnectionClosed);
        }
        self.shared.dispatcher.wait_for_request(ctx, timeout).await
    }

    fn ensure_open(&self) -> Result<(), PwError> {
        match self.shared.state() {
            ConnectionState::Disconnected | ConnectionState::Error => Err(PwError::ConnectionClosed),
            _ => Ok(()),
        }
    }

    // ── Handlers ─────────────────────────────────────────────────

    /// Call `handler` for every event addressed to `object_id`.
    pub fn register_handler<F>(&self, object_id: u32, handler: F)
    where
        F: Fn(&Frame) -> Result<(), PwError> + Send + Sync + 'static,
    {
        self.shared.dispatcher.register_handler(object_id, handler);
    }

    /// Drop every handler of `object_id`; returns how many were removed.
    pub fn unregister_handler(&self, object_id: u32) -> usize {
        self.shared.dispatcher.unregister_handler(object_id)
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch state changes. The receiver starts at the current state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.shared.state.lock().version()
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.shared.state.lock().has_capability(name)
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.shared
            .state
            .lock()
            .capabilities()
            .map(str::to_string)
            .collect()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.dispatcher.pending_count()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ── Shutdown ─────────────────────────────────────────────────

    /// Close the connection and wait for its tasks.
    ///
    /// Pending requests fail with `ConnectionClosed`. Safe to call
    /// more than once.
    pub async fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            self.shared.cancel.cancel();
            let from = state.state();
            if from != ConnectionState::Disconnected {
                // an unfinished handshake is abandoned through Error
                if from.is_handshaking() {
                    state.set_error(&PwError::ConnectionClosed);
                }
                if let Err(e) = state.transition_to(ConnectionState::Disconnected) {
                    tracing::warn!(error = %e, "close left the state unchanged");
                }
            }
            self.shared.state_tx.send_replace(state.state());
        }
        self.shared.dispatcher.reject_all(&PwError::ConnectionClosed);

        self.pool.shutdown().await;
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        tracing::debug!("connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

// ── Writer ───────────────────────────────────────────────────────

/// Drain the outbound queue into the socket, one whole frame at a time.
async fn write_loop(
    write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Frame>,
    shared: Arc<Shared>,
    max_frame_size: usize,
) {
    let mut sink = FramedWrite::new(write_half, FrameCodec::new(max_frame_size));
    loop {
        let frame = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let sequence = frame.sequence();
        match sink.send(frame).await {
            Ok(()) => {}
            Err(PwError::Io(e)) => {
                shared.fail(&PwError::Io(e));
                break;
            }
            // nothing reached the socket; only this request fails
            Err(e) => {
                tracing::warn!(sequence, error = %e, "frame not sent");
                let _ = shared.dispatcher.reject(sequence, e);
            }
        }
    }
    let _ = sink.close().await;
    tracing::trace!("writer stopped");
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CoreEvent, core_event};
    use futures::StreamExt;
    use tokio_util::codec::Framed;

    fn config() -> ClientConfig {
        let mut cfg = ClientConfig::default();
        cfg.connection.handshake_timeout_ms = 200;
        cfg.connection.request_timeout_ms = 200;
        cfg.connection.read_timeout_ms = 20;
        cfg
    }

    #[tokio::test]
    async fn request_over_socket_pair() {
        let (client, server) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(client, config(), None).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);

        let server = tokio::spawn(async move {
            let mut framed = Framed::new(server, FrameCodec::default());
            let req = framed.next().await.unwrap().unwrap();
            assert_eq!(req.object_id(), 4);
            assert_eq!(req.opcode(), 2);
            let reply = Frame::new(4, 0, req.sequence(), Some(Pod::from("ok")));
            framed.send(reply).await.unwrap();
            framed
        });

        let reply = conn.request(4, 2, Some(Pod::Int(1))).await.unwrap();
        assert_eq!(reply, Some(Pod::from("ok")));
        assert_eq!(conn.pending_count(), 0);
        drop(server.await.unwrap());
        conn.close().await;
    }

    #[tokio::test]
    async fn remote_error_reply() {
        let (client, server) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(client, config(), None).unwrap();

        let _server = tokio::spawn(async move {
            let mut framed = Framed::new(server, FrameCodec::default());
            let req = framed.next().await.unwrap().unwrap();
            let err = crate::protocol::RemoteError::new(-2, "no such object").to_pod();
            framed
                .send(core_event(CoreEvent::Error, req.sequence(), Some(err)))
                .await
                .unwrap();
            framed
        });

        let err = conn.request(99, 1, None).await.unwrap_err();
        assert!(matches!(err, PwError::Remote { code: -2, .. }));
        // a remote error does not affect the connection itself
        assert_eq!(conn.state(), ConnectionState::Connected);
        conn.close().await;
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let (client, _server) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(client, config(), None).unwrap();
        let err = conn
            .request_with_timeout(1, 1, None, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, PwError::Timeout { .. }));
        assert_eq!(conn.pending_count(), 0);
        conn.close().await;
    }

    #[tokio::test]
    async fn oversized_request_fails_alone() {
        let (client, _server) = UnixStream::pair().unwrap();
        let mut cfg = config();
        cfg.limits.max_frame_size = 64;
        let conn = Connection::from_stream(client, cfg, None).unwrap();

        let err = conn
            .request(1, 1, Some(Pod::Bytes(vec![0; 256])))
            .await
            .unwrap_err();
        assert!(matches!(err, PwError::FrameTooLarge { .. }));
        assert_eq!(conn.state(), ConnectionState::Connected);
        conn.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_requests() {
        let (client, _server) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(client, config(), None).unwrap();
        let mut states = conn.subscribe_state();

        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
        assert!(matches!(
            conn.request(1, 1, None).await,
            Err(PwError::ConnectionClosed)
        ));
        assert!(matches!(
            conn.notify(1, 1, None).await,
            Err(PwError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn close_during_handshake_goes_through_error() {
        let (client, _server) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(client, config(), None).unwrap();
        conn.shared.transition(ConnectionState::HelloSent).unwrap();

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.last_error().as_deref(), Some("connection closed"));
    }

    #[tokio::test]
    async fn task_failure_after_close_keeps_disconnected() {
        let (client, _server) = UnixStream::pair().unwrap();
        let conn = Connection::from_stream(client, config(), None).unwrap();
        let ctx = conn.shared.dispatcher.allocate_request();
        conn.close().await;

        conn.shared.fail(&PwError::ConnectionClosed);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(*conn.subscribe_state().borrow(), ConnectionState::Disconnected);
        assert!(matches!(
            conn.shared
                .dispatcher
                .wait_for_request(ctx, Duration::from_secs(1))
                .await,
            Err(PwError::ConnectionClosed)
        ));
    }
}
