//! Shared helpers: an in-process mock server on a temporary socket.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::Framed;

use pwire_core::protocol::{
    CoreEvent, CoreMethod, Done, HelloInfo, HelloRequest, ProtocolVersion, core_event,
};
use pwire_core::{ClientConfig, Frame, FrameCodec};

pub type ServerIo = Framed<UnixStream, FrameCodec>;

/// Route library logs to the test harness; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A listening socket inside its own temporary directory.
pub struct MockServer {
    _dir: TempDir,
    pub path: PathBuf,
    listener: UnixListener,
}

impl MockServer {
    pub fn bind() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipewire-0");
        let listener = UnixListener::bind(&path).unwrap();
        Self {
            _dir: dir,
            path,
            listener,
        }
    }

    /// Client settings pointing at this server, with short timeouts.
    pub fn config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::default().with_socket_path(&self.path);
        cfg.connection.client_name = "pwire-test".into();
        cfg.connection.handshake_timeout_ms = 300;
        cfg.connection.request_timeout_ms = 1000;
        cfg.connection.read_timeout_ms = 20;
        cfg
    }

    pub async fn accept(&self) -> ServerIo {
        let (stream, _) = self.listener.accept().await.unwrap();
        Framed::new(stream, FrameCodec::default())
    }
}

/// Next frame from the client, failing the test after two seconds.
pub async fn recv(io: &mut ServerIo) -> Frame {
    tokio::time::timeout(Duration::from_secs(2), io.next())
        .await
        .expect("timed out waiting for the client")
        .expect("client closed the socket")
        .expect("undecodable frame from the client")
}

/// Answer hello with `version`/`capabilities`, then the initial sync.
pub async fn serve_handshake(io: &mut ServerIo, version: ProtocolVersion, capabilities: &[&str]) {
    let hello = recv(io).await;
    assert_eq!(hello.object_id(), 0);
    assert_eq!(hello.opcode(), CoreMethod::Hello as u32);
    let req = HelloRequest::from_pod(hello.payload()).unwrap();
    assert_eq!(req.client_name, "pwire-test");

    let info = HelloInfo::new(
        version,
        capabilities.iter().map(|c| c.to_string()).collect(),
    );
    io.send(core_event(
        CoreEvent::Info,
        hello.sequence(),
        Some(info.to_pod().unwrap()),
    ))
    .await
    .unwrap();

    answer_sync(io).await;
}

/// Expect a sync and answer it with done.
pub async fn answer_sync(io: &mut ServerIo) {
    let sync = recv(io).await;
    assert_eq!(sync.opcode(), CoreMethod::Sync as u32);
    let done = Done::from_pod(sync.payload()).unwrap();
    assert_eq!(done.sequence(), sync.sequence());
    io.send(core_event(CoreEvent::Done, sync.sequence(), Some(done.to_pod())))
        .await
        .unwrap();
}
