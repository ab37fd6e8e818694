//! # pwire-core
//!
//! Native client engine for a PipeWire-style multimedia control
//! protocol spoken over a local Unix socket.
//!
//! This crate contains:
//! - **POD**: `Pod`, the tag-length-value value codec, plus builders
//! - **Framing**: `Frame` / `FrameHeader` and the length-prefixed stream format
//! - **Buffer / Codec**: `StreamBuffer` reassembly and `FrameCodec` for `tokio_util`
//! - **State**: `ConnectionState` handshake state machine
//! - **Dispatch**: request correlation, per-object handlers, worker pool
//! - **Network**: `Connection`, the async client handle
//! - **Protocol**: core object ids and handshake payloads
//! - **Config**: `ClientConfig`, loaded from TOML
//! - **Error**: `PwError`, typed, `thiserror`-based error hierarchy
//!
//! ```no_run
//! # async fn demo() -> Result<(), pwire_core::PwError> {
//! use pwire_core::{ClientConfig, Connection};
//!
//! let conn = Connection::connect_with_config(ClientConfig::default()).await?;
//! conn.register_handler(2, |frame| {
//!     println!("registry event {}", frame.opcode());
//!     Ok(())
//! });
//! conn.sync().await?;
//! conn.close().await;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod network;
pub mod pod;
pub mod protocol;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use buffer::StreamBuffer;
pub use codec::FrameCodec;
pub use config::ClientConfig;
pub use dispatch::{Dispatcher, ErrorSink, Handler, RequestContext};
pub use error::{PwError, Result};
pub use frame::{Frame, FrameHeader, HEADER_SIZE};
pub use network::Connection;
pub use pod::{Pod, PodType};
pub use protocol::{CORE_ID, ProtocolVersion};
pub use state::{ConnectionState, ProtocolState};
