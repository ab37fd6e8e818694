//! Socket I/O: the connection handle, its reader and its writer.
//!
//! Reads and writes run on their own tasks. The writer is the only
//! task that touches the write half of the socket, so frames never
//! interleave; the reader alone owns the reassembly buffer.

mod connection;
mod reader;

pub use connection::Connection;
