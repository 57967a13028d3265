#![doc(html_root_url = "https://docs.rs/wspipe/latest")]
//! Public API for the `wspipe` library.
//!
//! This crate provides layered duplex WebSocket pipelines: a byte
//! transport, an optional stack of stream layers and an RFC 6455 framing
//! engine bound together for the lifetime of one connection. The
//! [`buffer`] module adds bounded dropping buffers with fan-out.

pub mod buffer;
pub mod byte_order;
pub mod engine;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod layer;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod pipeline;
mod role;
pub mod session;
pub mod transport;

pub use buffer::{BufferBuilder, BufferReceiver, BufferStats, OverflowError, OverflowPolicy};
pub use engine::{CloseOutcome, ConnectionHandle, ConnectionState, MessageStream};
pub use error::{PipelineError, ProtocolError, Result};
pub use handshake::HandshakeResult;
pub use layer::{LayerExt, PassThrough, StreamLayer};
pub use message::{CloseCode, CloseFrame, Message};
pub use pipeline::{
    Accepted,
    BackoffConfig,
    Binding,
    ClientConnection,
    Handler,
    Pipeline,
    PipelineConfig,
    PipelineContext,
    ServerConfig,
};
pub use role::Role;
pub use session::ConnectionId;
pub use transport::{ByteStream, ConnectionInfo, Transport};
