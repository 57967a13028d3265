//! Composable byte-stream layers.
//!
//! A [`StreamLayer`] consumes a byte stream and yields another byte stream
//! honouring the same contract. The secure transport stage is one such layer;
//! [`PassThrough`] stands in for it when no encryption is wanted, and
//! [`Breaker`] injects faults by severing directions on command. Layers
//! combine with [`Stack`] so the pipeline never needs to know how many stages
//! sit between the socket and the framing engine.

use std::{io, sync::Arc};

use futures::future::{self, BoxFuture};
use thiserror::Error;

use crate::{Role, transport::ByteStream};

mod breaker;

pub use breaker::{Breaker, BreakerHandle, BreakerLayer, Direction, Severance};

/// Errors raised while a layer establishes itself over a byte stream.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LayerError {
    /// The layer's own negotiation was rejected or malformed.
    #[error("layer handshake failed: {0}")]
    Handshake(String),
    /// The underlying stream failed while the layer was being established.
    #[error("layer I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A stage that wraps a byte stream and exposes the same contract.
pub trait StreamLayer<S: ByteStream>: Send + Sync + 'static {
    /// Stream produced by this layer.
    type Stream: ByteStream;

    /// Establish the layer over `stream` for the given endpoint `role`.
    ///
    /// Any failure is terminal: the stream is dropped and no byte reaches
    /// the stage above.
    fn wrap(&self, stream: S, role: Role) -> BoxFuture<'static, Result<Self::Stream, LayerError>>;
}

/// Layer that forwards bytes unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassThrough;

impl<S: ByteStream> StreamLayer<S> for PassThrough {
    type Stream = S;

    fn wrap(&self, stream: S, _role: Role) -> BoxFuture<'static, Result<S, LayerError>> {
        Box::pin(future::ready(Ok(stream)))
    }
}

/// Composition of two layers: `inner` wraps the transport, `outer` wraps
/// whatever `inner` produced.
#[derive(Clone, Debug, Default)]
pub struct Stack<Inner, Outer> {
    inner: Arc<Inner>,
    outer: Arc<Outer>,
}

impl<Inner, Outer> Stack<Inner, Outer> {
    /// Compose `inner` followed by `outer`.
    pub fn new(inner: Inner, outer: Outer) -> Self {
        Self {
            inner: Arc::new(inner),
            outer: Arc::new(outer),
        }
    }
}

impl<S, Inner, Outer> StreamLayer<S> for Stack<Inner, Outer>
where
    S: ByteStream,
    Inner: StreamLayer<S>,
    Outer: StreamLayer<Inner::Stream>,
{
    type Stream = Outer::Stream;

    fn wrap(&self, stream: S, role: Role) -> BoxFuture<'static, Result<Self::Stream, LayerError>> {
        let inner = Arc::clone(&self.inner);
        let outer = Arc::clone(&self.outer);
        Box::pin(async move {
            let stream = inner.wrap(stream, role).await?;
            outer.wrap(stream, role).await
        })
    }
}

/// Extension methods for building layer stacks fluently.
pub trait LayerExt: Sized {
    /// Apply `outer` on top of `self`.
    fn stack<Outer>(self, outer: Outer) -> Stack<Self, Outer> { Stack::new(self, outer) }
}

impl<L: Sized + Send + Sync + 'static> LayerExt for L {}
