//! Bounded buffers that decouple a producer from a slower consumer.
//!
//! A buffer holds at most `capacity` elements. When an element arrives at a
//! full buffer its [`OverflowPolicy`] decides what happens; only
//! [`OverflowPolicy::Block`] ever makes the producer wait. Dropped elements
//! may be forwarded to a dead-letter channel and are counted in
//! [`BufferStats`]:
//!
//! `delivered + dropped + remaining == accepted`
//!
//! [`attach`] moves an upstream stream into a buffer on a spawned task;
//! [`broadcast`] feeds one upstream into several independent buffers.
//!
//! ```
//! use futures::{StreamExt, stream};
//! use wspipe::buffer::{OverflowPolicy, attach};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut rx = attach(stream::iter(0..100), 10, OverflowPolicy::DropOldest)
//!     .expect("non-zero capacity");
//! tokio::task::yield_now().await;
//! let kept: Vec<_> = rx.by_ref().map(|item| item.expect("no overflow error")).collect().await;
//! assert_eq!(kept, (90..100).collect::<Vec<_>>());
//! assert_eq!(rx.stats().dropped, 90);
//! # }
//! ```

mod builder;
mod error;
mod queue;

use std::pin::pin;

pub use builder::BufferBuilder;
pub use error::{BufferConfigError, OverflowError, SendError};
use futures::{Stream, StreamExt};
pub use queue::{BufferReceiver, BufferSender};
use static_assertions::const_assert;
use tracing::debug;

/// Capacity used by [`BufferBuilder::default`].
pub const DEFAULT_CAPACITY: usize = 64;
/// Highest admission rate, in elements per second, a buffer accepts.
pub const MAX_RATE: usize = 1_000_000;

const_assert!(DEFAULT_CAPACITY > 0);
const_assert!(MAX_RATE > 0);

/// What a buffer does with an element that arrives while it is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OverflowPolicy {
    /// Discard the arriving element.
    DropNewest,
    /// Evict the oldest queued element to make room.
    #[default]
    DropOldest,
    /// Reject the element and fail the buffer. The consumer receives the
    /// queued elements followed by an [`OverflowError`].
    Fail,
    /// Make the producer wait until the consumer frees space.
    Block,
}

/// Outcome of a successful [`BufferSender::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The element was queued without displacing anything.
    Queued,
    /// The element was queued after evicting the oldest one.
    Evicted,
    /// The buffer was full and the element was discarded.
    Discarded,
}

/// Counters describing a buffer's traffic so far.
///
/// `accepted` counts elements offered while the buffer was live, including
/// those dropped on arrival. `remaining` is the current queue length.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Elements offered to the live buffer.
    pub accepted: usize,
    /// Elements handed to the consumer.
    pub delivered: usize,
    /// Elements discarded, evicted or rejected.
    pub dropped: usize,
    /// Elements still queued.
    pub remaining: usize,
}

impl BufferStats {
    /// Returns `true` if every accepted element is accounted for.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.delivered + self.dropped + self.remaining == self.accepted
    }
}

/// Move every element of `upstream` into a new buffer on a spawned task.
///
/// Equivalent to `BufferBuilder::new(capacity, policy).attach(upstream)`.
///
/// # Errors
///
/// Returns [`BufferConfigError::InvalidCapacity`] if `capacity` is zero.
pub fn attach<S, T>(
    upstream: S,
    capacity: usize,
    policy: OverflowPolicy,
) -> Result<BufferReceiver<T>, BufferConfigError>
where
    S: Stream<Item = T> + Send + 'static,
    T: Send + 'static,
{
    BufferBuilder::new(capacity, policy).attach(upstream)
}

/// Feed one `upstream` into a buffer per entry of `branches`.
///
/// Each element is cloned into every live branch in order. A branch whose
/// receiver is dropped or whose buffer fails is detached; the others keep
/// receiving. Only a branch using [`OverflowPolicy::Block`] or a rate limit
/// can hold up its siblings. The upstream is dropped once it ends or every
/// branch has detached.
///
/// # Errors
///
/// Returns the first [`BufferConfigError`] among `branches`; nothing is
/// spawned in that case.
pub fn broadcast<S, T, I>(upstream: S, branches: I) -> Result<Vec<BufferReceiver<T>>, BufferConfigError>
where
    S: Stream<Item = T> + Send + 'static,
    T: Clone + Send + 'static,
    I: IntoIterator<Item = BufferBuilder<T>>,
{
    let mut senders = Vec::new();
    let mut receivers = Vec::new();
    for branch in branches {
        let (tx, rx) = branch.build()?;
        senders.push(tx);
        receivers.push(rx);
    }
    tokio::spawn(fan_out(upstream, senders));
    Ok(receivers)
}

async fn pump<S, T>(upstream: S, tx: BufferSender<T>)
where
    S: Stream<Item = T>,
{
    let mut upstream = pin!(upstream);
    while let Some(item) = upstream.next().await {
        if let Err(error) = tx.send(item).await {
            debug!(%error, "buffer closed; stopping upstream");
            return;
        }
    }
}

async fn fan_out<S, T>(upstream: S, mut branches: Vec<BufferSender<T>>)
where
    S: Stream<Item = T>,
    T: Clone,
{
    let mut upstream = pin!(upstream);
    while !branches.is_empty() {
        let Some(item) = upstream.next().await else {
            return;
        };
        let mut detached = Vec::new();
        for (index, branch) in branches.iter().enumerate() {
            if let Err(error) = branch.send(item.clone()).await {
                detached.push(index);
                debug!(%error, "detaching broadcast branch");
            }
        }
        for index in detached.into_iter().rev() {
            branches.remove(index);
        }
    }
    debug!("every broadcast branch detached; stopping upstream");
}
