//! Shared ring of queued elements and its producer and consumer ends.

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

use futures::Stream;
use leaky_bucket::RateLimiter;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

use super::{Admission, BufferStats, OverflowError, OverflowPolicy, SendError};
use crate::metrics;

#[derive(Clone, Copy, Debug)]
pub(super) struct Limits {
    pub capacity: usize,
    pub policy: OverflowPolicy,
    pub log_every_n: usize,
}

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    accepted: usize,
    delivered: usize,
    dropped: usize,
    failure: Option<OverflowError>,
    failure_reported: bool,
    senders: usize,
    receiver_alive: bool,
    waker: Option<Waker>,
}

impl<T> State<T> {
    fn stats(&self) -> BufferStats {
        BufferStats {
            accepted: self.accepted,
            delivered: self.delivered,
            dropped: self.dropped,
            remaining: self.queue.len(),
        }
    }

    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

enum Offer<T> {
    Admitted(Admission, Option<T>),
    Full(T),
    Rejected(OverflowError, T),
    Closed,
}

#[derive(Debug)]
struct Shared<T> {
    limits: Limits,
    state: Mutex<State<T>>,
    space: Notify,
    limiter: Option<RateLimiter>,
    dead_letters: Option<mpsc::Sender<T>>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn offer(&self, item: T) -> Offer<T> {
        let mut state = self.lock();
        if !state.receiver_alive || state.failure.is_some() {
            return Offer::Closed;
        }
        if state.queue.len() < self.limits.capacity {
            state.accepted += 1;
            state.queue.push_back(item);
            state.wake();
            return Offer::Admitted(Admission::Queued, None);
        }
        match self.limits.policy {
            OverflowPolicy::Block => Offer::Full(item),
            OverflowPolicy::DropNewest => {
                state.accepted += 1;
                self.record_drop(&mut state);
                Offer::Admitted(Admission::Discarded, Some(item))
            }
            OverflowPolicy::DropOldest => {
                state.accepted += 1;
                let evicted = state.queue.pop_front();
                state.queue.push_back(item);
                self.record_drop(&mut state);
                state.wake();
                Offer::Admitted(Admission::Evicted, evicted)
            }
            OverflowPolicy::Fail => {
                state.accepted += 1;
                self.record_drop(&mut state);
                let error = OverflowError {
                    capacity: self.limits.capacity,
                };
                state.failure = Some(error);
                state.wake();
                Offer::Rejected(error, item)
            }
        }
    }

    fn record_drop(&self, state: &mut State<T>) {
        state.dropped += 1;
        metrics::inc_buffer_drops(1);
        if state.dropped.is_multiple_of(self.limits.log_every_n) {
            warn!(
                dropped = state.dropped,
                capacity = self.limits.capacity,
                policy = ?self.limits.policy,
                log_every_n = self.limits.log_every_n,
                "buffer full; dropping elements"
            );
        }
    }

    fn dead_letter(&self, item: T) {
        let Some(tx) = &self.dead_letters else {
            return;
        };
        if let Err(error) = tx.try_send(item) {
            let reason = match error {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            debug!(reason, "dead letter channel unavailable; element discarded");
        }
    }
}

pub(super) fn channel<T>(
    limits: Limits,
    limiter: Option<RateLimiter>,
    dead_letters: Option<mpsc::Sender<T>>,
) -> (BufferSender<T>, BufferReceiver<T>) {
    let shared = Arc::new(Shared {
        limits,
        state: Mutex::new(State {
            queue: VecDeque::with_capacity(limits.capacity),
            accepted: 0,
            delivered: 0,
            dropped: 0,
            failure: None,
            failure_reported: false,
            senders: 1,
            receiver_alive: true,
            waker: None,
        }),
        space: Notify::new(),
        limiter,
        dead_letters,
    });
    (
        BufferSender {
            shared: Arc::clone(&shared),
        },
        BufferReceiver { shared },
    )
}

/// Producer end of a bounded buffer.
///
/// Cloning yields another producer for the same buffer; the receiver ends
/// once every producer is dropped and the queue is drained.
#[derive(Debug)]
pub struct BufferSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> BufferSender<T> {
    /// Offer `item` to the buffer, applying its overflow policy when full.
    ///
    /// Waits for a rate limiter token when a rate is configured, and for
    /// free space under [`OverflowPolicy::Block`]. Every other policy
    /// returns without waiting for the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Overflow`] when this item overflowed a buffer
    /// using [`OverflowPolicy::Fail`], and [`SendError::Closed`] once the
    /// receiver is gone or the buffer has already failed.
    pub async fn send(&self, item: T) -> Result<Admission, SendError> {
        if let Some(limiter) = &self.shared.limiter {
            limiter.acquire(1).await;
        }
        let mut item = item;
        loop {
            let space = self.shared.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();
            match self.shared.offer(item) {
                Offer::Admitted(admission, displaced) => {
                    if let Some(displaced) = displaced {
                        self.shared.dead_letter(displaced);
                    }
                    return Ok(admission);
                }
                Offer::Full(back) => {
                    item = back;
                    space.await;
                }
                Offer::Rejected(error, back) => {
                    self.shared.dead_letter(back);
                    return Err(SendError::Overflow(error));
                }
                Offer::Closed => return Err(SendError::Closed),
            }
        }
    }

    /// Counters for this buffer.
    #[must_use]
    pub fn stats(&self) -> BufferStats { self.shared.lock().stats() }

    /// Returns `true` once the receiver is dropped or the buffer failed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        let state = self.shared.lock();
        !state.receiver_alive || state.failure.is_some()
    }
}

impl<T> Clone for BufferSender<T> {
    fn clone(&self) -> Self {
        self.shared.lock().senders += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for BufferSender<T> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.senders = state.senders.saturating_sub(1);
        if state.senders == 0 {
            state.wake();
        }
    }
}

/// Consumer end of a bounded buffer.
///
/// Yields queued elements in order. A buffer that failed yields its
/// remaining elements, then one [`OverflowError`], then ends.
#[derive(Debug)]
pub struct BufferReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> BufferReceiver<T> {
    /// Counters for this buffer.
    #[must_use]
    pub fn stats(&self) -> BufferStats { self.shared.lock().stats() }

    /// Maximum number of queued elements.
    #[must_use]
    pub fn capacity(&self) -> usize { self.shared.limits.capacity }

    /// Overflow policy in force.
    #[must_use]
    pub fn policy(&self) -> OverflowPolicy { self.shared.limits.policy }

    /// Number of elements currently queued.
    #[must_use]
    pub fn len(&self) -> usize { self.shared.lock().queue.len() }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<T> Stream for BufferReceiver<T> {
    type Item = Result<T, OverflowError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let shared = &self.shared;
        let mut state = shared.lock();
        if let Some(item) = state.queue.pop_front() {
            state.delivered += 1;
            drop(state);
            shared.space.notify_waiters();
            return Poll::Ready(Some(Ok(item)));
        }
        if let Some(error) = state.failure {
            if state.failure_reported {
                return Poll::Ready(None);
            }
            state.failure_reported = true;
            return Poll::Ready(Some(Err(error)));
        }
        if state.senders == 0 {
            return Poll::Ready(None);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> Drop for BufferReceiver<T> {
    fn drop(&mut self) {
        self.shared.lock().receiver_alive = false;
        self.shared.space.notify_waiters();
    }
}
