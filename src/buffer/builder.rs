//! Builder for configuring bounded buffers.

use std::time::Duration;

use futures::Stream;
use leaky_bucket::RateLimiter;
use tokio::sync::mpsc;

use super::{
    BufferConfigError,
    BufferReceiver,
    BufferSender,
    DEFAULT_CAPACITY,
    MAX_RATE,
    OverflowPolicy,
    queue::{self, Limits},
};

/// Builder for a bounded buffer.
///
/// Defaults: capacity [`DEFAULT_CAPACITY`], [`OverflowPolicy::DropOldest`],
/// no rate limit, no dead-letter channel and a warning for every dropped
/// element.
///
/// # Examples
///
/// ```
/// use tokio::sync::mpsc;
/// use wspipe::buffer::{BufferBuilder, OverflowPolicy};
///
/// let (dead_tx, _dead_rx) = mpsc::channel(8);
/// let (_tx, rx) = BufferBuilder::<u32>::new(4, OverflowPolicy::DropNewest)
///     .dead_letters(Some(dead_tx)) // dropped elements are forwarded here
///     .log_every_n(100)
///     .build()
///     .expect("valid buffer configuration");
/// assert_eq!(rx.capacity(), 4);
/// ```
#[derive(Debug)]
pub struct BufferBuilder<T> {
    capacity: usize,
    policy: OverflowPolicy,
    rate: Option<usize>,
    dead_letters: Option<mpsc::Sender<T>>,
    log_every_n: usize,
}

impl<T> Default for BufferBuilder<T> {
    fn default() -> Self { Self::new(DEFAULT_CAPACITY, OverflowPolicy::DropOldest) }
}

impl<T> Clone for BufferBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            policy: self.policy,
            rate: self.rate,
            dead_letters: self.dead_letters.clone(),
            log_every_n: self.log_every_n,
        }
    }
}

impl<T> BufferBuilder<T> {
    /// Start a builder with the given capacity and policy.
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            capacity,
            policy,
            rate: None,
            dead_letters: None,
            log_every_n: 1,
        }
    }

    /// Set the maximum number of queued elements.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the behaviour when an element arrives at a full buffer.
    #[must_use]
    pub fn policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Limit admissions to `rate` elements per second.
    ///
    /// Passing `None` disables rate limiting.
    #[must_use]
    pub fn rate(mut self, rate: Option<usize>) -> Self {
        self.rate = rate;
        self
    }

    /// Forward dropped and evicted elements to `dead_letters`.
    ///
    /// Elements are discarded when no channel is set or the channel is full.
    #[must_use]
    pub fn dead_letters(mut self, dead_letters: Option<mpsc::Sender<T>>) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    /// Emit a drop warning once every `n` dropped elements.
    #[must_use]
    pub fn log_every_n(mut self, n: usize) -> Self {
        self.log_every_n = n.max(1);
        self
    }

    /// Build the buffer and return its producer and consumer ends.
    ///
    /// # Errors
    ///
    /// Returns [`BufferConfigError::InvalidCapacity`] if the capacity is zero
    /// and [`BufferConfigError::InvalidRate`] if the rate is zero or greater
    /// than [`MAX_RATE`].
    pub fn build(self) -> Result<(BufferSender<T>, BufferReceiver<T>), BufferConfigError> {
        if self.capacity == 0 {
            return Err(BufferConfigError::InvalidCapacity(self.capacity));
        }
        let limiter = match self.rate {
            Some(rate) if rate == 0 || rate > MAX_RATE => {
                return Err(BufferConfigError::InvalidRate(rate));
            }
            Some(rate) => Some(
                RateLimiter::builder()
                    .initial(rate)
                    .refill(rate)
                    .interval(Duration::from_secs(1))
                    .max(rate)
                    .build(),
            ),
            None => None,
        };
        Ok(queue::channel(
            Limits {
                capacity: self.capacity,
                policy: self.policy,
                log_every_n: self.log_every_n,
            },
            limiter,
            self.dead_letters,
        ))
    }

    /// Build the buffer and spawn a pump moving every element of `upstream`
    /// into it.
    ///
    /// The pump stops, dropping `upstream`, when the upstream ends, the
    /// receiver is dropped or the buffer fails.
    ///
    /// # Errors
    ///
    /// See [`BufferBuilder::build`].
    pub fn attach<S>(self, upstream: S) -> Result<BufferReceiver<T>, BufferConfigError>
    where
        S: Stream<Item = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = self.build()?;
        tokio::spawn(super::pump(upstream, tx));
        Ok(rx)
    }
}
