//! Connection and server configuration.

use std::{num::NonZeroUsize, time::Duration};

use super::server::BackoffConfig;
use crate::{
    engine::EngineConfig,
    frame::{MAX_FRAME_SIZE, clamp_frame_size},
    role::Role,
};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
const DEFAULT_FRAGMENT_SIZE: usize = 64 * 1024;
const DEFAULT_INBOUND_CAPACITY: usize = 16;
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Limits and timeouts applied to every connection of a pipeline.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use wspipe::PipelineConfig;
///
/// let config = PipelineConfig::default()
///     .handshake_timeout(Duration::from_secs(2))
///     .subprotocols(["chat"]);
/// assert_eq!(config.handshake_timeout_value(), Duration::from_secs(2));
/// assert_eq!(config.subprotocol_list(), ["chat"]);
/// ```
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    handshake_timeout: Duration,
    close_grace: Duration,
    max_frame_size: usize,
    max_message_size: NonZeroUsize,
    fragment_size: NonZeroUsize,
    inbound_capacity: usize,
    subprotocols: Vec<String>,
    nodelay: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            close_grace: DEFAULT_CLOSE_GRACE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: NonZeroUsize::new(DEFAULT_MAX_MESSAGE_SIZE).unwrap_or(NonZeroUsize::MIN),
            fragment_size: NonZeroUsize::new(DEFAULT_FRAGMENT_SIZE).unwrap_or(NonZeroUsize::MIN),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            subprotocols: Vec::new(),
            nodelay: true,
        }
    }
}

impl PipelineConfig {
    /// Time allowed for the transport layers and the upgrade to complete.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout.max(MIN_TIMEOUT);
        self
    }

    /// Time allowed for draining once either side sent Close.
    #[must_use]
    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace.max(MIN_TIMEOUT);
        self
    }

    /// Largest inbound frame payload accepted.
    ///
    /// Clamped to `125..=64 MiB`.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = clamp_frame_size(size);
        self
    }

    /// Largest reassembled inbound message accepted.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        self
    }

    /// Largest outbound data frame payload; longer messages are fragmented.
    ///
    /// Clamped to `1..=64 MiB`.
    #[must_use]
    pub fn fragment_size(mut self, size: usize) -> Self {
        self.fragment_size =
            NonZeroUsize::new(size.min(MAX_FRAME_SIZE)).unwrap_or(NonZeroUsize::MIN);
        self
    }

    /// Inbound messages buffered before the reader stops pulling frames.
    #[must_use]
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    /// Subprotocols offered by clients or supported by servers, in
    /// preference order.
    #[must_use]
    pub fn subprotocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Set `TCP_NODELAY` on sockets the pipeline opens or accepts.
    #[must_use]
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Configured handshake timeout.
    #[must_use]
    pub fn handshake_timeout_value(&self) -> Duration { self.handshake_timeout }

    /// Configured close grace period.
    #[must_use]
    pub fn close_grace_value(&self) -> Duration { self.close_grace }

    /// Configured inbound channel capacity.
    #[must_use]
    pub fn inbound_capacity_value(&self) -> usize { self.inbound_capacity }

    /// Configured subprotocols.
    #[must_use]
    pub fn subprotocol_list(&self) -> &[String] { &self.subprotocols }

    /// Whether `TCP_NODELAY` is requested.
    #[must_use]
    pub fn nodelay_value(&self) -> bool { self.nodelay }

    pub(crate) fn engine(&self, role: Role) -> EngineConfig {
        EngineConfig {
            role,
            max_frame_size: self.max_frame_size,
            max_message_size: self.max_message_size,
            fragment_size: self.fragment_size,
            close_grace: self.close_grace,
        }
    }
}

/// Accept loop settings used by [`Pipeline::listen`](super::Pipeline::listen).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    workers: usize,
    backoff: BackoffConfig,
}

impl Default for ServerConfig {
    /// One worker per available CPU core and the default back-off.
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self {
            workers,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Set the number of accept workers sharing the listener.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// Configure the accept-error back-off.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalized();
        self
    }

    /// Returns the configured number of accept workers.
    #[inline]
    #[must_use]
    pub const fn worker_count(&self) -> usize { self.workers }

    /// Returns the configured back-off.
    #[must_use]
    pub const fn backoff(&self) -> BackoffConfig { self.backoff }
}
