//! Test helpers for `wspipe` pipelines.
//!
//! Provides a shared [`LoggerHandle`] for asserting on `log` output,
//! in-memory [`link`]s that serve and open a connection without sockets,
//! message builders and handlers, and metric capture.
//!
//! ```rust,no_run
//! use futures::stream;
//! use wspipe_testing::{collect_data, echo, link, pipeline, texts};
//!
//! # async fn example() {
//! let pipeline = pipeline();
//! let link = link(&pipeline, "/", echo, stream::iter(texts(3)));
//! link.client.handshake.await.unwrap();
//! let replies = collect_data(link.client.inbound).await.unwrap();
//! assert_eq!(replies, texts(3));
//! # }
//! ```

pub mod link;
pub mod logging;
pub mod messages;
pub mod metrics;

pub use link::{LINK_CAPACITY, Link, link, pipeline};
pub use logging::{LoggerHandle, logger};
pub use messages::{collect_data, collect_until_error, echo, gated, sink, texts};
