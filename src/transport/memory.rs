//! In-memory transports for running pipelines without sockets.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::io::{DuplexStream, duplex};

use super::{ConnectionInfo, Transport};

/// Build two connected in-memory transports.
///
/// `max_buf_size` bounds the bytes buffered in each direction; writers
/// suspend once it is reached. The endpoints report synthetic loopback
/// addresses so logs and [`ConnectionInfo`] remain meaningful.
#[must_use]
pub fn pair(max_buf_size: usize) -> (Transport<DuplexStream>, Transport<DuplexStream>) {
    let (a, b) = duplex(max_buf_size.max(1));
    let a_addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 1);
    let b_addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 2);
    (
        Transport::new(
            a,
            ConnectionInfo {
                peer_addr: Some(b_addr),
                local_addr: Some(a_addr),
            },
        ),
        Transport::new(
            b,
            ConnectionInfo {
                peer_addr: Some(a_addr),
                local_addr: Some(b_addr),
            },
        ),
    )
}
