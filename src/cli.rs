//! Command line interface for the `wspipe` binary.
//!
//! Defines the subcommands shared by the binary and the man page generator.

use std::{net::SocketAddr, time::Duration};

use clap::{Parser, Subcommand};

/// Command line arguments for the `wspipe` binary.
#[derive(Debug, Parser)]
#[command(name = "wspipe", version, about = "Layered WebSocket pipeline tool")]
pub struct Cli {
    /// Expose Prometheus metrics on this address.
    #[arg(long, global = true, value_name = "ADDR")]
    pub metrics: Option<SocketAddr>,
    /// Seconds allowed for the opening handshake.
    #[arg(long, global = true, value_name = "SECS", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub handshake_timeout: u64,
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration { Duration::from_secs(self.handshake_timeout) }
}

/// Subcommands of the `wspipe` binary.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Echo every data message back to its sender until interrupted.
    Serve {
        /// Address to listen on.
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        bind: SocketAddr,
        /// Number of accept workers.
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Send text messages and print every reply.
    Send {
        /// `ws://` URL to connect to.
        #[arg(short, long)]
        url: String,
        /// Messages to send, in order.
        #[arg(required = true)]
        messages: Vec<String>,
    },
}
