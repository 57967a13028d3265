//! Connection lifecycle state machine.

use std::fmt;

use tokio::sync::watch;

/// How a connection that reached [`ConnectionState::Closed`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseOutcome {
    /// Both directions finished, either through the close handshake or the
    /// peer ending its byte stream with nothing left to send.
    Clean,
    /// Draining did not finish within the close grace period.
    Forced,
    /// A protocol or transport error terminated the connection.
    Error,
    /// The connection was aborted locally or by its binding.
    Cancelled,
}

/// Lifecycle state of one connection.
///
/// `Connecting -> Handshaking -> Open -> {HalfClosedLocal | HalfClosedRemote}
/// -> Closed`, with `Connecting | Handshaking -> Failed`. `Closed` and
/// `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The byte transport is being established.
    Connecting,
    /// The transport layers and the upgrade are being negotiated.
    Handshaking,
    /// Messages flow in both directions.
    Open,
    /// The local side sent Close and is draining inbound messages.
    HalfClosedLocal,
    /// The peer sent Close and the local side is draining outbound messages.
    HalfClosedRemote,
    /// Both directions are finished.
    Closed(CloseOutcome),
    /// The connection never opened.
    Failed,
}

impl ConnectionState {
    /// Returns `true` for `Closed` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool { matches!(self, Self::Closed(_) | Self::Failed) }

    /// Returns `true` if `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Closed, Connecting, Failed, HalfClosedLocal, HalfClosedRemote, Handshaking, Open};
        match (self, next) {
            (Closed(_) | Failed, _) => false,
            (Connecting, Handshaking)
            | (Handshaking, Open)
            | (Connecting | Handshaking, Failed | Closed(CloseOutcome::Cancelled))
            | (Open, HalfClosedLocal | HalfClosedRemote)
            | (Open | HalfClosedLocal | HalfClosedRemote, Closed(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Handshaking => f.write_str("handshaking"),
            Self::Open => f.write_str("open"),
            Self::HalfClosedLocal => f.write_str("half-closed-local"),
            Self::HalfClosedRemote => f.write_str("half-closed-remote"),
            Self::Closed(outcome) => write!(f, "closed({outcome:?})"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Owner side of a connection's published state.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        (Self { tx }, rx)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> { self.tx.subscribe() }

    pub(crate) fn get(&self) -> ConnectionState { *self.tx.borrow() }

    /// Move to `next` if the transition is legal; returns whether it was.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}
