//! Directional state of a byte transport.

/// Which halves of a duplex transport remain open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DirectionState {
    /// Both directions carry bytes.
    #[default]
    Open,
    /// The local side shut down its send half.
    HalfClosedSend,
    /// The peer ended its send half; reads report end of stream.
    HalfClosedReceive,
    /// Neither direction carries bytes.
    Closed,
}

impl DirectionState {
    /// Returns `true` while writes are permitted.
    #[must_use]
    pub fn can_send(self) -> bool { matches!(self, Self::Open | Self::HalfClosedReceive) }

    /// Returns `true` while reads may still yield bytes.
    #[must_use]
    pub fn can_receive(self) -> bool { matches!(self, Self::Open | Self::HalfClosedSend) }

    /// State after the send half closes.
    #[must_use]
    pub fn close_send(self) -> Self {
        match self {
            Self::Open | Self::HalfClosedSend => Self::HalfClosedSend,
            Self::HalfClosedReceive | Self::Closed => Self::Closed,
        }
    }

    /// State after the receive half closes.
    #[must_use]
    pub fn close_receive(self) -> Self {
        match self {
            Self::Open | Self::HalfClosedReceive => Self::HalfClosedReceive,
            Self::HalfClosedSend | Self::Closed => Self::Closed,
        }
    }
}
