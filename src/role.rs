//! Endpoint role of a connection.

use std::fmt;

/// Which side of the upgrade negotiation an endpoint plays.
///
/// The role decides frame masking: clients mask every frame they send and
/// servers reject unmasked frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The endpoint that opened the connection and sent the upgrade request.
    Client,
    /// The endpoint that accepted the connection and answered the upgrade.
    Server,
}

impl Role {
    /// Returns `true` if frames sent by this role must be masked.
    #[must_use]
    pub fn masks_outbound(self) -> bool { matches!(self, Self::Client) }

    /// Returns `true` if frames received by this role must be masked.
    #[must_use]
    pub fn expects_masked(self) -> bool { matches!(self, Self::Server) }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}
