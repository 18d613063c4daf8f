use std::{net::SocketAddr, time::Duration};

use crate::{NetError, MAX_PLAYERS};

/// Configuration shared by host and client sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Address of the rendezvous (punch-through) server.
    pub server_addr: SocketAddr,
    /// Maximum number of players in a room, host included.
    /// Only used by the host.
    pub max_players: usize,
    /// Protocol version, host and clients must use the same value.
    pub api_version: u8,
    /// How long a session may stay pending before giving up.
    /// `None` waits forever.
    pub handshake_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 61111)),
            max_players: 4,
            api_version: 0,
            handshake_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl SessionConfig {
    pub fn new(server_addr: SocketAddr, max_players: usize, api_version: u8) -> Self {
        Self {
            server_addr,
            max_players,
            api_version,
            ..Default::default()
        }
    }

    pub(crate) fn validate_capacity(&self) -> Result<(), NetError> {
        if self.max_players == 0 || self.max_players > MAX_PLAYERS {
            return Err(NetError::InvalidCapacity(self.max_players));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_bounds() {
        let mut config = SessionConfig::default();
        assert!(config.validate_capacity().is_ok());

        config.max_players = 0;
        assert!(matches!(config.validate_capacity(), Err(NetError::InvalidCapacity(0))));

        config.max_players = MAX_PLAYERS;
        assert!(config.validate_capacity().is_ok());

        config.max_players = MAX_PLAYERS + 1;
        assert!(config.validate_capacity().is_err());
    }
}
