//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Core types for the bwnet server

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identity of a connected peer
///
/// Built by the reactor when a connection is accepted. Two identities are
/// equal only if address, port and birthday all match, so a peer that
/// reconnects from the same address and port within the same second is
/// indistinguishable from its previous connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessIdentity {
    address: IpAddr,
    port: u16,
    birthday: u64,
}

impl ProcessIdentity {
    pub(crate) fn new(address: IpAddr, port: u16, birthday: u64) -> Self {
        Self {
            address,
            port,
            birthday,
        }
    }

    /// Identity for a peer accepted right now
    pub(crate) fn accepted(peer: SocketAddr) -> Self {
        let birthday = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_secs())
            .unwrap_or(0);
        Self::new(peer.ip(), peer.port(), birthday)
    }

    /// Peer IP address
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Peer TCP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Unix timestamp (seconds) at which the connection was accepted
    pub fn birthday(&self) -> u64 {
        self.birthday
    }

    /// Peer socket address
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not initialized, or fully torn down
    Stopped,
    /// Accepting and servicing clients
    Running,
    /// Close requested, waiting for clients to leave
    Closing,
}

impl ServerState {
    /// Check if the server holds a live session
    pub fn is_initialized(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Server snapshot for non-blocking debug information
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    /// Lifecycle state
    pub state: ServerState,
    /// Number of occupied client slots
    pub active_clients: usize,
    /// Number of client slots
    pub max_clients: usize,
    /// Bound listening address, while initialized
    pub local_addr: Option<SocketAddr>,
    /// Time since `init`, while initialized
    pub uptime: Option<Duration>,
}

impl fmt::Display for ServerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_addr {
            Some(addr) => write!(
                f,
                "Server {{ state: {}, clients: {}/{}, addr: {}, uptime: {:?} }}",
                self.state,
                self.active_clients,
                self.max_clients,
                addr,
                self.uptime.unwrap_or_default()
            ),
            None => write!(
                f,
                "Server {{ state: {}, clients: {}/{} }}",
                self.state, self.active_clients, self.max_clients
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_identity_equality_is_structural() {
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let a = ProcessIdentity::new(addr, 4000, 100);
        let b = ProcessIdentity::new(addr, 4000, 100);
        let c = ProcessIdentity::new(addr, 4000, 101);
        let d = ProcessIdentity::new(addr, 4001, 100);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_identity_display() {
        let identity = ProcessIdentity::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080, 0);
        assert_eq!(identity.to_string(), "127.0.0.1:8080");
        assert_eq!(identity.socket_addr(), "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn test_identity_accepted_uses_wall_clock() {
        let peer: SocketAddr = "192.168.1.20:51000".parse().unwrap();
        let identity = ProcessIdentity::accepted(peer);

        assert_eq!(identity.address(), peer.ip());
        assert_eq!(identity.port(), 51000);
        assert!(identity.birthday() > 1_600_000_000);
    }

    #[test]
    fn test_server_state() {
        assert!(!ServerState::Stopped.is_initialized());
        assert!(ServerState::Running.is_initialized());
        assert!(ServerState::Closing.is_initialized());
        assert_eq!(ServerState::Closing.to_string(), "closing");
    }
}
