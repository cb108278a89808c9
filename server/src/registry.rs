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

//! Fixed capacity client table
//!
//! Slots are allocated once per session and never grow or shrink. A client
//! socket is registered with the readiness selector under the token of its
//! slot index, so a readiness event maps straight back to its slot.
//!
//! Lookups by identity are a linear scan where the first match wins. That is
//! O(max_clients) per call, which is fine for the small tables this server
//! is meant for.

use crate::{ProcessIdentity, Result, ServerError};
use bytes::BytesMut;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use tracing::debug;

/// One occupied entry in the client table
#[derive(Debug)]
pub(crate) struct ClientSlot {
    /// Non-blocking client socket
    pub(crate) stream: TcpStream,
    /// Who is on the other end
    pub(crate) process: ProcessIdentity,
    /// Bytes waiting to be written; empty means a new send is accepted
    pub(crate) send_buffer: BytesMut,
}

/// How to find a client in the table
#[derive(Debug, Clone, Copy)]
pub(crate) enum ClientKey<'a> {
    /// Selector token of the client socket
    Token(Token),
    /// Identity of the client
    Process(&'a ProcessIdentity),
}

/// Fixed capacity client table
#[derive(Debug)]
pub(crate) struct ClientRegistry {
    slots: Vec<Option<ClientSlot>>,
    selector: Registry,
}

impl ClientRegistry {
    /// Create a table with `capacity` free slots
    ///
    /// `selector` is the registry of the poll instance that will report
    /// readiness for the stored sockets.
    pub(crate) fn new(capacity: usize, selector: Registry) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, selector }
    }

    /// Number of slots
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Store a freshly accepted client in the first free slot
    ///
    /// When every slot is taken the stream is dropped, which closes the
    /// connection, and [`ServerError::ServerFull`] is returned.
    pub(crate) fn save(&mut self, mut stream: TcpStream, process: ProcessIdentity) -> Result<usize> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            drop(stream);
            return Err(ServerError::ServerFull(self.capacity()));
        };

        self.selector.register(
            &mut stream,
            Token(index),
            Interest::READABLE | Interest::WRITABLE,
        )?;

        self.slots[index] = Some(ClientSlot {
            stream,
            process,
            send_buffer: BytesMut::new(),
        });

        Ok(index)
    }

    fn index_of(&self, key: ClientKey<'_>) -> Option<usize> {
        match key {
            ClientKey::Token(Token(index)) => match self.slots.get(index) {
                Some(Some(_)) => Some(index),
                _ => None,
            },
            ClientKey::Process(process) => self.slots.iter().position(|slot| {
                slot.as_ref()
                    .is_some_and(|slot| &slot.process == process)
            }),
        }
    }

    /// Find a client
    pub(crate) fn lookup(&self, key: ClientKey<'_>) -> Option<(usize, &ClientSlot)> {
        let index = self.index_of(key)?;
        self.slots[index].as_ref().map(|slot| (index, slot))
    }

    /// Find a client for mutation
    pub(crate) fn lookup_mut(&mut self, key: ClientKey<'_>) -> Option<(usize, &mut ClientSlot)> {
        let index = self.index_of(key)?;
        self.slots[index].as_mut().map(|slot| (index, slot))
    }

    /// Slot contents by index
    pub(crate) fn get(&self, index: usize) -> Option<&ClientSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Remove a client from the table
    ///
    /// The socket is deregistered from the selector and closed. Returns the
    /// identity that occupied the slot, or `None` if no client matched.
    pub(crate) fn forget(&mut self, key: ClientKey<'_>) -> Option<ProcessIdentity> {
        let index = self.index_of(key)?;
        let mut slot = self.slots[index].take()?;

        if let Err(error) = self.selector.deregister(&mut slot.stream) {
            debug!(client = %slot.process, ?error, "Failed to deregister client socket");
        }

        Some(slot.process)
    }

    /// Remove every client, returning their identities in slot order
    pub(crate) fn drain(&mut self) -> Vec<ProcessIdentity> {
        (0..self.slots.len())
            .filter_map(|index| self.forget(ClientKey::Token(Token(index))))
            .collect()
    }

    /// Identities of all clients in slot order
    pub(crate) fn processes(&self) -> Vec<ProcessIdentity> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.process.clone())
            .collect()
    }

    /// Occupied slots with their index
    pub(crate) fn occupied_mut(&mut self) -> impl Iterator<Item = (usize, &mut ClientSlot)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|slot| (index, slot)))
    }

    /// Check if any client has bytes waiting to be written
    pub(crate) fn has_pending_sends(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|slot| !slot.send_buffer.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::io::Read;
    use std::net::{IpAddr, Ipv4Addr, TcpListener};
    use std::time::Duration;

    fn identity(port: u16) -> ProcessIdentity {
        ProcessIdentity::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port, 1_700_000_000)
    }

    /// Returns the server side (as mio) and the client side (blocking std)
    fn connected_pair(listener: &TcpListener) -> (TcpStream, std::net::TcpStream) {
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    fn registry(poll: &Poll, capacity: usize) -> ClientRegistry {
        ClientRegistry::new(capacity, poll.registry().try_clone().unwrap())
    }

    #[test]
    fn test_save_uses_first_free_slot() {
        let poll = Poll::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut clients = registry(&poll, 3);
        let mut peers = Vec::new();

        for port in 1..=3 {
            let (stream, peer) = connected_pair(&listener);
            peers.push(peer);
            assert_eq!(clients.save(stream, identity(port)).unwrap(), port as usize - 1);
        }
        assert_eq!(clients.len(), 3);

        assert_eq!(
            clients.forget(ClientKey::Process(&identity(2))),
            Some(identity(2))
        );
        assert_eq!(clients.len(), 2);
        assert!(clients.get(1).is_none());

        let (stream, peer) = connected_pair(&listener);
        peers.push(peer);
        assert_eq!(clients.save(stream, identity(4)).unwrap(), 1);
    }

    #[test]
    fn test_save_when_full_closes_stream() {
        let poll = Poll::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut clients = registry(&poll, 1);

        let (stream, _first) = connected_pair(&listener);
        clients.save(stream, identity(1)).unwrap();

        let (stream, mut rejected) = connected_pair(&listener);
        let result = clients.save(stream, identity(2));
        assert!(matches!(result, Err(ServerError::ServerFull(1))));
        assert_eq!(clients.len(), 1);
        assert!(clients.lookup(ClientKey::Process(&identity(2))).is_none());

        rejected
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 8];
        match rejected.read(&mut buf) {
            Ok(n) => assert_eq!(n, 0),
            Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
        }
    }

    #[test]
    fn test_lookup_by_token_and_process() {
        let poll = Poll::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut clients = registry(&poll, 2);

        let (stream, _peer) = connected_pair(&listener);
        let index = clients.save(stream, identity(7)).unwrap();

        let (found, slot) = clients.lookup(ClientKey::Token(Token(index))).unwrap();
        assert_eq!(found, index);
        assert_eq!(slot.process, identity(7));
        assert!(slot.send_buffer.is_empty());

        let (found, _) = clients.lookup(ClientKey::Process(&identity(7))).unwrap();
        assert_eq!(found, index);

        assert!(clients.lookup(ClientKey::Token(Token(1))).is_none());
        assert!(clients.lookup(ClientKey::Token(Token(99))).is_none());
        assert!(clients.lookup(ClientKey::Process(&identity(8))).is_none());
    }

    #[test]
    fn test_pending_sends_and_drain() {
        let poll = Poll::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut clients = registry(&poll, 2);
        let mut peers = Vec::new();

        for port in [10, 11] {
            let (stream, peer) = connected_pair(&listener);
            peers.push(peer);
            clients.save(stream, identity(port)).unwrap();
        }
        assert!(!clients.has_pending_sends());

        let (_, slot) = clients.lookup_mut(ClientKey::Process(&identity(11))).unwrap();
        slot.send_buffer.extend_from_slice(b"hello");
        assert!(clients.has_pending_sends());

        assert_eq!(clients.processes(), vec![identity(10), identity(11)]);
        assert_eq!(clients.drain(), vec![identity(10), identity(11)]);
        assert!(clients.is_empty());
        assert_eq!(clients.capacity(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_capacity_and_uniqueness_hold(
            capacity in 1usize..4,
            ops in prop::collection::vec((any::<bool>(), 0usize..4), 1..16),
        ) {
            let poll = Poll::new().unwrap();
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let mut clients = registry(&poll, capacity);
            let mut peers = Vec::new();
            let mut next_port = 1u16;

            for (save, target) in ops {
                if save {
                    let before = clients.len();
                    let (stream, peer) = connected_pair(&listener);
                    peers.push(peer);
                    let result = clients.save(stream, identity(next_port));
                    next_port += 1;
                    prop_assert_eq!(result.is_err(), before == capacity);
                } else {
                    clients.forget(ClientKey::Token(Token(target)));
                }

                prop_assert!(clients.len() <= capacity);
                let processes = clients.processes();
                let unique: HashSet<_> = processes.iter().collect();
                prop_assert_eq!(unique.len(), processes.len());
            }
        }
    }
}
