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

//! Reactor loop
//!
//! The reactor is the only code that reads from or writes to sockets. Each
//! pass it:
//!
//! 1. waits for readiness on the listener, every client and the waker,
//! 2. accepts pending connections into free slots,
//! 3. reads ready clients, one message per read of up to `buffer_size` bytes,
//! 4. writes every pending send buffer as far as the socket allows,
//! 5. tears the server down once a close was requested and no client is left.
//!
//! Readiness is edge triggered, so accepts and reads are drained until the
//! socket reports `WouldBlock`. A client's reads are interleaved with its
//! writes: the reply to one message is written out before the next message
//! is read. A client whose reply cannot be written yet is parked as stalled
//! and resumed on a later pass, its unread input left in the socket. Send
//! buffers are retried on every pass rather than only when their socket
//! reports writability.
//!
//! The registry lock is released before any handler callback runs.

use crate::registry::{ClientKey, ClientSlot};
use crate::{
    DISCONNECT_SENTINEL, ProcessIdentity, QuitReason, ServerError, ServerHandle, ServerHandler,
    ServerMetrics,
};
use bytes::{Buf, Bytes};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, Token};
use std::collections::HashSet;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info_span, trace, warn};

/// Token of the listening socket
pub(crate) const LISTENER: Token = Token(usize::MAX);
/// Token of the cross-thread waker
pub(crate) const WAKER: Token = Token(usize::MAX - 1);

pub(crate) struct Reactor {
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    server: ServerHandle,
    handler: Arc<dyn ServerHandler>,
    read_buf: Vec<u8>,
    /// Clients with unread input waiting on a reply to be written
    stalled: HashSet<Token>,
    /// Session this reactor was started for
    generation: u64,
}

/// Outcome of one read from a client socket
#[derive(Debug, PartialEq)]
enum Inbound {
    Message(Bytes),
    Quit(QuitReason),
    Drained,
}

/// Next thing to do for a client while reading it
enum ReadStep {
    Deliver(ProcessIdentity, Bytes),
    Release(ProcessIdentity, QuitReason),
    Stalled,
    Done,
}

impl Reactor {
    pub(crate) fn new(
        poll: Poll,
        listener: TcpListener,
        server: ServerHandle,
        handler: Arc<dyn ServerHandler>,
        generation: u64,
    ) -> Self {
        let config = server.config();
        Self {
            events: Events::with_capacity(config.events_capacity),
            read_buf: vec![0; config.buffer_size],
            stalled: HashSet::new(),
            poll,
            listener: Some(listener),
            server,
            handler,
            generation,
        }
    }

    fn show_logs(&self) -> bool {
        self.server.config().show_logs
    }

    fn metrics(&self) -> &ServerMetrics {
        &self.server.shared.metrics
    }

    /// Run until the server is torn down
    pub(crate) fn run(mut self) {
        let addr = self
            .listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok());
        let span = info_span!("bwnet_reactor", addr = ?addr);
        let _enter = span.enter();

        diag!(self.show_logs(), "Reactor started");

        while self.listener.is_some() {
            if let Err(error) = self.turn() {
                error!(?error, "Readiness wait failed, shutting down");
                self.shutdown_now();
            }
        }

        diag!(self.show_logs(), "Reactor stopped");
    }

    /// One pass of the loop
    fn turn(&mut self) -> io::Result<()> {
        let timeout = self.poll_timeout();
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(error) => return Err(error),
        }

        let ready: Vec<(Token, bool)> = self
            .events
            .iter()
            .map(|event| {
                let readable = event.is_readable() || event.is_read_closed() || event.is_error();
                (event.token(), readable)
            })
            .collect();
        let stalled = std::mem::take(&mut self.stalled);

        for &(token, readable) in &ready {
            match token {
                LISTENER => self.accept_clients(),
                WAKER => {}
                token if readable => self.read_client(token),
                _ => {}
            }
        }

        for token in stalled {
            if !ready.iter().any(|&(seen, readable)| seen == token && readable) {
                self.read_client(token);
            }
        }

        for token in self.flush_clients() {
            if self.stalled.remove(&token) {
                self.read_client(token);
            }
        }
        self.check_shutdown();
        Ok(())
    }

    /// How long the next readiness wait may block
    ///
    /// The configured loop interval, shortened to the remaining shutdown
    /// deadline while closing.
    fn poll_timeout(&self) -> Option<Duration> {
        let interval = self.server.config().loop_interval();
        let deadline = self.server.config().shutdown_timeout.and_then(|timeout| {
            let guard = self.server.shared.lock();
            let requested = guard.as_ref()?.close_requested_at?;
            Some(timeout.saturating_sub(requested.elapsed()))
        });

        match (interval, deadline) {
            (Some(interval), Some(deadline)) => Some(interval.min(deadline)),
            (interval, deadline) => interval.or(deadline),
        }
    }

    fn accept_clients(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        let show_logs = self.server.config().show_logs;
        let metrics = &self.server.shared.metrics;
        let mut joined = Vec::new();

        loop {
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(error) if error.kind() == ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error)
                    if matches!(
                        error.kind(),
                        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
                    ) =>
                {
                    debug!(?error, "Transient accept error");
                    continue;
                }
                Err(error) => {
                    error!(?error, "Error accepting connection");
                    break;
                }
            };

            let process = ProcessIdentity::accepted(peer);
            let mut guard = self.server.shared.lock();
            let Some(session) = guard.as_mut() else {
                break;
            };

            if session.is_closing() {
                drop(stream);
                metrics.client_rejected();
                diag!(show_logs, client = %process, "Rejecting connection while closing");
                continue;
            }

            match session.clients.save(stream, process.clone()) {
                Ok(slot) => {
                    metrics.client_accepted();
                    diag!(show_logs, client = %process, slot, "Client joined");
                    joined.push(process);
                }
                Err(ServerError::ServerFull(max_clients)) => {
                    metrics.client_rejected();
                    diag!(show_logs, client = %process, max_clients, "Server full, rejecting connection");
                }
                Err(error) => {
                    metrics.io_error();
                    warn!(client = %process, %error, "Failed to register client");
                }
            }
        }

        for process in joined {
            self.handler.on_client_join(&self.server, &process);
        }
    }

    /// Read a client until its socket is drained, it leaves, or its reply
    /// cannot be written yet
    fn read_client(&mut self, token: Token) {
        loop {
            match self.read_step(token) {
                ReadStep::Deliver(process, message) => self.deliver(&process, message),
                ReadStep::Release(process, reason) => {
                    self.release(&process, reason);
                    return;
                }
                ReadStep::Stalled => {
                    self.stalled.insert(token);
                    return;
                }
                ReadStep::Done => return,
            }
        }
    }

    /// Write out the pending reply, then read at most one message
    fn read_step(&mut self, token: Token) -> ReadStep {
        let mut guard = self.server.shared.lock();
        let Some(session) = guard.as_mut() else {
            return ReadStep::Done;
        };
        let Some((index, slot)) = session.clients.lookup_mut(ClientKey::Token(token)) else {
            return ReadStep::Done;
        };
        let metrics = &self.server.shared.metrics;

        if !slot.send_buffer.is_empty() {
            match flush_slot(slot, metrics) {
                Ok(true) => {
                    metrics.message_sent();
                    trace!(client = %slot.process, slot = index, "Send buffer flushed");
                }
                Ok(false) => return ReadStep::Stalled,
                Err(error) => {
                    debug!(client = %slot.process, ?error, "Write failed");
                    return ReadStep::Release(slot.process.clone(), QuitReason::from_io(&error));
                }
            }
        }

        match read_message(&mut slot.stream, &mut self.read_buf) {
            Inbound::Message(message) => ReadStep::Deliver(slot.process.clone(), message),
            Inbound::Quit(reason) => ReadStep::Release(slot.process.clone(), reason),
            Inbound::Drained => ReadStep::Done,
        }
    }

    fn deliver(&mut self, process: &ProcessIdentity, message: Bytes) {
        self.metrics().message_received(message.len());
        trace!(client = %process, len = message.len(), "Message received");

        if let Some(reply) = self
            .handler
            .on_client_message(&self.server, process, message)
        {
            if let Err(error) = self.server.send(process, &reply) {
                warn!(client = %process, %error, "Dropping reply");
            }
        }
    }

    /// Write every pending send buffer, returning the tokens fully flushed
    fn flush_clients(&mut self) -> Vec<Token> {
        let mut flushed = Vec::new();
        let failed: Vec<(ProcessIdentity, QuitReason)> = {
            let mut guard = self.server.shared.lock();
            let Some(session) = guard.as_mut() else {
                return flushed;
            };
            if !session.clients.has_pending_sends() {
                return flushed;
            }

            let metrics = &self.server.shared.metrics;
            session
                .clients
                .occupied_mut()
                .filter(|(_, slot)| !slot.send_buffer.is_empty())
                .filter_map(|(index, slot)| match flush_slot(slot, metrics) {
                    Ok(true) => {
                        metrics.message_sent();
                        trace!(client = %slot.process, slot = index, "Send buffer flushed");
                        flushed.push(Token(index));
                        None
                    }
                    Ok(false) => None,
                    Err(error) => {
                        debug!(client = %slot.process, ?error, "Write failed");
                        Some((slot.process.clone(), QuitReason::from_io(&error)))
                    }
                })
                .collect()
        };

        for (process, reason) in failed {
            self.release(&process, reason);
        }
        flushed
    }

    /// Report a client as gone and free its slot
    ///
    /// Skipped if the client has already been removed, for instance by a
    /// handler calling `disconnect`.
    fn release(&mut self, process: &ProcessIdentity, reason: QuitReason) {
        let present = self
            .server
            .shared
            .lock()
            .as_ref()
            .is_some_and(|session| session.clients.lookup(ClientKey::Process(process)).is_some());
        if !present {
            return;
        }

        if matches!(reason, QuitReason::TcpError { .. }) {
            self.metrics().io_error();
        }

        self.handler.on_client_quit(&self.server, process, reason);

        let forgotten = self
            .server
            .shared
            .lock()
            .as_mut()
            .and_then(|session| session.clients.forget(ClientKey::Process(process)));
        if forgotten.is_some() {
            self.metrics().client_released();
            diag!(self.show_logs(), client = %process, %reason, "Client left");
        }
    }

    fn check_shutdown(&mut self) {
        let expired = {
            let guard = self.server.shared.lock();
            let Some(session) = guard.as_ref() else {
                return;
            };
            let Some(requested) = session.close_requested_at else {
                return;
            };

            if !session.clients.is_empty() {
                match self.server.config().shutdown_timeout {
                    Some(timeout) if requested.elapsed() >= timeout => session.clients.processes(),
                    _ => return,
                }
            } else {
                Vec::new()
            }
        };

        if !expired.is_empty() {
            warn!(clients = expired.len(), "Shutdown timeout expired, dropping clients");
        }
        for process in expired {
            self.release(&process, QuitReason::ServerShutdown);
        }

        self.teardown();
    }

    /// Drop every client and tear down without waiting
    fn shutdown_now(&mut self) {
        for process in self.server.clients() {
            self.release(&process, QuitReason::ServerShutdown);
        }
        self.teardown();
    }

    /// Close the listener and end the session
    fn teardown(&mut self) {
        let mut guard = self.server.shared.lock();

        if let Some(mut listener) = self.listener.take() {
            if let Err(error) = self.poll.registry().deregister(&mut listener) {
                debug!(?error, "Failed to deregister listener");
            }
        }
        self.stalled.clear();

        if let Some(mut session) = guard.take_if(|session| session.generation == self.generation) {
            for process in session.clients.drain() {
                self.server.shared.metrics.client_released();
                debug!(client = %process, "Dropped client at teardown");
            }
            diag!(self.server.config().show_logs, addr = %session.local_addr, "Server closed");
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        // Reached with a live session only if the loop unwound early. A newer
        // session started by another `init` is left alone.
        let mut guard = self.server.shared.lock();
        if let Some(mut session) = guard.take_if(|session| session.generation == self.generation) {
            warn!(addr = %session.local_addr, "Reactor stopped with a live session");
            for _ in session.clients.drain() {
                self.server.shared.metrics.client_released();
            }
        }
    }
}

/// Read one message
///
/// A read of a lone disconnect sentinel is a quit, not a message.
fn read_message(stream: &mut TcpStream, buf: &mut [u8]) -> Inbound {
    loop {
        match stream.read(buf) {
            Ok(0) => return Inbound::Quit(QuitReason::ConnectionLost),
            Ok(1) if buf[0] == DISCONNECT_SENTINEL => {
                return Inbound::Quit(QuitReason::ClientClosedConnection);
            }
            Ok(n) => return Inbound::Message(Bytes::copy_from_slice(&buf[..n])),
            Err(error) if error.kind() == ErrorKind::WouldBlock => return Inbound::Drained,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Inbound::Quit(QuitReason::from_io(&error)),
        }
    }
}

/// Write as much of the send buffer as the socket accepts
///
/// Returns `Ok(true)` once the buffer is empty and `Ok(false)` if the socket
/// would block first.
fn flush_slot(slot: &mut ClientSlot, metrics: &ServerMetrics) -> io::Result<bool> {
    while !slot.send_buffer.is_empty() {
        match slot.stream.write(&slot.send_buffer) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => {
                metrics.bytes_sent(n);
                slot.send_buffer.advance(n);
            }
            Err(error) if error.kind() == ErrorKind::WouldBlock => return Ok(false),
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdListener;

    fn stream_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    /// Give loopback a moment to deliver before a non-blocking read
    fn settle() {
        std::thread::sleep(Duration::from_millis(50));
    }

    fn read_all(server: &mut TcpStream, buf: &mut [u8]) -> (Vec<Bytes>, Inbound) {
        let mut messages = Vec::new();
        loop {
            match read_message(server, buf) {
                Inbound::Message(message) => messages.push(message),
                other => return (messages, other),
            }
        }
    }

    #[test]
    fn test_read_message_would_block_without_data() {
        let (mut server, _client) = stream_pair();
        let mut buf = vec![0; 16];

        assert_eq!(read_message(&mut server, &mut buf), Inbound::Drained);
    }

    #[test]
    fn test_read_message_is_bounded_by_buffer_size() {
        let (mut server, mut client) = stream_pair();
        client.write_all(b"abcdef").unwrap();
        settle();

        let mut buf = vec![0; 4];
        assert_eq!(
            read_message(&mut server, &mut buf),
            Inbound::Message(Bytes::from_static(b"abcd"))
        );

        // The rest stays in the socket for the next read.
        let (messages, last) = read_all(&mut server, &mut buf);
        assert_eq!(messages, vec![Bytes::from_static(b"ef")]);
        assert_eq!(last, Inbound::Drained);
    }

    #[test]
    fn test_read_message_sentinel() {
        let (mut server, mut client) = stream_pair();
        client.write_all(&[DISCONNECT_SENTINEL]).unwrap();
        settle();

        let mut buf = vec![0; 16];
        assert_eq!(
            read_message(&mut server, &mut buf),
            Inbound::Quit(QuitReason::ClientClosedConnection)
        );
    }

    #[test]
    fn test_read_message_peer_closed() {
        let (mut server, mut client) = stream_pair();
        client.write_all(b"bye").unwrap();
        drop(client);
        settle();

        let mut buf = vec![0; 16];
        let (messages, last) = read_all(&mut server, &mut buf);
        assert_eq!(messages, vec![Bytes::from_static(b"bye")]);
        assert_eq!(last, Inbound::Quit(QuitReason::ConnectionLost));
    }

    #[test]
    fn test_stale_reactor_leaves_newer_session() {
        let server = crate::Server::new(
            crate::ServerConfig::new("127.0.0.1", 0).with_shutdown_timeout(Some(Duration::from_secs(2))),
        );
        server.init(Arc::new(crate::NoopHandler)).unwrap();
        server.close().unwrap();
        server.join().unwrap();
        server.init(Arc::new(crate::NoopHandler)).unwrap();

        // A reactor left over from the first session drops after the
        // second one started.
        let poll = Poll::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let stale = Reactor::new(poll, listener, server.handle(), Arc::new(crate::NoopHandler), 1);
        drop(stale);

        assert!(server.is_initialized());
        server.close().unwrap();
        server.join().unwrap();
    }
}
