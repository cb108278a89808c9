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

//! bwnet server implementation
//!
//! [`Server`] owns the lifecycle (`init`, `close`, `join`). Everything that
//! queries or mutates the client table lives on [`ServerHandle`], which is
//! cheap to clone and is what event handlers receive.
//!
//! The client table is shared between the caller's threads and the reactor
//! thread and sits behind a single mutex. Calls from other threads nudge the
//! reactor through a selector waker so queued sends are flushed promptly.

use crate::reactor::{LISTENER, Reactor, WAKER};
use crate::registry::{ClientKey, ClientRegistry};
use crate::{
    DISCONNECT_SENTINEL, ProcessIdentity, Result, ServerConfig, ServerError, ServerHandler,
    ServerMetrics, ServerSnapshot, ServerState,
};
use bytes::BufMut;
use mio::net::TcpListener;
use mio::{Interest, Poll, Waker};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

/// State shared between the control API and the reactor
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) metrics: Arc<ServerMetrics>,
    session: Mutex<Option<Session>>,
    sessions_started: AtomicU64,
}

impl Shared {
    /// Lock the session, recovering from a poisoned lock
    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything that exists between `init` and teardown
pub(crate) struct Session {
    pub(crate) clients: ClientRegistry,
    pub(crate) local_addr: SocketAddr,
    pub(crate) started_at: Instant,
    pub(crate) close_requested_at: Option<Instant>,
    /// Distinguishes this session from earlier ones on the same server
    pub(crate) generation: u64,
    waker: Waker,
}

impl Session {
    pub(crate) fn state(&self) -> ServerState {
        match self.close_requested_at {
            Some(_) => ServerState::Closing,
            None => ServerState::Running,
        }
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.close_requested_at.is_some()
    }

    /// Make the reactor run a pass
    pub(crate) fn wake(&self) {
        if let Err(error) = self.waker.wake() {
            warn!(?error, "Failed to wake reactor");
        }
    }
}

/// Handle to a running server
///
/// Handles are cheap to clone and can be used from any thread, including
/// from inside a [`ServerHandler`] callback.
#[derive(Clone)]
pub struct ServerHandle {
    pub(crate) shared: Arc<Shared>,
}

impl ServerHandle {
    /// Queue a message for a client
    ///
    /// Each client holds at most one pending message. Sending again before
    /// the reactor has written the previous one fails with
    /// [`ServerError::AlreadySending`]. An empty message is accepted and
    /// ignored.
    pub fn send(&self, client: &ProcessIdentity, message: &[u8]) -> Result<()> {
        let mut guard = self.shared.lock();
        let session = guard.as_mut().ok_or(ServerError::NotInitialized)?;

        let (slot_index, slot) = session
            .clients
            .lookup_mut(ClientKey::Process(client))
            .ok_or_else(|| ServerError::ClientNotFound(client.clone()))?;

        if !slot.send_buffer.is_empty() {
            return Err(ServerError::AlreadySending(client.clone()));
        }
        if message.is_empty() {
            return Ok(());
        }

        slot.send_buffer.extend_from_slice(message);
        debug!(client = %client, slot = slot_index, len = message.len(), "Queued message");
        session.wake();
        Ok(())
    }

    /// Drop a client immediately
    ///
    /// The socket is closed right away without waiting for the reactor and
    /// without calling [`ServerHandler::on_client_quit`].
    pub fn disconnect(&self, client: &ProcessIdentity) -> Result<()> {
        let mut guard = self.shared.lock();
        let session = guard.as_mut().ok_or(ServerError::NotInitialized)?;

        session
            .clients
            .forget(ClientKey::Process(client))
            .ok_or_else(|| ServerError::ClientNotFound(client.clone()))?;
        self.shared.metrics.client_released();

        diag!(self.shared.config.show_logs, client = %client, "Disconnected client");

        // A closing reactor may be waiting for this slot to empty.
        session.wake();
        Ok(())
    }

    /// Ask the server to shut down
    ///
    /// Every connected client is sent the disconnect sentinel. The reactor
    /// tears the server down once the last client has left (or once the
    /// configured shutdown timeout expires). Calling `close` again while
    /// closing has no further effect.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.shared.lock();
        let session = guard.as_mut().ok_or(ServerError::NotInitialized)?;

        if session.is_closing() {
            return Ok(());
        }
        session.close_requested_at = Some(Instant::now());

        for (_, slot) in session.clients.occupied_mut() {
            slot.send_buffer.put_u8(DISCONNECT_SENTINEL);
        }

        diag!(
            self.shared.config.show_logs,
            clients = session.clients.len(),
            "Close requested"
        );
        session.wake();
        Ok(())
    }

    /// Number of connected clients
    pub fn clients_count(&self) -> usize {
        self.shared
            .lock()
            .as_ref()
            .map_or(0, |session| session.clients.len())
    }

    /// Identity of the client in slot `index`
    ///
    /// Returns `None` when the index is out of range or the slot is free.
    pub fn client_by_id(&self, index: usize) -> Option<ProcessIdentity> {
        self.shared
            .lock()
            .as_ref()?
            .clients
            .get(index)
            .map(|slot| slot.process.clone())
    }

    /// Identities of all connected clients in slot order
    pub fn clients(&self) -> Vec<ProcessIdentity> {
        self.shared
            .lock()
            .as_ref()
            .map(|session| session.clients.processes())
            .unwrap_or_default()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        self.shared
            .lock()
            .as_ref()
            .map_or(ServerState::Stopped, Session::state)
    }

    /// Check if the server holds a live session
    pub fn is_initialized(&self) -> bool {
        self.state().is_initialized()
    }

    /// Address the listener is bound to, while initialized
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().as_ref().map(|session| session.local_addr)
    }

    /// Get a snapshot of the server state
    pub fn snapshot(&self) -> ServerSnapshot {
        let guard = self.shared.lock();
        match guard.as_ref() {
            Some(session) => ServerSnapshot {
                state: session.state(),
                active_clients: session.clients.len(),
                max_clients: session.clients.capacity(),
                local_addr: Some(session.local_addr),
                uptime: Some(session.started_at.elapsed()),
            },
            None => ServerSnapshot {
                state: ServerState::Stopped,
                active_clients: 0,
                max_clients: self.shared.config.max_clients,
                local_addr: None,
                uptime: None,
            },
        }
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.shared.metrics.clone()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("state", &self.state())
            .field("clients", &self.clients_count())
            .finish()
    }
}

/// bwnet server
///
/// A server binds one listening socket and runs one reactor thread that
/// performs all socket I/O. Clients occupy one of `max_clients` fixed slots.
///
/// # Example
///
/// ```no_run
/// use bwnet_server::{NoopHandler, Server, ServerConfig};
/// use std::sync::Arc;
///
/// let server = Server::new(ServerConfig::new("127.0.0.1", 4000).with_max_clients(8));
/// let addr = server.init(Arc::new(NoopHandler))?;
/// println!("listening on {}", addr);
///
/// server.close()?;
/// server.join()?;
/// # Ok::<(), bwnet_server::ServerError>(())
/// ```
pub struct Server {
    handle: ServerHandle,
    reactor: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Create a stopped server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self {
            handle: ServerHandle {
                shared: Arc::new(Shared {
                    config,
                    metrics: Arc::new(ServerMetrics::new()),
                    session: Mutex::new(None),
                    sessions_started: AtomicU64::new(0),
                }),
            },
            reactor: Mutex::new(None),
        }
    }

    /// Bind the listener and start the reactor thread
    ///
    /// Fails with [`ServerError::AlreadyInitialized`] while a previous
    /// session is still running or closing, with
    /// [`ServerError::InvalidPort`] before any socket is created when the
    /// configured port is out of range, and with [`ServerError::Tcp`] when
    /// the address cannot be resolved or bound.
    pub fn init(&self, handler: Arc<dyn ServerHandler>) -> Result<SocketAddr> {
        let mut reactor = self.reactor.lock().unwrap_or_else(PoisonError::into_inner);
        if self.handle.is_initialized() {
            return Err(ServerError::AlreadyInitialized);
        }

        // The previous reactor has already torn its session down.
        if let Some(previous) = reactor.take() {
            if previous.join().is_err() {
                warn!("Previous reactor thread panicked");
            }
        }

        let config = &self.handle.shared.config;
        config.validate()?;
        let port = config.port_u16()?;

        let mut guard = self.handle.shared.lock();
        if guard.is_some() {
            return Err(ServerError::AlreadyInitialized);
        }

        let bind_addr = (config.host.as_str(), port)
            .to_socket_addrs()
            .map_err(ServerError::tcp)?
            .next()
            .ok_or_else(|| {
                ServerError::tcp(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} resolved to no address", config.host),
                ))
            })?;

        let mut listener = TcpListener::bind(bind_addr).map_err(ServerError::tcp)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let clients = ClientRegistry::new(config.max_clients, poll.registry().try_clone()?);
        let generation = self.handle.shared.sessions_started.fetch_add(1, Ordering::Relaxed) + 1;

        *guard = Some(Session {
            clients,
            local_addr,
            started_at: Instant::now(),
            close_requested_at: None,
            generation,
            waker,
        });
        drop(guard);

        // A reactor that never starts clears the session when dropped.
        let worker = Reactor::new(poll, listener, self.handle.clone(), handler, generation);
        let join = thread::Builder::new()
            .name("bwnet-reactor".to_string())
            .spawn(move || worker.run())?;
        *reactor = Some(join);

        diag!(
            config.show_logs,
            addr = %local_addr,
            max_clients = config.max_clients,
            "Server accepting connections"
        );

        Ok(local_addr)
    }

    /// Wait for the reactor thread to finish
    ///
    /// Returns immediately if the server was never initialized. Blocks
    /// indefinitely if `close` has not been requested.
    pub fn join(&self) -> Result<()> {
        let previous = self
            .reactor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match previous {
            Some(join) => join
                .join()
                .map_err(|_| ServerError::Io(io::Error::other("reactor thread panicked"))),
            None => Ok(()),
        }
    }

    /// Get a handle usable from other threads
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// See [`ServerHandle::close`]
    pub fn close(&self) -> Result<()> {
        self.handle.close()
    }

    /// See [`ServerHandle::send`]
    pub fn send(&self, client: &ProcessIdentity, message: &[u8]) -> Result<()> {
        self.handle.send(client, message)
    }

    /// See [`ServerHandle::disconnect`]
    pub fn disconnect(&self, client: &ProcessIdentity) -> Result<()> {
        self.handle.disconnect(client)
    }

    /// See [`ServerHandle::clients_count`]
    pub fn clients_count(&self) -> usize {
        self.handle.clients_count()
    }

    /// See [`ServerHandle::client_by_id`]
    pub fn client_by_id(&self, index: usize) -> Option<ProcessIdentity> {
        self.handle.client_by_id(index)
    }

    /// See [`ServerHandle::clients`]
    pub fn clients(&self) -> Vec<ProcessIdentity> {
        self.handle.clients()
    }

    /// See [`ServerHandle::state`]
    pub fn state(&self) -> ServerState {
        self.handle.state()
    }

    /// See [`ServerHandle::is_initialized`]
    pub fn is_initialized(&self) -> bool {
        self.handle.is_initialized()
    }

    /// See [`ServerHandle::local_addr`]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.local_addr()
    }

    /// See [`ServerHandle::snapshot`]
    pub fn snapshot(&self) -> ServerSnapshot {
        self.handle.snapshot()
    }

    /// See [`ServerHandle::metrics`]
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.handle.metrics()
    }

    /// See [`ServerHandle::config`]
    pub fn config(&self) -> &ServerConfig {
        self.handle.config()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("state", &self.state())
            .field("clients", &self.clients_count())
            .finish()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.handle.state() == ServerState::Running {
            warn!("Server dropped while still running, requesting close");
            if let Err(error) = self.handle.close() {
                warn!(%error, "Close on drop failed");
            }
        }
    }
}
