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

//! bwnet client implementation

use crate::{ClientConfig, ClientError, Result};
use bwnet_server::DISCONNECT_SENTINEL;
use bytes::Bytes;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected and active
    Connected,
    /// Either side ended the connection
    Disconnected,
}

/// Something received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// One read worth of bytes
    Message(Bytes),
    /// The server sent the disconnect byte or closed the socket
    Disconnected,
}

/// bwnet client
///
/// Holds one connection to a bwnet server. Like the server, it does no
/// framing: every successful read is returned as one message.
pub struct Client {
    config: ClientConfig,
    stream: TcpStream,
    read_buf: Vec<u8>,
    state: ConnectionState,
}

impl Client {
    /// Connect to the server named by `config`
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let addr = config.address();
        debug!(%addr, "Connecting");

        let stream = match timeout(config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ClientError::ConnectTimeout(config.connect_timeout)),
        };
        stream.set_nodelay(true)?;

        info!(peer = %stream.peer_addr()?, "Connected");

        Ok(Self {
            read_buf: vec![0; config.buffer_size.max(1)],
            config,
            stream,
            state: ConnectionState::Connected,
        })
    }

    /// Write a message to the server
    ///
    /// Empty messages and the lone disconnect byte are refused with
    /// [`ClientError::ReservedMessage`].
    pub async fn send(&mut self, message: &[u8]) -> Result<()> {
        if message.is_empty() || message == [DISCONNECT_SENTINEL] {
            return Err(ClientError::ReservedMessage);
        }
        self.ensure_connected()?;

        if let Err(error) = self.stream.write_all(message).await {
            self.state = ConnectionState::Disconnected;
            return Err(error.into());
        }
        Ok(())
    }

    /// Wait for the next message
    ///
    /// Returns [`ClientEvent::Disconnected`] once the server has sent the
    /// disconnect byte or closed the socket. Later calls fail with
    /// [`ClientError::Closed`].
    pub async fn recv(&mut self) -> Result<ClientEvent> {
        self.ensure_connected()?;

        let read = self.stream.read(&mut self.read_buf);
        let result = match self.config.read_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| ClientError::ReadTimeout(limit))?,
            None => read.await,
        };

        match result {
            Ok(0) => {
                debug!("Server closed connection");
                self.state = ConnectionState::Disconnected;
                Ok(ClientEvent::Disconnected)
            }
            Ok(1) if self.read_buf[0] == DISCONNECT_SENTINEL => {
                info!("Server asked to disconnect");
                self.state = ConnectionState::Disconnected;
                Ok(ClientEvent::Disconnected)
            }
            Ok(n) => Ok(ClientEvent::Message(Bytes::copy_from_slice(
                &self.read_buf[..n],
            ))),
            Err(error) => {
                self.state = ConnectionState::Disconnected;
                Err(error.into())
            }
        }
    }

    /// Tell the server we are leaving and close the write side
    ///
    /// Does nothing if the connection has already ended.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        self.state = ConnectionState::Disconnected;

        let result = async {
            self.stream.write_all(&[DISCONNECT_SENTINEL]).await?;
            self.stream.shutdown().await
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            // The server got there first.
            Err(error)
                if matches!(
                    error.kind(),
                    ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::NotConnected
                ) =>
            {
                debug!(?error, "Server already gone");
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection is still open
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Local address of the connection, as the server sees our identity
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Address of the server
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Configuration the client was connected with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => Err(ClientError::Closed),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.stream.peer_addr().ok())
            .field("state", &self.state)
            .finish()
    }
}
