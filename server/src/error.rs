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

//! Error types for the bwnet server

use crate::types::ProcessIdentity;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error types
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server has not been initialized, or has already torn down
    #[error("Server not initialized")]
    NotInitialized,

    /// `init` was called on a server that is still running or closing
    #[error("Server already initialized")]
    AlreadyInitialized,

    /// Port outside `0..=65535`
    #[error("Invalid port {0}")]
    InvalidPort(u32),

    /// Configuration rejected before binding
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Address resolution or bind failure
    #[error("TCP error (errno {errno:?}): {source}")]
    Tcp {
        /// OS error number, when the OS reported one
        errno: Option<i32>,
        /// The underlying error
        #[source]
        source: io::Error,
    },

    /// No free client slot
    #[error("Server full ({0} clients)")]
    ServerFull(usize),

    /// No client with the given identity is registered
    #[error("Client {0} not found")]
    ClientNotFound(ProcessIdentity),

    /// The client still has an unsent message buffered
    #[error("Client {0} is already sending")]
    AlreadySending(ProcessIdentity),

    /// I/O error outside of binding
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Wrap a resolve/bind failure, capturing its errno
    pub fn tcp(source: io::Error) -> Self {
        ServerError::Tcp {
            errno: source.raw_os_error(),
            source,
        }
    }

    /// OS error number carried by this error, if any
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ServerError::Tcp { errno, .. } => *errno,
            ServerError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Check if the error concerns a single client rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::ClientNotFound(_) | ServerError::AlreadySending(_)
        )
    }

    /// Check if the error can only come out of `init`
    pub fn is_init_error(&self) -> bool {
        matches!(
            self,
            ServerError::AlreadyInitialized
                | ServerError::InvalidPort(_)
                | ServerError::InvalidConfig(_)
                | ServerError::Tcp { .. }
        )
    }
}

/// Why a client left, as reported to
/// [`ServerHandler::on_client_quit`](crate::ServerHandler::on_client_quit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitReason {
    /// The client sent the disconnect sentinel
    ClientClosedConnection,
    /// The peer closed its end of the socket
    ConnectionLost,
    /// A read or write on the socket failed
    TcpError {
        /// Kind of the failure
        kind: io::ErrorKind,
        /// OS error number, when the OS reported one
        errno: Option<i32>,
    },
    /// The shutdown deadline expired while the client was still connected
    ServerShutdown,
}

impl QuitReason {
    pub(crate) fn from_io(error: &io::Error) -> Self {
        QuitReason::TcpError {
            kind: error.kind(),
            errno: error.raw_os_error(),
        }
    }

    /// Check if the client asked to leave
    pub fn is_voluntary(&self) -> bool {
        matches!(self, QuitReason::ClientClosedConnection)
    }
}

impl fmt::Display for QuitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuitReason::ClientClosedConnection => write!(f, "client closed connection"),
            QuitReason::ConnectionLost => write!(f, "connection lost"),
            QuitReason::TcpError {
                kind,
                errno: Some(errno),
            } => write!(f, "tcp error: {} (errno {})", kind, errno),
            QuitReason::TcpError { kind, errno: None } => write!(f, "tcp error: {}", kind),
            QuitReason::ServerShutdown => write!(f, "server shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn identity() -> ProcessIdentity {
        ProcessIdentity::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000, 1_700_000_000)
    }

    #[test]
    fn test_error_display() {
        let err = ServerError::ClientNotFound(identity());
        assert_eq!(err.to_string(), "Client 127.0.0.1:5000 not found");

        let err = ServerError::ServerFull(4);
        assert_eq!(err.to_string(), "Server full (4 clients)");

        let err = ServerError::InvalidPort(70000);
        assert_eq!(err.to_string(), "Invalid port 70000");
    }

    #[test]
    fn test_tcp_error_keeps_errno() {
        let err = ServerError::tcp(io::Error::from_raw_os_error(98));
        assert_eq!(err.raw_os_error(), Some(98));
        assert!(err.is_init_error());

        assert_eq!(ServerError::NotInitialized.raw_os_error(), None);
    }

    #[test]
    fn test_error_classification() {
        assert!(ServerError::AlreadySending(identity()).is_client_error());
        assert!(ServerError::ClientNotFound(identity()).is_client_error());
        assert!(!ServerError::NotInitialized.is_client_error());
        assert!(!ServerError::ServerFull(1).is_init_error());
    }

    #[test]
    fn test_quit_reason() {
        assert!(QuitReason::ClientClosedConnection.is_voluntary());
        assert!(!QuitReason::ConnectionLost.is_voluntary());

        let reason = QuitReason::from_io(&io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(
            reason,
            QuitReason::TcpError {
                kind: io::ErrorKind::ConnectionReset,
                errno: None
            }
        );
        assert_eq!(reason.to_string(), "tcp error: connection reset");
    }
}
