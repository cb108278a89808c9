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

//! Handler traits and implementations for the bwnet server

use crate::{ProcessIdentity, QuitReason, ServerHandle};
use bytes::Bytes;

/// Server event handler trait
///
/// Implement this trait to react to clients joining, talking and leaving.
/// All methods have default implementations that do nothing.
///
/// Every method runs synchronously on the reactor thread. While a method is
/// running no socket is read or written, so a slow handler stalls every
/// client. The registry lock is not held during these calls, so the handler
/// may freely call back into `server`.
///
/// # Example
///
/// ```no_run
/// use bwnet_server::{ProcessIdentity, ServerHandle, ServerHandler};
/// use bytes::Bytes;
///
/// struct Echo;
///
/// impl ServerHandler for Echo {
///     fn on_client_message(
///         &self,
///         _server: &ServerHandle,
///         _client: &ProcessIdentity,
///         message: Bytes,
///     ) -> Option<Bytes> {
///         Some(message)
///     }
/// }
/// ```
pub trait ServerHandler: Send + Sync + 'static {
    /// Called after a new client has been given a slot
    fn on_client_join(&self, _server: &ServerHandle, _client: &ProcessIdentity) {}

    /// Called for every read from a client
    ///
    /// A returned value is queued back to the same client as if
    /// [`ServerHandle::send`] had been called with it.
    fn on_client_message(
        &self,
        _server: &ServerHandle,
        _client: &ProcessIdentity,
        _message: Bytes,
    ) -> Option<Bytes> {
        None
    }

    /// Called right before a client's slot is released by the reactor
    ///
    /// Clients removed through [`ServerHandle::disconnect`] do not trigger
    /// this callback.
    fn on_client_quit(&self, _server: &ServerHandle, _client: &ProcessIdentity, _reason: QuitReason) {
    }
}

/// Handler that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl ServerHandler for NoopHandler {}

type JoinCallback = Box<dyn Fn(&ServerHandle, &ProcessIdentity) + Send + Sync + 'static>;
type MessageCallback =
    Box<dyn Fn(&ServerHandle, &ProcessIdentity, Bytes) -> Option<Bytes> + Send + Sync + 'static>;
type QuitCallback = Box<dyn Fn(&ServerHandle, &ProcessIdentity, QuitReason) + Send + Sync + 'static>;

/// Callback-based handler implementation
///
/// This provides a way to implement handlers using closures instead of
/// implementing the `ServerHandler` trait.
///
/// # Example
///
/// ```no_run
/// use bwnet_server::CallbackHandler;
/// use std::sync::Arc;
///
/// let handler = Arc::new(CallbackHandler {
///     on_client_join: Some(Box::new(|_server, client| {
///         println!("{} joined", client);
///     })),
///     on_client_quit: Some(Box::new(|_server, client, reason| {
///         println!("{} left: {}", client, reason);
///     })),
///     ..Default::default()
/// });
/// ```
#[derive(Default)]
pub struct CallbackHandler {
    /// Called when a client is given a slot
    pub on_client_join: Option<JoinCallback>,
    /// Called for every message
    pub on_client_message: Option<MessageCallback>,
    /// Called when a client leaves
    pub on_client_quit: Option<QuitCallback>,
}

impl ServerHandler for CallbackHandler {
    fn on_client_join(&self, server: &ServerHandle, client: &ProcessIdentity) {
        if let Some(ref f) = self.on_client_join {
            f(server, client);
        }
    }

    fn on_client_message(
        &self,
        server: &ServerHandle,
        client: &ProcessIdentity,
        message: Bytes,
    ) -> Option<Bytes> {
        match self.on_client_message {
            Some(ref f) => f(server, client, message),
            None => None,
        }
    }

    fn on_client_quit(&self, server: &ServerHandle, client: &ProcessIdentity, reason: QuitReason) {
        if let Some(ref f) = self.on_client_quit {
            f(server, client, reason);
        }
    }
}

impl std::fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("on_client_join", &self.on_client_join.is_some())
            .field("on_client_message", &self.on_client_message.is_some())
            .field("on_client_quit", &self.on_client_quit.is_some())
            .finish()
    }
}
