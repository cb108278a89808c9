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

//! Shared fixtures for the bwnet end-to-end tests and benchmarks

use bwnet_server::{
    ProcessIdentity, QuitReason, Server, ServerConfig, ServerError, ServerHandle, ServerHandler,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Server event as seen by [`RecordingHandler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Join(ProcessIdentity),
    Message(ProcessIdentity, Bytes),
    Quit(ProcessIdentity, QuitReason),
    /// A reply sent through the handle was refused
    ReplyFailed(ProcessIdentity, String),
}

/// What [`RecordingHandler`] does with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reply {
    /// Record only
    #[default]
    Silent,
    /// Return the message as the reply
    Echo,
    /// Answer `ping` with `pong` through [`ServerHandle::send`]
    PingPong,
}

/// Handler that records every event in order
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
    reply: Reply,
}

impl RecordingHandler {
    pub fn new(reply: Reply) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            reply,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn joins(&self) -> Vec<ProcessIdentity> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Join(process) => Some(process),
                _ => None,
            })
            .collect()
    }

    pub fn quits(&self) -> Vec<(ProcessIdentity, QuitReason)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Quit(process, reason) => Some((process, reason)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ServerHandler for RecordingHandler {
    fn on_client_join(&self, _server: &ServerHandle, client: &ProcessIdentity) {
        self.record(Event::Join(client.clone()));
    }

    fn on_client_message(
        &self,
        server: &ServerHandle,
        client: &ProcessIdentity,
        message: Bytes,
    ) -> Option<Bytes> {
        self.record(Event::Message(client.clone(), message.clone()));
        match self.reply {
            Reply::Silent => None,
            Reply::Echo => Some(message),
            Reply::PingPong => {
                if message.as_ref() == b"ping" {
                    if let Err(error) = server.send(client, b"pong") {
                        debug!(client = %client, %error, "Pong not sent");
                        self.record(Event::ReplyFailed(client.clone(), error.to_string()));
                    }
                }
                None
            }
        }
    }

    fn on_client_quit(&self, _server: &ServerHandle, client: &ProcessIdentity, reason: QuitReason) {
        self.record(Event::Quit(client.clone(), reason));
    }
}

/// Start a loopback server on an ephemeral port
///
/// A two second shutdown timeout keeps a forgotten client from hanging a
/// test on `join`.
pub fn start_server(
    max_clients: usize,
    reply: Reply,
) -> Result<(Server, Arc<RecordingHandler>, SocketAddr), ServerError> {
    start_server_with(ServerConfig::new("127.0.0.1", 0).with_max_clients(max_clients), reply)
}

/// Start a loopback server from `config`, adding the two second shutdown
/// timeout
pub fn start_server_with(
    config: ServerConfig,
    reply: Reply,
) -> Result<(Server, Arc<RecordingHandler>, SocketAddr), ServerError> {
    let config = config.with_shutdown_timeout(Some(Duration::from_secs(2)));
    let server = Server::new(config);
    let handler = Arc::new(RecordingHandler::new(reply));
    let addr = server.init(handler.clone())?;
    Ok((server, handler, addr))
}

/// Poll `condition` every 10ms for up to three seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
