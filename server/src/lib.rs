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

//! # bwnet Server
//!
//! Small TCP server that keeps clients in a fixed-size table and performs
//! all socket I/O on a single reactor thread.
//!
//! ## Features
//!
//! - **Fixed Client Table** - At most `max_clients` connections, extras are closed at accept
//! - **Single Reactor Thread** - One readiness loop accepts, reads and writes
//! - **One Message In Flight** - Each client holds at most one pending outbound message
//! - **Event Hooks** - Join, message and quit callbacks through [`ServerHandler`]
//! - **Graceful Close** - Clients are sent a disconnect byte and drained before teardown
//!
//! ## Wire Format
//!
//! There is no framing. Each read of up to `buffer_size` bytes is delivered
//! as one message. A read consisting of the single byte
//! [`DISCONNECT_SENTINEL`] means the peer is leaving.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bwnet_server::{ProcessIdentity, Server, ServerConfig, ServerHandle, ServerHandler};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     fn on_client_join(&self, _server: &ServerHandle, client: &ProcessIdentity) {
//!         println!("{} joined", client);
//!     }
//!
//!     fn on_client_message(
//!         &self,
//!         _server: &ServerHandle,
//!         _client: &ProcessIdentity,
//!         message: Bytes,
//!     ) -> Option<Bytes> {
//!         Some(message)
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new("0.0.0.0", 4000)
//!         .with_max_clients(32)
//!         .with_show_logs(true);
//!
//!     let server = Server::new(config);
//!     server.init(Arc::new(Echo))?;
//!     server.join()?;
//!     Ok(())
//! }
//! ```

/// Log a lifecycle event at `info` when `show_logs` is set, `trace` otherwise
macro_rules! diag {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::info!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

mod config;
mod error;
mod handler;
mod metrics;
mod reactor;
mod registry;
mod server;
mod types;

/// Byte that, received or sent on its own, announces a disconnect
pub const DISCONNECT_SENTINEL: u8 = 0x00;

pub use config::{DEFAULT_BUFFER_SIZE, MAX_PORT, ServerConfig};
pub use error::{QuitReason, Result, ServerError};
pub use handler::{CallbackHandler, NoopHandler, ServerHandler};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use server::{Server, ServerHandle};
pub use types::{ProcessIdentity, ServerSnapshot, ServerState};
