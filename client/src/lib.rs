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

//! # bwnet Client
//!
//! Async client for talking to a bwnet server.
//!
//! The server delivers every read as one message and treats a lone `0x00`
//! byte as "goodbye" in both directions. This client follows the same
//! rules, so it refuses to send that byte as data and reports it as
//! [`ClientEvent::Disconnected`] when the server sends it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bwnet_client::{Client, ClientConfig, ClientEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("localhost", 4000).with_buffer_size(256);
//!     let mut client = Client::connect(config).await?;
//!
//!     client.send(b"hello").await?;
//!     match client.recv().await? {
//!         ClientEvent::Message(reply) => println!("{:?}", reply),
//!         ClientEvent::Disconnected => println!("server left"),
//!     }
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;

pub use client::{Client, ClientEvent, ConnectionState};
pub use config::ClientConfig;
pub use error::{ClientError, Result};

// Re-export the wire constant shared with the server
pub use bwnet_server::DISCONNECT_SENTINEL;
