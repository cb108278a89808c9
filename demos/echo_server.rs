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

//! Simple Echo Server Example
//!
//! This example demonstrates a bwnet echo server that:
//! - Accepts up to 16 clients on port 4000
//! - Echoes back every message it receives
//! - Greets each client when it joins
//! - Sends every client the disconnect byte on Ctrl+C and waits for them to leave
//!
//! ## Usage
//!
//! Run the server:
//! ```bash
//! cargo run --example echo_server
//! ```
//!
//! Connect with the bundled client:
//! ```bash
//! cargo run --example simple_client
//! ```

use bwnet_server::{
    ProcessIdentity, QuitReason, Server, ServerConfig, ServerHandle, ServerHandler,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    println!("Starting bwnet Echo Server on 127.0.0.1:4000");
    println!("Press Ctrl+C to stop the server\n");

    // Configure the server
    let config = ServerConfig::new("127.0.0.1", 4000)
        .with_max_clients(16)
        .with_show_logs(true)
        .with_shutdown_timeout(Some(Duration::from_secs(5)));

    // Create and start the server
    let server = Server::new(config);
    server.init(Arc::new(EchoHandler))?;

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down server...");

    // Graceful shutdown
    server.close()?;
    server.join()?;
    println!(
        "Server stopped after echoing {} messages",
        server.metrics().snapshot().messages_received
    );

    Ok(())
}

/// Custom handler for the echo server
struct EchoHandler;

impl ServerHandler for EchoHandler {
    fn on_client_join(&self, server: &ServerHandle, client: &ProcessIdentity) {
        tracing::info!("Client {} joined", client);

        if let Err(e) = server.send(client, b"Welcome to the bwnet echo server\r\n") {
            tracing::error!("Failed to greet {}: {}", client, e);
        }
    }

    fn on_client_message(
        &self,
        _server: &ServerHandle,
        client: &ProcessIdentity,
        message: Bytes,
    ) -> Option<Bytes> {
        tracing::debug!("Client {} sent {} bytes", client, message.len());
        Some(message)
    }

    fn on_client_quit(&self, _server: &ServerHandle, client: &ProcessIdentity, reason: QuitReason) {
        tracing::info!("Client {} left: {}", client, reason);
    }
}
