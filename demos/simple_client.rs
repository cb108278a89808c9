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

//! Simple Client Example
//!
//! Connects to the echo server, sends each line typed on stdin and prints
//! what comes back. An empty line or end of input disconnects.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example echo_server
//! cargo run --example simple_client
//! ```

use bwnet_client::{Client, ClientConfig, ClientEvent};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ClientConfig::new("127.0.0.1", 4000)
        .with_connect_timeout(Duration::from_secs(5))
        .with_read_timeout(Some(Duration::from_secs(10)));

    let mut client = Client::connect(config).await?;
    println!("Connected from {}", client.local_addr()?);

    // Greeting
    if let ClientEvent::Message(greeting) = client.recv().await? {
        print!("{}", String::from_utf8_lossy(&greeting));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            break;
        }

        client.send(line.as_bytes()).await?;
        match client.recv().await? {
            ClientEvent::Message(reply) => println!("< {}", String::from_utf8_lossy(&reply)),
            ClientEvent::Disconnected => {
                println!("Server closed the connection");
                return Ok(());
            }
        }
    }

    client.disconnect().await?;
    println!("Disconnected");
    Ok(())
}
