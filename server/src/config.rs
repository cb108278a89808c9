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

//! Server configuration

use crate::{Result, ServerError};
use std::time::Duration;

/// Highest port number accepted by [`ServerConfig::validate`]
pub const MAX_PORT: u32 = u16::MAX as u32;

/// Default number of bytes read from a client per message
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Server configuration
///
/// This structure contains all configuration options for the bwnet server.
/// Use the builder pattern methods to customize the configuration.
///
/// # Example
///
/// ```
/// use bwnet_server::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::new("127.0.0.1", 4000)
///     .with_max_clients(8)
///     .with_loop_fps(60)
///     .with_shutdown_timeout(Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host or address to bind the listening socket to
    pub host: String,

    /// Port to bind to
    ///
    /// Stored wider than `u16` so that out of range values can be reported
    /// as [`ServerError::InvalidPort`] instead of being truncated.
    pub port: u32,

    /// Number of client slots, fixed for the lifetime of a session
    pub max_clients: usize,

    /// Maximum number of bytes consumed by a single read
    ///
    /// Every read is delivered to the handler as one message.
    pub buffer_size: usize,

    /// Reactor wake-up rate
    ///
    /// `0` blocks until a socket becomes ready. Any other value makes the
    /// reactor wake at least every `1 / loop_fps` seconds.
    pub loop_fps: u32,

    /// Emit lifecycle diagnostics at `info` instead of `trace`
    pub show_logs: bool,

    /// Upper bound on how long a requested close may wait for clients
    ///
    /// `None` waits for every client to leave on its own.
    pub shutdown_timeout: Option<Duration>,

    /// Capacity of the readiness event buffer used per poll
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            max_clients: 16,
            buffer_size: DEFAULT_BUFFER_SIZE,
            loop_fps: 0,
            show_logs: false,
            shutdown_timeout: None,
            events_capacity: 128,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration for the given host and port
    ///
    /// All other settings will use their default values.
    pub fn new(host: impl Into<String>, port: u32) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the number of client slots
    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Set the per-read buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the reactor wake-up rate
    pub fn with_loop_fps(mut self, fps: u32) -> Self {
        self.loop_fps = fps;
        self
    }

    /// Enable or disable lifecycle diagnostics
    pub fn with_show_logs(mut self, enabled: bool) -> Self {
        self.show_logs = enabled;
        self
    }

    /// Set the shutdown deadline
    pub fn with_shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the readiness event buffer capacity
    pub fn with_events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    /// Interval the reactor waits for readiness before looping again
    pub fn loop_interval(&self) -> Option<Duration> {
        match self.loop_fps {
            0 => None,
            fps => Some(Duration::from_secs_f64(1.0 / f64::from(fps))),
        }
    }

    /// The port as a `u16`, once validated
    pub fn port_u16(&self) -> Result<u16> {
        u16::try_from(self.port).map_err(|_| ServerError::InvalidPort(self.port))
    }

    /// Validate the configuration
    ///
    /// The port is checked first so that a bad port is reported before any
    /// other problem, matching what [`Server::init`](crate::Server::init)
    /// returns.
    pub fn validate(&self) -> Result<()> {
        if self.port > MAX_PORT {
            return Err(ServerError::InvalidPort(self.port));
        }

        if self.buffer_size == 0 {
            return Err(ServerError::InvalidConfig(
                "buffer_size must be greater than 0".to_string(),
            ));
        }

        if self.events_capacity == 0 {
            return Err(ServerError::InvalidConfig(
                "events_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
