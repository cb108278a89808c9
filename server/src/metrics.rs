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

//! Lock-free metrics for the bwnet server
//!
//! Every update is also forwarded to the `metrics` facade under `bwnet.*`
//! names so an installed recorder sees the same numbers.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free server metrics
///
/// All metrics are stored as atomics and can be accessed concurrently
/// without locks. Use the `snapshot()` method to get a view of all metrics
/// at a point in time.
#[derive(Debug)]
pub struct ServerMetrics {
    // Client counts
    accepted_clients: AtomicU64,
    rejected_clients: AtomicU64,
    active_clients: AtomicU64,

    // Throughput
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,

    // Errors
    io_errors: AtomicU64,

    started_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            accepted_clients: AtomicU64::new(0),
            rejected_clients: AtomicU64::new(0),
            active_clients: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            io_errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    // Client tracking

    /// Record a client taking a slot
    pub fn client_accepted(&self) {
        self.accepted_clients.fetch_add(1, Ordering::Relaxed);
        self.active_clients.fetch_add(1, Ordering::Relaxed);
        counter!("bwnet.clients.accepted").increment(1);
        gauge!("bwnet.clients.active").increment(1.0);
    }

    /// Record a connection closed at accept time
    pub fn client_rejected(&self) {
        self.rejected_clients.fetch_add(1, Ordering::Relaxed);
        counter!("bwnet.clients.rejected").increment(1);
    }

    /// Record a client releasing its slot
    pub fn client_released(&self) {
        self.active_clients.fetch_sub(1, Ordering::Relaxed);
        gauge!("bwnet.clients.active").decrement(1.0);
    }

    /// Current number of clients holding a slot
    pub fn active_clients(&self) -> u64 {
        self.active_clients.load(Ordering::Relaxed)
    }

    /// Total number of clients accepted since the metrics were created
    pub fn accepted_clients(&self) -> u64 {
        self.accepted_clients.load(Ordering::Relaxed)
    }

    /// Total number of connections rejected
    pub fn rejected_clients(&self) -> u64 {
        self.rejected_clients.load(Ordering::Relaxed)
    }

    // Throughput tracking

    /// Record a message read from a client
    pub fn message_received(&self, len: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
        counter!("bwnet.messages.received").increment(1);
        counter!("bwnet.bytes.received").increment(len as u64);
    }

    /// Record bytes written to a client
    pub fn bytes_sent(&self, len: usize) {
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        counter!("bwnet.bytes.sent").increment(len as u64);
    }

    /// Record a send buffer fully flushed
    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        counter!("bwnet.messages.sent").increment(1);
    }

    /// Record a failed read or write
    pub fn io_error(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
        counter!("bwnet.errors.io").increment(1);
    }

    // Snapshot

    /// Get a snapshot of all metrics
    ///
    /// Values are loaded one at a time, so a snapshot taken while the reactor
    /// is busy may be slightly inconsistent across fields.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted_clients: self.accepted_clients.load(Ordering::Relaxed),
            rejected_clients: self.rejected_clients.load(Ordering::Relaxed),
            active_clients: self.active_clients.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// A snapshot of server metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Clients accepted into a slot
    pub accepted_clients: u64,
    /// Connections closed at accept time
    pub rejected_clients: u64,
    /// Clients currently holding a slot
    pub active_clients: u64,
    /// Total bytes written
    pub bytes_sent: u64,
    /// Total bytes read
    pub bytes_received: u64,
    /// Send buffers fully flushed
    pub messages_sent: u64,
    /// Messages delivered to the handler
    pub messages_received: u64,
    /// Failed reads and writes
    pub io_errors: u64,
    /// Time since the metrics were created
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Calculate messages per second (received)
    pub fn messages_received_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.messages_received as f64 / self.uptime.as_secs_f64()
    }

    /// Calculate bytes per second (sent)
    pub fn bytes_sent_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.bytes_sent as f64 / self.uptime.as_secs_f64()
    }
}
