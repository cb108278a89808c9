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

//! End-to-end correctness tests for bwnet
//!
//! Each test drives a real server over loopback with the bwnet client and
//! checks one observable property of the server.

use bwnet_client::{Client, ClientConfig, ClientError, ClientEvent};
use bwnet_server::{
    NoopHandler, QuitReason, Server, ServerConfig, ServerError, ServerState,
};
use bwnet_suite::{Event, Reply, start_server, start_server_with, wait_until};
use bytes::Bytes;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

async fn connect(addr: SocketAddr) -> Client {
    let config = ClientConfig::new("127.0.0.1", addr.port())
        .with_read_timeout(Some(Duration::from_secs(3)));
    Client::connect(config).await.unwrap()
}

fn finish(server: &Server) {
    if server.is_initialized() {
        server.close().unwrap();
    }
    server.join().unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}

// ============================================================================
// Capacity
// ============================================================================

#[tokio::test]
async fn test_capacity_never_exceeded() {
    let (server, handler, addr) = start_server(3, Reply::Silent).unwrap();

    let mut clients = Vec::new();
    for _ in 0..6 {
        clients.push(connect(addr).await);
    }

    assert!(wait_until(|| server.metrics().rejected_clients() == 3).await);
    assert_eq!(server.clients_count(), 3);
    assert_eq!(handler.joins().len(), 3);

    // Exactly the overflow connections were closed by the server.
    let mut closed = 0;
    for client in &mut clients {
        let limit = Duration::from_millis(200);
        match tokio::time::timeout(limit, client.recv()).await {
            Ok(Ok(ClientEvent::Disconnected)) | Ok(Err(_)) => closed += 1,
            Ok(Ok(ClientEvent::Message(_))) => panic!("unexpected message"),
            Err(_) => {}
        }
    }
    assert_eq!(closed, 3);

    drop(clients);
    finish(&server);
}

#[tokio::test]
async fn test_slots_hold_distinct_identities() {
    let (server, _handler, addr) = start_server(8, Reply::Silent).unwrap();

    let mut clients = Vec::new();
    for _ in 0..8 {
        clients.push(connect(addr).await);
    }
    assert!(wait_until(|| server.clients_count() == 8).await);

    let identities = server.clients();
    let unique: HashSet<_> = identities.iter().collect();
    assert_eq!(unique.len(), identities.len());

    let local: HashSet<SocketAddr> = clients.iter().map(|c| c.local_addr().unwrap()).collect();
    let seen: HashSet<SocketAddr> = identities.iter().map(|p| p.socket_addr()).collect();
    assert_eq!(local, seen);

    for index in 0..8 {
        assert!(server.client_by_id(index).is_some());
    }

    for client in &mut clients {
        client.disconnect().await.unwrap();
    }
    assert!(wait_until(|| server.clients_count() == 0).await);
    finish(&server);
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test]
async fn test_send_mutual_exclusion() {
    let (server, _handler, addr) = start_server(2, Reply::Silent).unwrap();
    let mut client = connect(addr).await;
    assert!(wait_until(|| server.clients_count() == 1).await);
    let process = server.client_by_id(0).unwrap();

    // Racing the reactor: the second call either finds the first still
    // buffered or, if it was already flushed, is accepted.
    server.send(&process, b"first").unwrap();
    let second = server.send(&process, b"second");

    let mut received = Vec::new();
    let expected: &[u8] = if second.is_ok() {
        b"firstsecond"
    } else {
        assert!(matches!(second, Err(ServerError::AlreadySending(_))));
        b"first"
    };
    while received.len() < expected.len() {
        match client.recv().await.unwrap() {
            ClientEvent::Message(bytes) => received.extend_from_slice(&bytes),
            ClientEvent::Disconnected => panic!("unexpected disconnect"),
        }
    }
    assert_eq!(received, expected);

    // Once the peer has the bytes the buffer is free again.
    assert!(wait_until(|| server.send(&process, b"third").is_ok()).await);
    assert_eq!(
        client.recv().await.unwrap(),
        ClientEvent::Message(Bytes::from_static(b"third"))
    );

    client.disconnect().await.unwrap();
    finish(&server);
}

// ============================================================================
// Disconnects
// ============================================================================

#[tokio::test]
async fn test_graceful_disconnect() {
    let (server, handler, addr) = start_server(2, Reply::Silent).unwrap();
    let mut client = connect(addr).await;
    assert!(wait_until(|| server.clients_count() == 1).await);
    let process = server.client_by_id(0).unwrap();

    client.disconnect().await.unwrap();
    assert!(wait_until(|| server.clients_count() == 0).await);

    assert_eq!(
        handler.quits(),
        vec![(process.clone(), QuitReason::ClientClosedConnection)]
    );
    assert_eq!(server.client_by_id(0), None);
    assert!(matches!(
        server.send(&process, b"late"),
        Err(ServerError::ClientNotFound(_))
    ));

    finish(&server);
}

#[tokio::test]
async fn test_close_without_clients_tears_down() {
    let (server, _handler, addr) = start_server(2, Reply::Silent).unwrap();

    server.close().unwrap();
    assert!(wait_until(|| server.state() == ServerState::Stopped).await);
    server.join().unwrap();

    // The listener is gone.
    let result = Client::connect(ClientConfig::new("127.0.0.1", addr.port())).await;
    assert!(matches!(result, Err(ClientError::Io(_))));
    assert!(matches!(server.close(), Err(ServerError::NotInitialized)));
}

#[tokio::test]
async fn test_close_with_clients_waits_for_them() {
    let (server, handler, addr) = start_server(4, Reply::Silent).unwrap();
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    assert!(wait_until(|| server.clients_count() == 2).await);

    server.close().unwrap();
    assert_eq!(first.recv().await.unwrap(), ClientEvent::Disconnected);
    assert_eq!(server.state(), ServerState::Closing);

    drop(first);
    assert!(wait_until(|| server.clients_count() == 1).await);
    assert_eq!(server.state(), ServerState::Closing);

    assert_eq!(second.recv().await.unwrap(), ClientEvent::Disconnected);
    drop(second);
    assert!(wait_until(|| server.state() == ServerState::Stopped).await);
    server.join().unwrap();

    assert_eq!(handler.quits().len(), 2);
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_echo_round_trip_scenario() {
    let (server, handler, addr) = start_server(2, Reply::PingPong).unwrap();
    let mut client = connect(addr).await;

    assert!(wait_until(|| handler.joins().len() == 1).await);
    let process = handler.joins()[0].clone();
    assert_eq!(process.socket_addr(), client.local_addr().unwrap());

    client.send(b"ping").await.unwrap();
    assert_eq!(
        client.recv().await.unwrap(),
        ClientEvent::Message(Bytes::from_static(b"pong"))
    );
    assert!(
        handler
            .events()
            .contains(&Event::Message(process, Bytes::from_static(b"ping")))
    );
    assert!(
        handler
            .events()
            .iter()
            .all(|event| !matches!(event, Event::ReplyFailed(..)))
    );

    client.disconnect().await.unwrap();
    finish(&server);
}

#[tokio::test]
async fn test_echo_of_input_spanning_several_reads() {
    let config = ServerConfig::new("127.0.0.1", 0).with_buffer_size(8);
    let (server, handler, addr) = start_server_with(config, Reply::Echo).unwrap();
    let mut client = connect(addr).await;

    let payload: Vec<u8> = (0..64u8).map(|i| b'A' + i % 26).collect();
    client.send(&payload).await.unwrap();

    let mut received = Vec::new();
    while received.len() < payload.len() {
        match client.recv().await.unwrap() {
            ClientEvent::Message(bytes) => received.extend_from_slice(&bytes),
            ClientEvent::Disconnected => panic!("unexpected disconnect"),
        }
    }
    assert_eq!(received, payload);
    assert!(
        handler
            .events()
            .iter()
            .all(|event| !matches!(event, Event::ReplyFailed(..)))
    );

    client.disconnect().await.unwrap();
    finish(&server);
}

#[tokio::test]
async fn test_reject_when_full_scenario() {
    let (server, handler, addr) = start_server(1, Reply::Silent).unwrap();
    let mut first = connect(addr).await;
    assert!(wait_until(|| server.clients_count() == 1).await);

    let mut second = connect(addr).await;
    match second.recv().await {
        Ok(ClientEvent::Disconnected) | Err(ClientError::Io(_)) => {}
        other => panic!("expected the server to close the connection, got {other:?}"),
    }

    assert_eq!(server.clients_count(), 1);
    assert_eq!(handler.joins().len(), 1);
    assert_eq!(
        handler.joins()[0].socket_addr(),
        first.local_addr().unwrap()
    );

    first.disconnect().await.unwrap();
    finish(&server);
}

#[tokio::test]
async fn test_port_validation_scenario() {
    let server = Server::new(ServerConfig::new("0.0.0.0", 70000).with_max_clients(5));

    let result = server.init(Arc::new(NoopHandler));
    assert!(matches!(result, Err(ServerError::InvalidPort(70000))));
    assert!(!server.is_initialized());
    assert_eq!(server.local_addr(), None);

    // Nothing to wait for.
    server.join().unwrap();
}
