//! Integration tests for the relay server.
//!
//! These exercise the full stack over real TCP sockets on ephemeral
//! ports: lifecycle transitions, per-line reply flow, operator
//! broadcast, and disconnect handling.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - the panic-free behavior
//! of production code is verified through assertions.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use relay_core::reply::{FAREWELL_REPLY, GREETING_REPLY, NOT_UNDERSTOOD_REPLY, STATUS_REPLY};
use relayd::event::ServerEvent;
use relayd::server::{RelayServer, ServerConfig, ServerError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

// ============================================================================
// Constants
// ============================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const SESSION_WAIT_TIMEOUT: Duration = Duration::from_secs(1);
const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

fn loopback_config() -> ServerConfig {
    ServerConfig {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
    }
}

struct TestServer {
    server: Arc<RelayServer>,
    addr: SocketAddr,
}

impl TestServer {
    async fn spawn() -> Self {
        let server = Arc::new(RelayServer::new());
        let addr = server
            .start(&loopback_config())
            .await
            .expect("server should start");
        TestServer { server, addr }
    }

    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Waits until the registry holds exactly `count` sessions.
    async fn wait_for_sessions(&self, count: usize) {
        let start = tokio::time::Instant::now();
        while start.elapsed() < SESSION_WAIT_TIMEOUT {
            if self.server.session_count().await == count {
                return;
            }
            sleep(SESSION_POLL_INTERVAL).await;
        }
        panic!(
            "expected {count} sessions, found {}",
            self.server.session_count().await
        );
    }

    async fn stop(&self) {
        self.server.stop().await;
    }
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    local_addr: SocketAddr,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let local_addr = stream.local_addr().expect("local addr");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            local_addr,
        }
    }

    /// Half-closes the send direction, as a dying peer would.
    async fn shutdown_write(&mut self) {
        self.writer.shutdown().await.unwrap();
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv_line(&mut self) -> String {
        let mut line = String::new();
        let read = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .expect("read from server");
        assert!(read > 0, "server closed the connection");
        line.trim_end().to_string()
    }

    /// Reads until end-of-stream; panics if the server keeps the
    /// connection open past the timeout.
    async fn expect_eof(&mut self) {
        let mut line = String::new();
        loop {
            let read = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for EOF");
            match read {
                Ok(0) | Err(_) => return,
                Ok(_) => line.clear(),
            }
        }
    }
}

// ============================================================================
// Reply Flow
// ============================================================================

#[tokio::test]
async fn test_round_trip_replies_in_order() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send_line("hello").await;
    assert_eq!(client.recv_line().await, GREETING_REPLY);

    client.send_line("  HOW ARE YOU?  ").await;
    assert_eq!(client.recv_line().await, STATUS_REPLY);

    client.send_line("what???").await;
    assert_eq!(client.recv_line().await, NOT_UNDERSTOOD_REPLY);

    client.send_line("just a normal day").await;
    assert_eq!(client.recv_line().await, "You said: 'just a normal day'");

    client.send_line("bye").await;
    assert_eq!(client.recv_line().await, FAREWELL_REPLY);

    server.stop().await;
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let server = TestServer::spawn().await;

    let mut first = server.connect().await;
    let mut second = server.connect().await;
    server.wait_for_sessions(2).await;

    // One peer dying does not disturb the other.
    first.shutdown_write().await;
    first.expect_eof().await;

    second.send_line("hi").await;
    assert_eq!(second.recv_line().await, GREETING_REPLY);

    server.stop().await;
}

// ============================================================================
// Operator Broadcast
// ============================================================================

#[tokio::test]
async fn test_operator_broadcast_reaches_all_clients() {
    let server = TestServer::spawn().await;

    let mut first = server.connect().await;
    let mut second = server.connect().await;
    server.wait_for_sessions(2).await;

    let delivered = server
        .server
        .operator_broadcast("maintenance at noon")
        .await
        .unwrap();
    assert_eq!(delivered, 2);

    assert_eq!(first.recv_line().await, "maintenance at noon");
    assert_eq!(second.recv_line().await, "maintenance at noon");

    server.stop().await;
}

#[tokio::test]
async fn test_operator_broadcast_with_no_clients_succeeds() {
    let server = TestServer::spawn().await;

    let delivered = server.server.operator_broadcast("anyone?").await.unwrap();
    assert_eq!(delivered, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_operator_broadcast_after_stop_fails() {
    let server = TestServer::spawn().await;
    server.stop().await;

    let result = server.server.operator_broadcast("too late").await;
    assert!(matches!(result, Err(ServerError::NotRunning)));
}

#[tokio::test]
async fn test_broadcast_skips_session_closed_midway() {
    let server = TestServer::spawn().await;

    let dead = server.connect().await;
    let mut live = server.connect().await;
    server.wait_for_sessions(2).await;

    // Close the dead client's session through its handle while the
    // other stays up.
    let sessions = server.server.registry().snapshot().await;
    let target = sessions
        .iter()
        .find(|s| s.peer_addr() == dead.local_addr)
        .expect("session for dead client");
    target.close().await.unwrap();

    let delivered = server.server.operator_broadcast("still here").await.unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(live.recv_line().await, "still here");

    server.stop().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_stop_start_round_trips() {
    let server = Arc::new(RelayServer::new());

    for _ in 0..2 {
        let addr = server.start(&loopback_config()).await.unwrap();
        assert!(server.is_listening().await);

        let mut client = TestClient::new(TcpStream::connect(addr).await.unwrap());
        client.send_line("hello").await;
        assert_eq!(client.recv_line().await, GREETING_REPLY);

        server.stop().await;
        assert!(!server.is_listening().await);

        // Further connection attempts are refused.
        assert!(TcpStream::connect(addr).await.is_err());
    }
}

#[tokio::test]
async fn test_stop_races_with_incoming_connections() {
    // Stop while connects are in flight: every connection the server
    // accepted must be drained by stop(), none may linger registered
    // or half-open afterwards.
    for _ in 0..20 {
        let server = TestServer::spawn().await;
        let addr = server.addr;

        let connector = tokio::spawn(async move {
            let mut streams = Vec::new();
            for _ in 0..5 {
                match TcpStream::connect(addr).await {
                    Ok(stream) => streams.push(stream),
                    // Refused once the listener is gone.
                    Err(_) => break,
                }
            }
            streams
        });

        tokio::task::yield_now().await;
        server.stop().await;

        assert_eq!(server.server.session_count().await, 0);

        // Accepted connections observe closure; refused ones never
        // made it into the vec.
        for stream in connector.await.unwrap() {
            TestClient::new(stream).expect_eof().await;
        }
    }
}

#[tokio::test]
async fn test_stop_closes_connected_clients() {
    let server = TestServer::spawn().await;

    let mut client = server.connect().await;
    server.wait_for_sessions(1).await;

    server.stop().await;

    // The previously connected session observes closure.
    client.expect_eof().await;
    assert_eq!(server.server.session_count().await, 0);
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_event_stream_covers_session_lifecycle() {
    let server = Arc::new(RelayServer::new());
    let mut events = server.subscribe();

    let addr = server.start(&loopback_config()).await.unwrap();
    assert!(matches!(
        recv_event(&mut events).await,
        ServerEvent::Listening { .. }
    ));

    let mut client = TestClient::new(TcpStream::connect(addr).await.unwrap());
    assert!(matches!(
        recv_event(&mut events).await,
        ServerEvent::ClientConnected { .. }
    ));

    client.send_line("hello").await;
    match recv_event(&mut events).await {
        ServerEvent::LineReceived { line, .. } => assert_eq!(line, "hello"),
        other => panic!("expected LineReceived, got {other:?}"),
    }
    assert_eq!(client.recv_line().await, GREETING_REPLY);

    drop(client);
    assert!(matches!(
        recv_event(&mut events).await,
        ServerEvent::ClientDisconnected { .. }
    ));

    server.stop().await;
    assert!(matches!(recv_event(&mut events).await, ServerEvent::Stopped));
}

async fn recv_event(
    events: &mut tokio::sync::broadcast::Receiver<ServerEvent>,
) -> ServerEvent {
    timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}
