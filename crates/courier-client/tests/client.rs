//! Client behaviour against scripted in-process peers and a real TCP socket.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use courier_client::codec::{HttpCodec, HttpResponse, LineCodec};
use courier_client::transport::{MemoryListener, MemoryPeer, MemoryTransport, TcpTransport};
use courier_client::{
    Client, ClientConfig, ClientError, ClientHandler, CodecError, ConnectionState,
    DisconnectReason, HandshakeError, HandshakeRequest, HandshakeResponse, NoopHandler,
    RequestError, TransportError,
};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Connecting,
    Connected(Option<u16>),
    Disconnected(DisconnectReason),
    Received(String),
    Error(String),
}

#[derive(Clone, Default)]
struct Recorder {
    log: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.log.lock().iter().filter(|e| pred(e)).count()
    }
}

impl<R: Debug> ClientHandler<R> for Recorder {
    fn on_connecting(&self, request: &mut HandshakeRequest) {
        request.set_header("X-Client", "courier-test");
        self.log.lock().push(Event::Connecting);
    }

    fn on_connected(&self, response: Option<&HandshakeResponse>) {
        self.log.lock().push(Event::Connected(response.map(|r| r.status)));
    }

    fn on_disconnected(&self, reason: &DisconnectReason) {
        self.log.lock().push(Event::Disconnected(reason.clone()));
    }

    fn on_received(&self, response: &R) {
        self.log.lock().push(Event::Received(format!("{response:?}")));
    }

    fn on_error(&self, error: &ClientError) {
        self.log.lock().push(Event::Error(error.to_string()));
    }
}

type LineClient = Client<MemoryTransport, LineCodec>;

fn line_client(
    handler: impl ClientHandler<String>,
    config: ClientConfig,
) -> (LineClient, MemoryListener) {
    let (transport, listener) = MemoryTransport::pair();
    (Client::new(transport, LineCodec, handler, config), listener)
}

async fn connected_line_client(
    handler: impl ClientHandler<String>,
    config: ClientConfig,
) -> (LineClient, MemoryPeer, MemoryListener) {
    let (client, mut listener) = line_client(handler, config);
    client.connect_and_wait().await.unwrap();
    let peer = listener.accept().await.unwrap();
    (client, peer, listener)
}

async fn recv_text(peer: &mut MemoryPeer) -> String {
    let chunk = timeout(WAIT, peer.recv()).await.unwrap().unwrap();
    String::from_utf8(chunk.to_vec()).unwrap()
}

async fn wait_for(client: &LineClient, state: ConnectionState) {
    let _ = timeout(WAIT, client.wait_for_state(|s| s == state))
        .await
        .expect("state reached");
}

async fn eventually(check: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached");
}

// ─────────────────────────────────────────────────────────────────────────────
// Correlation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn responses_resolve_in_submission_order() {
    let (client, mut peer, _l) = connected_line_client(NoopHandler, ClientConfig::default()).await;

    let r1 = client.submit("R1".into()).unwrap();
    let r2 = client.submit("R2".into()).unwrap();
    let r3 = client.submit("R3".into()).unwrap();
    assert!(r1.seq() < r2.seq() && r2.seq() < r3.seq());
    assert_eq!(client.pending_requests(), 3);

    for expected in ["R1\n", "R2\n", "R3\n"] {
        assert_eq!(recv_text(&mut peer).await, expected);
    }
    assert!(peer.send("A1\nA2\nA3\n").await);

    assert_eq!(r1.await.unwrap(), "A1");
    assert_eq!(r2.await.unwrap(), "A2");
    assert_eq!(r3.await.unwrap(), "A3");
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn responses_split_across_chunks() {
    let (client, peer, _l) = connected_line_client(NoopHandler, ClientConfig::default()).await;

    let r1 = client.submit("R1".into()).unwrap();
    let r2 = client.submit("R2".into()).unwrap();
    assert!(peer.send("fir").await);
    assert!(peer.send("st\nsec").await);
    assert!(peer.send("ond\n").await);

    assert_eq!(r1.await.unwrap(), "first");
    assert_eq!(r2.await.unwrap(), "second");
}

#[tokio::test]
async fn request_helper_awaits_response() {
    let (client, mut peer, _l) = connected_line_client(NoopHandler, ClientConfig::default()).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request("ping".into()).await }
    });
    assert_eq!(recv_text(&mut peer).await, "ping\n");
    assert!(peer.send("pong\n").await);

    assert_eq!(pending.await.unwrap().unwrap(), "pong");
}

#[tokio::test]
async fn disconnect_fails_pending_with_connection_lost() {
    let recorder = Recorder::default();
    let (client, mut peer, _l) =
        connected_line_client(recorder.clone(), ClientConfig::default()).await;

    let r1 = client.submit("R1".into()).unwrap();
    let r2 = client.submit("R2".into()).unwrap();
    let _ = recv_text(&mut peer).await;
    assert!(peer.send("A1\n").await);
    assert_eq!(r1.await.unwrap(), "A1");

    peer.disconnect().await;

    assert_eq!(r2.await, Err(RequestError::ConnectionLost));
    wait_for(&client, ConnectionState::Disconnected).await;
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.last_disconnect(), Some(DisconnectReason::TransportClosed));
    assert_eq!(recorder.count(|e| matches!(e, Event::Disconnected(_))), 1);
}

#[tokio::test]
async fn explicit_disconnect_fails_pending_and_closes_peer() {
    let (client, mut peer, _l) = connected_line_client(NoopHandler, ClientConfig::default()).await;
    let r1 = client.submit("R1".into()).unwrap();

    client.disconnect().await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(r1.await, Err(RequestError::ConnectionLost));
    assert_eq!(recv_text(&mut peer).await, "R1\n");
    assert!(timeout(WAIT, peer.recv()).await.unwrap().is_none());
    assert_eq!(client.last_disconnect(), Some(DisconnectReason::Requested));
    assert_eq!(client.transport().live_links(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_request_keeps_its_slot() {
    let recorder = Recorder::default();
    let config = ClientConfig {
        request_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    };
    let (client, peer, _l) = connected_line_client(recorder.clone(), config).await;

    let r1 = client.submit("R1".into()).unwrap();
    assert_eq!(r1.await, Err(RequestError::Timeout));
    assert_eq!(client.pending_requests(), 1);

    let r2 = client.submit_with_timeout("R2".into(), None).unwrap();
    assert!(peer.send("late\nA2\n").await);

    assert_eq!(r2.await.unwrap(), "A2");
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(recorder.count(|e| matches!(e, Event::Error(_))), 0);
}

#[tokio::test]
async fn abandoned_request_discards_its_response() {
    let (client, peer, _l) = connected_line_client(NoopHandler, ClientConfig::default()).await;

    let r1 = client.submit("R1".into()).unwrap();
    let r2 = client.submit("R2".into()).unwrap();
    drop(r1);
    assert!(peer.send("A1\nA2\n").await);

    assert_eq!(r2.await.unwrap(), "A2");
}

#[tokio::test]
async fn unexpected_response_is_reported_not_fatal() {
    let recorder = Recorder::default();
    let (client, peer, _l) =
        connected_line_client(recorder.clone(), ClientConfig::default()).await;

    assert!(peer.send("stray\n").await);
    eventually(|| recorder.count(|e| matches!(e, Event::Error(_))) == 1).await;

    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(recorder.events().contains(&Event::Received("\"stray\"".into())));
}

#[tokio::test]
async fn undecodable_data_tears_link_down() {
    let (client, peer, _l) = connected_line_client(NoopHandler, ClientConfig::default()).await;
    let r1 = client.submit("R1".into()).unwrap();

    assert!(peer.send(vec![0xff, 0xfe, b'\n']).await);

    assert_eq!(r1.await, Err(RequestError::ConnectionLost));
    wait_for(&client, ConnectionState::Disconnected).await;
    assert_matches!(
        client.last_disconnect(),
        Some(DisconnectReason::Codec(CodecError::Malformed(_)))
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn submit_requires_connected() {
    let (transport, mut listener) = MemoryTransport::pair();
    let client = Client::new(
        transport.with_manual_connect(),
        LineCodec,
        NoopHandler,
        ClientConfig::default(),
    );
    assert_matches!(client.submit("x".into()), Err(ClientError::NotConnected));

    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert_matches!(client.submit("x".into()), Err(ClientError::NotConnected));

    let peer = listener.accept().await.unwrap();
    assert!(peer.connect().await);
    wait_for(&client, ConnectionState::Connected).await;
    assert!(client.submit("x".into()).is_ok());
}

#[tokio::test]
async fn connect_twice_is_invalid() {
    let (client, _peer, _l) = connected_line_client(NoopHandler, ClientConfig::default()).await;
    assert_matches!(
        client.connect().await,
        Err(ClientError::InvalidTransition {
            from: ConnectionState::Connected,
            ..
        })
    );
}

#[tokio::test]
async fn failed_open_returns_to_disconnected() {
    let (client, _listener) = line_client(NoopHandler, ClientConfig::default());
    client.transport().fail_next_opens(1);

    assert_matches!(
        client.connect().await,
        Err(ClientError::Transport(TransportError::Io(_)))
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.connect_and_wait().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn reconnect_tears_down_exactly_one_link() {
    let recorder = Recorder::default();
    let (client, old_peer, mut listener) =
        connected_line_client(recorder.clone(), ClientConfig::default()).await;
    let r1 = client.submit("R1".into()).unwrap();

    client.reconnect().await.unwrap();

    assert_eq!(r1.await, Err(RequestError::ConnectionLost));
    assert!(old_peer.is_closed());
    wait_for(&client, ConnectionState::Connected).await;

    let transport = client.transport();
    assert_eq!(transport.opened(), 2);
    assert_eq!(transport.max_live_at_open(), 0);
    assert_eq!(transport.live_links(), 1);
    assert_eq!(recorder.count(|e| matches!(e, Event::Disconnected(_))), 1);
    assert!(
        recorder
            .events()
            .contains(&Event::Disconnected(DisconnectReason::Reconnect))
    );

    let new_peer = listener.accept().await.unwrap();
    let r2 = client.submit("R2".into()).unwrap();
    assert!(new_peer.send("A2\n").await);
    assert_eq!(r2.await.unwrap(), "A2");
}

#[tokio::test]
async fn response_queued_at_reconnect_is_not_matched() {
    let recorder = Recorder::default();
    let (client, mut old_peer, mut listener) =
        connected_line_client(recorder.clone(), ClientConfig::default()).await;
    let r1 = client.submit("R1".into()).unwrap();
    let r2 = client.submit("R2".into()).unwrap();
    assert_eq!(recv_text(&mut old_peer).await, "R1\n");
    assert_eq!(recv_text(&mut old_peer).await, "R2\n");
    assert!(old_peer.send("A1\n").await);
    assert_eq!(r1.await.unwrap(), "A1");

    // The answer to R2 is already on the link when the reconnect starts.
    assert!(old_peer.send("A2\n").await);
    client.reconnect().await.unwrap();

    assert_eq!(r2.await, Err(RequestError::ConnectionLost));
    wait_for(&client, ConnectionState::Connected).await;
    let mut new_peer = listener.accept().await.unwrap();
    let r3 = client.submit("R3".into()).unwrap();
    assert_eq!(recv_text(&mut new_peer).await, "R3\n");
    assert!(new_peer.send("A3\n").await);
    assert_eq!(r3.await.unwrap(), "A3");
    assert_eq!(recorder.count(|e| *e == Event::Received("\"A2\"".into())), 0);
    assert_eq!(recorder.count(|e| matches!(e, Event::Error(_))), 0);
}

#[tokio::test]
async fn reconnect_from_disconnected_opens_a_link() {
    let (client, _listener) = line_client(NoopHandler, ClientConfig::default());
    client.reconnect().await.unwrap();
    wait_for(&client, ConnectionState::Connected).await;
    assert_eq!(client.transport().opened(), 1);
}

#[tokio::test]
async fn dropping_last_client_closes_link() {
    let (client, mut peer, _l) = connected_line_client(NoopHandler, ClientConfig::default()).await;
    let clone = client.clone();
    drop(client);
    assert_eq!(clone.state(), ConnectionState::Connected);
    drop(clone);

    assert!(timeout(WAIT, peer.recv()).await.unwrap().is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

type HttpClient = Client<MemoryTransport, HttpCodec>;

fn http_client(
    codec: HttpCodec,
    handler: impl ClientHandler<HttpResponse>,
    config: ClientConfig,
) -> (HttpClient, MemoryListener) {
    let (transport, listener) = MemoryTransport::pair();
    (Client::new(transport, codec, handler, config), listener)
}

#[tokio::test]
async fn http_gets_resolve_in_order() {
    let (client, mut listener) =
        http_client(HttpCodec::new("test.local"), NoopHandler, ClientConfig::default());
    client.connect_and_wait().await.unwrap();
    let mut peer = listener.accept().await.unwrap();

    let a = client.get("/a").unwrap();
    let b = client.get("/b").unwrap();

    let first = String::from_utf8(peer.recv().await.unwrap().to_vec()).unwrap();
    let second = String::from_utf8(peer.recv().await.unwrap().to_vec()).unwrap();
    assert!(first.starts_with("GET /a HTTP/1.1\r\nHost: test.local\r\n"));
    assert!(second.starts_with("GET /b HTTP/1.1\r\n"));

    assert!(
        peer.send(
            "HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nA\
             HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nB"
        )
        .await
    );

    assert_eq!(a.await.unwrap().body_text(), "A");
    assert_eq!(b.await.unwrap().body_text(), "B");
}

#[tokio::test]
async fn http_head_then_post_frames_correctly() {
    let (client, mut listener) =
        http_client(HttpCodec::new("h"), NoopHandler, ClientConfig::default());
    client.connect_and_wait().await.unwrap();
    let peer = listener.accept().await.unwrap();

    let head = client.head("/").unwrap();
    let post = client.post("/p", "data").unwrap();
    assert!(
        peer.send(
            "HTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\n\
             HTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok"
        )
        .await
    );

    let head = head.await.unwrap();
    assert!(head.body.is_empty());
    let post = post.await.unwrap();
    assert_eq!(post.status.as_u16(), 201);
    assert_eq!(post.body_text(), "ok");
}

#[tokio::test]
async fn upgrade_handshake_accepted() {
    let recorder = Recorder::default();
    let (client, mut listener) = http_client(
        HttpCodec::new("h").with_upgrade("courier"),
        recorder.clone(),
        ClientConfig::default(),
    );
    client.connect().await.unwrap();
    let mut peer = listener.accept().await.unwrap();

    let handshake = String::from_utf8(peer.recv().await.unwrap().to_vec()).unwrap();
    assert!(handshake.contains("Upgrade: courier\r\n"));
    assert!(handshake.contains("X-Client: courier-test\r\n"));
    assert_eq!(client.state(), ConnectionState::HandshakeInFlight);
    assert_matches!(client.get("/"), Err(ClientError::NotConnected));

    assert!(
        peer.send("HTTP/1.1 101 Switching Protocols\r\nUpgrade: courier\r\nConnection: Upgrade\r\n\r\n")
            .await
    );
    let _ = timeout(WAIT, client.wait_for_state(|s| s == ConnectionState::Connected))
        .await
        .unwrap();
    assert_eq!(
        recorder.events(),
        vec![Event::Connecting, Event::Connected(Some(101))]
    );
}

#[tokio::test]
async fn upgrade_rejection_leaves_client_usable() {
    let recorder = Recorder::default();
    let (client, mut listener) = http_client(
        HttpCodec::new("h").with_upgrade("courier"),
        recorder.clone(),
        ClientConfig::default(),
    );
    client.connect().await.unwrap();
    let mut peer = listener.accept().await.unwrap();
    let _ = peer.recv().await.unwrap();
    assert!(peer.send("HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n").await);

    let state = timeout(
        WAIT,
        client.wait_for_state(|s| s == ConnectionState::Disconnected),
    )
    .await
    .unwrap();
    assert_eq!(state, ConnectionState::Disconnected);
    assert_matches!(
        client.last_disconnect(),
        Some(DisconnectReason::Handshake(HandshakeError::Rejected { status: 400, .. }))
    );
    assert_eq!(recorder.count(|e| matches!(e, Event::Connected(_))), 0);
    assert_eq!(recorder.count(|e| *e == Event::Connecting), 1);

    // A manual retry works.
    let retry = tokio::spawn({
        let client = client.clone();
        async move { client.connect_and_wait().await }
    });
    let mut peer = listener.accept().await.unwrap();
    let _ = peer.recv().await.unwrap();
    assert!(peer.send("HTTP/1.1 101 Switching Protocols\r\nUpgrade: courier\r\n\r\n").await);
    retry.await.unwrap().unwrap();
    assert_eq!(recorder.count(|e| *e == Event::Connecting), 2);
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_disconnects() {
    let config = ClientConfig {
        handshake_timeout: Duration::from_secs(3),
        ..ClientConfig::default()
    };
    let codec = HttpCodec::new("h").with_upgrade("courier");
    let (client, mut listener) = http_client(codec, NoopHandler, config);

    let result = tokio::spawn({
        let client = client.clone();
        async move { client.connect_and_wait().await }
    });
    let mut peer = listener.accept().await.unwrap();
    let _ = peer.recv().await.unwrap();

    assert_matches!(
        result.await.unwrap(),
        Err(ClientError::Handshake(HandshakeError::Timeout))
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(peer.is_closed());
}

// ─────────────────────────────────────────────────────────────────────────────
// TCP
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn line_client_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        let (read, mut write) = sock.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut served = 0;
        while let Some(line) = lines.next_line().await.unwrap() {
            write.write_all(format!("echo:{line}\n").as_bytes()).await.unwrap();
            served += 1;
        }
        served
    });

    let client = Client::new(
        TcpTransport::new(addr.to_string()),
        LineCodec,
        NoopHandler,
        ClientConfig::default(),
    );
    client.connect_and_wait().await.unwrap();

    let a = client.submit("a".into()).unwrap();
    let b = client.submit("b".into()).unwrap();
    assert_eq!(a.await.unwrap(), "echo:a");
    assert_eq!(b.await.unwrap(), "echo:b");
    assert_eq!(client.request("c".into()).await.unwrap(), "echo:c");

    client.disconnect().await;
    assert_eq!(server.await.unwrap(), 3);
}

#[tokio::test]
async fn tcp_peer_close_fails_pending() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(sock).lines();
        let _ = lines.next_line().await.unwrap();
    });

    let client = Client::new(
        TcpTransport::new(addr.to_string()),
        LineCodec,
        NoopHandler,
        ClientConfig::default(),
    );
    client.connect_and_wait().await.unwrap();
    let pending = client.submit("never answered".into()).unwrap();
    server.await.unwrap();

    assert_eq!(pending.await, Err(RequestError::ConnectionLost));
    let state = timeout(
        WAIT,
        client.wait_for_state(|s| s == ConnectionState::Disconnected),
    )
    .await
    .unwrap();
    assert_eq!(state, ConnectionState::Disconnected);
}

const FLOOD_LINE: usize = 512 * 1024;
const FLOOD_LINES: usize = 64;

/// Queue more than the socket buffers hold toward a peer that never reads.
/// Returns the bytes submitted.
fn flood(client: &Client<TcpTransport, LineCodec>) -> usize {
    let line = "x".repeat(FLOOD_LINE);
    for _ in 0..FLOOD_LINES {
        let _ = client.submit(line.clone()).unwrap();
    }
    FLOOD_LINES * (FLOOD_LINE + 1)
}

/// Read a socket until the client side closes it.
async fn drain(mut sock: TcpStream) -> usize {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0;
    loop {
        match sock.read(&mut buf).await {
            Ok(0) | Err(_) => return total,
            Ok(n) => total += n,
        }
    }
}

async fn stalled_tcp_client() -> (Client<TcpTransport, LineCodec>, TcpListener, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = Client::new(
        TcpTransport::new(addr.to_string()),
        LineCodec,
        NoopHandler,
        ClientConfig::default(),
    );
    client.connect_and_wait().await.unwrap();
    let (sock, _) = listener.accept().await.unwrap();
    (client, listener, sock)
}

#[tokio::test]
async fn tcp_reconnect_closes_stalled_socket_before_dialing() {
    let (client, listener, first) = stalled_tcp_client().await;
    let submitted = flood(&client);
    tokio::time::sleep(Duration::from_millis(50)).await;

    timeout(WAIT, client.reconnect()).await.unwrap().unwrap();

    // Reading the old socket now only sees what was already in flight.
    let drained = timeout(WAIT, drain(first)).await.expect("old socket closed");
    assert!(drained < submitted, "old socket delivered {drained} bytes");
    let (_second, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    wait_for_tcp(&client, ConnectionState::Connected).await;
}

#[tokio::test]
async fn tcp_disconnect_closes_stalled_socket() {
    let (client, _listener, sock) = stalled_tcp_client().await;
    let submitted = flood(&client);
    tokio::time::sleep(Duration::from_millis(50)).await;

    timeout(WAIT, client.disconnect()).await.unwrap();

    let drained = timeout(WAIT, drain(sock)).await.expect("socket closed");
    assert!(drained < submitted, "socket delivered {drained} bytes");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

async fn wait_for_tcp(client: &Client<TcpTransport, LineCodec>, state: ConnectionState) {
    let _ = timeout(WAIT, client.wait_for_state(|s| s == state))
        .await
        .expect("state reached");
}
