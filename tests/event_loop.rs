//! End-to-end tests driving the event loop one cycle at a time over loopback sockets.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use wsloop::protocol::{Decoded, Frame, decode, encode_masked, random_mask};
use wsloop::{
    Config, Connection, ConnectionId, Error, EventLoop, Handler, LoopState, Message, OpCode,
    Registry, compute_accept_key,
};

const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Start,
    Stop,
    Connect(ConnectionId),
    Disconnect(ConnectionId),
    Send(ConnectionId, Message),
    Receive(ConnectionId, Message),
    Error(Option<ConnectionId>),
}

/// Records every notification; echoes received messages when `echo` is set.
#[derive(Default)]
struct Recorder {
    echo: bool,
    seen: Vec<Seen>,
}

impl Recorder {
    fn count(&self, pred: impl Fn(&Seen) -> bool) -> usize {
        self.seen.iter().filter(|s| pred(s)).count()
    }
}

impl Handler for Recorder {
    fn on_start(&mut self, _: &mut Registry) {
        self.seen.push(Seen::Start);
    }
    fn on_stop(&mut self, _: &mut Registry) {
        self.seen.push(Seen::Stop);
    }
    fn on_connect(&mut self, _: &mut Registry, id: ConnectionId) {
        self.seen.push(Seen::Connect(id));
    }
    fn on_disconnect(&mut self, _: &mut Registry, connection: &Connection) {
        self.seen.push(Seen::Disconnect(connection.id()));
    }
    fn on_send(&mut self, _: &mut Registry, id: ConnectionId, message: &Message) {
        self.seen.push(Seen::Send(id, message.clone()));
    }
    fn on_receive(&mut self, registry: &mut Registry, id: ConnectionId, message: Message) {
        self.seen.push(Seen::Receive(id, message.clone()));
        if self.echo {
            registry.send(id, message).unwrap();
        }
    }
    fn on_error(&mut self, _: &mut Registry, id: Option<ConnectionId>, _: &Error) {
        self.seen.push(Seen::Error(id));
    }
}

fn server(echo: bool) -> EventLoop<Recorder> {
    let config = Config::new("127.0.0.1:0")
        .with_idle_interval(Duration::from_secs(30))
        .with_handshake_timeout(Duration::from_millis(500));
    let recorder = Recorder {
        echo,
        ..Recorder::default()
    };
    EventLoop::bind(config, recorder).unwrap()
}

fn upgrade_request(key: Option<&str>) -> String {
    let mut request = String::from("GET /chat HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n");
    if let Some(key) = key {
        request.push_str(&format!("Sec-WebSocket-Key: {key}\r\n"));
    }
    request.push_str("\r\n");
    request
}

fn read_response(client: &mut TcpStream) -> String {
    let mut buf = [0u8; 1024];
    let n = client.read(&mut buf).unwrap();
    String::from_utf8(buf[..n].to_vec()).unwrap()
}

/// Accept on one turn, read the upgrade request on the next.
fn accept_and_upgrade(server: &mut EventLoop<Recorder>) {
    server.turn().unwrap();
    assert_eq!(server.registry().pending_handshakes(), 1);
    server.turn().unwrap();
}

/// Connect, upgrade and return the client plus its handle.
fn open_client(server: &mut EventLoop<Recorder>) -> (TcpStream, ConnectionId) {
    let mut client = TcpStream::connect(server.local_addr()).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client.write_all(upgrade_request(Some(KEY)).as_bytes()).unwrap();
    accept_and_upgrade(server);

    let response = read_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));

    let id = match server.handler().seen.last() {
        Some(Seen::Connect(id)) => *id,
        other => panic!("expected connect, got {other:?}"),
    };
    (client, id)
}

fn send_frame(client: &mut TcpStream, opcode: OpCode, payload: &[u8]) {
    let mask = random_mask().unwrap();
    client.write_all(&encode_masked(opcode, payload, mask)).unwrap();
}

fn read_frame(client: &mut TcpStream) -> Frame {
    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).unwrap();
    match decode(&buf[..n], 4096).unwrap() {
        Decoded::Frame { frame, .. } => frame,
        Decoded::Incomplete { needed } => panic!("server frame split, {needed} bytes short"),
    }
}

#[test]
fn test_upgrade_answers_with_accept_key() {
    let mut server = server(false);
    let mut client = TcpStream::connect(server.local_addr()).unwrap();
    client
        .write_all(upgrade_request(Some(KEY)).as_bytes())
        .unwrap();

    assert_eq!(server.turn().unwrap(), LoopState::Running);
    assert_eq!(server.registry().pending_handshakes(), 1);
    assert!(server.registry().is_empty());
    assert_eq!(server.turn().unwrap(), LoopState::Running);

    let response = read_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(response.contains("Upgrade: websocket\r\n"));
    assert!(response.contains("Connection: Upgrade\r\n"));
    assert!(response.contains(&format!(
        "Sec-WebSocket-Accept: {}\r\n",
        compute_accept_key(KEY)
    )));
    assert!(response.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    assert!(response.ends_with("\r\n\r\n"));

    assert_eq!(server.registry().len(), 1);
    assert_eq!(server.registry().socket_count(), 2);
    assert_eq!(server.handler().count(|s| matches!(s, Seen::Connect(_))), 1);

    let id = server.registry().ids()[0];
    let connection = server.registry().get(id).unwrap();
    assert_eq!(connection.method(), "GET");
    assert_eq!(connection.uri(), "/chat");
    assert_eq!(connection.header("host"), Some("localhost"));
}

#[test]
fn test_missing_key_is_rejected() {
    let mut server = server(false);
    let mut client = TcpStream::connect(server.local_addr()).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client.write_all(upgrade_request(None).as_bytes()).unwrap();

    accept_and_upgrade(&mut server);

    assert_eq!(
        read_response(&mut client),
        "HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n"
    );
    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).unwrap(), 0);

    assert!(server.registry().is_empty());
    assert_eq!(server.registry().pending_handshakes(), 0);
    assert_eq!(server.registry().socket_count(), 1);
    assert_eq!(server.handler().seen, vec![Seen::Start]);
}

#[test]
fn test_ping_gets_exactly_one_pong() {
    let mut server = server(false);
    let (mut client, _id) = open_client(&mut server);

    send_frame(&mut client, OpCode::Ping, b"heartbeat");
    server.turn().unwrap();

    let pong = read_frame(&mut client);
    assert!(pong.fin);
    assert_eq!(pong.opcode, OpCode::Pong);
    assert_eq!(pong.payload(), b"heartbeat");

    client
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let mut buf = [0u8; 16];
    assert!(client.read(&mut buf).is_err());

    assert_eq!(server.handler().count(|s| matches!(s, Seen::Receive(..))), 0);
    assert_eq!(server.registry().len(), 1);
}

#[test]
fn test_close_frame_removes_connection_once() {
    let mut server = server(false);
    let (mut client, id) = open_client(&mut server);

    send_frame(&mut client, OpCode::Close, &1000u16.to_be_bytes());
    server.turn().unwrap();

    assert!(server.registry().is_empty());
    assert_eq!(server.registry().socket_count(), 1);
    assert_eq!(
        server.handler().count(|s| *s == Seen::Disconnect(id)),
        1
    );

    assert!(!server.with_registry(|registry| registry.close(id)));
    assert_eq!(
        server.handler().count(|s| matches!(s, Seen::Disconnect(_))),
        1
    );

    let mut buf = [0u8; 8];
    assert_eq!(client.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_peer_hangup_removes_connection() {
    let mut server = server(false);
    let (client, id) = open_client(&mut server);

    drop(client);
    server.turn().unwrap();

    assert!(!server.registry().contains(id));
    assert_eq!(server.handler().count(|s| *s == Seen::Disconnect(id)), 1);
}

#[test]
fn test_text_is_trimmed_and_echoed() {
    let mut server = server(true);
    let (mut client, id) = open_client(&mut server);

    send_frame(&mut client, OpCode::Text, b"  hello world \n");
    server.turn().unwrap();

    let echoed = read_frame(&mut client);
    assert_eq!(echoed.opcode, OpCode::Text);
    assert_eq!(echoed.payload(), b"hello world");

    let seen = &server.handler().seen;
    let message = Message::text("hello world");
    assert!(seen.contains(&Seen::Receive(id, message.clone())));
    assert!(seen.contains(&Seen::Send(id, message)));
}

#[test]
fn test_binary_passes_through() {
    let mut server = server(true);
    let (mut client, id) = open_client(&mut server);

    let payload: Vec<u8> = (0..=255).collect();
    send_frame(&mut client, OpCode::Binary, &payload);
    server.turn().unwrap();

    let echoed = read_frame(&mut client);
    assert_eq!(echoed.opcode, OpCode::Binary);
    assert_eq!(echoed.payload(), &payload[..]);
    assert!(server
        .handler()
        .seen
        .contains(&Seen::Receive(id, Message::binary(payload))));
}

#[test]
fn test_reserved_opcode_tears_down_with_error() {
    let mut server = server(false);
    let (mut client, id) = open_client(&mut server);

    client.write_all(&[0x8B, 0x80, 1, 2, 3, 4]).unwrap();
    server.turn().unwrap();

    let seen = &server.handler().seen;
    let error = seen.iter().position(|s| *s == Seen::Error(Some(id)));
    let disconnect = seen.iter().position(|s| *s == Seen::Disconnect(id));
    assert!(error.is_some() && disconnect.is_some());
    assert!(error < disconnect);
    assert!(server.registry().is_empty());
}

#[test]
fn test_oversized_declared_length_tears_down() {
    let config = Config::new("127.0.0.1:0").with_max_payload_size(1024);
    let mut server = EventLoop::bind(config, Recorder::default()).unwrap();
    let (mut client, id) = open_client(&mut server);

    let mut header = vec![0x82, 0xFF];
    header.extend_from_slice(&(1u64 << 40).to_be_bytes());
    header.extend_from_slice(&[0, 0, 0, 0]);
    client.write_all(&header).unwrap();
    server.turn().unwrap();

    assert!(!server.registry().contains(id));
    assert_eq!(server.handler().count(|s| *s == Seen::Error(Some(id))), 1);
}

#[test]
fn test_broadcast_reaches_every_client() {
    let mut server = server(false);
    let (mut a, _) = open_client(&mut server);
    let (mut b, _) = open_client(&mut server);

    let delivered = server.with_registry(|registry| registry.broadcast(&Message::text("all")));
    assert_eq!(delivered, 2);
    assert_eq!(server.handler().count(|s| matches!(s, Seen::Send(..))), 2);

    for client in [&mut a, &mut b] {
        let frame = read_frame(client);
        assert_eq!(frame.payload(), b"all");
    }
}

#[test]
fn test_shutdown_handle_stops_loop() {
    let mut server = server(false);
    let (mut a, ida) = open_client(&mut server);
    let (mut b, idb) = open_client(&mut server);
    let _pending = TcpStream::connect(server.local_addr()).unwrap();
    server.turn().unwrap();
    assert_eq!(server.registry().pending_handshakes(), 1);

    let handle = server.shutdown_handle();
    handle.request();
    assert_eq!(server.turn().unwrap(), LoopState::Shutdown);
    assert_eq!(server.state(), LoopState::Shutdown);
    assert_eq!(server.registry().socket_count(), 0);
    assert_eq!(server.registry().pending_handshakes(), 0);
    assert!(TcpStream::connect(server.local_addr()).is_err());

    let seen = &server.handler().seen;
    assert!(seen.contains(&Seen::Disconnect(ida)));
    assert!(seen.contains(&Seen::Disconnect(idb)));
    assert_eq!(seen.last(), Some(&Seen::Stop));
    assert_eq!(server.handler().count(|s| *s == Seen::Stop), 1);

    for client in [&mut a, &mut b] {
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}

#[test]
fn test_silent_client_does_not_stall_others() {
    let mut server = server(false);
    let (mut active, id) = open_client(&mut server);

    let mut silent = TcpStream::connect(server.local_addr()).unwrap();
    server.turn().unwrap();
    assert_eq!(server.registry().pending_handshakes(), 1);

    send_frame(&mut active, OpCode::Ping, b"still there");
    let started = Instant::now();
    server.turn().unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));

    let pong = read_frame(&mut active);
    assert_eq!(pong.opcode, OpCode::Pong);
    assert_eq!(pong.payload(), b"still there");
    assert!(server.registry().contains(id));
    assert_eq!(server.registry().pending_handshakes(), 1);

    // The late request is still served within its deadline.
    silent.write_all(upgrade_request(Some(KEY)).as_bytes()).unwrap();
    server.turn().unwrap();
    assert_eq!(server.registry().pending_handshakes(), 0);
    assert_eq!(server.registry().len(), 2);
}

#[test]
fn test_silent_handshake_expires() {
    let config = Config::new("127.0.0.1:0")
        .with_idle_interval(Duration::from_secs(30))
        .with_handshake_timeout(Duration::from_millis(100));
    let mut server = EventLoop::bind(config, Recorder::default()).unwrap();

    let mut silent = TcpStream::connect(server.local_addr()).unwrap();
    silent.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    server.turn().unwrap();
    assert_eq!(server.registry().pending_handshakes(), 1);

    let started = Instant::now();
    while server.registry().pending_handshakes() > 0 && started.elapsed() < Duration::from_secs(2) {
        server.turn().unwrap();
    }
    assert_eq!(server.registry().pending_handshakes(), 0);
    assert_eq!(server.registry().socket_count(), 1);
    assert_eq!(server.handler().seen, vec![Seen::Start]);

    let mut buf = [0u8; 8];
    assert_eq!(silent.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_run_returns_after_shutdown_request() {
    let server = server(false);
    server.shutdown_handle().request();
    assert!(server.run().is_ok());
}

#[test]
fn test_bind_rejects_transport_context() {
    let config = Config::new("127.0.0.1:0").with_transport("tls");
    assert!(matches!(
        EventLoop::bind(config, Recorder::default()),
        Err(Error::Config(_))
    ));
}
