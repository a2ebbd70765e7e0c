//! End-to-end tests for the framed socket transport.
//!
//! These drive the wire protocol the way a real peer does: raw TCP
//! streams, hand-built frames, and dummy servers for the verification
//! client's failure paths.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use hostbridge::dispatch::{CommandDispatcher, DispatchError, NullDispatcher};
use hostbridge::transport::framed::{probe, FramedSocketTransport};
use hostbridge::transport::framing;
use hostbridge::transport::TransportClient;
use hostbridge::{Bridge, Config, StateStore, TransportMode};

struct EchoDispatcher;

#[async_trait::async_trait]
impl CommandDispatcher for EchoDispatcher {
    async fn execute(&self, name: &str, params: Value) -> Result<Value, DispatchError> {
        Ok(json!({"command": name, "params": params}))
    }
}

/// Read one raw frame off a TCP stream.
async fn read_raw_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).await.unwrap();
    let len = u64::from_be_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    payload
}

/// Write one raw frame onto a TCP stream.
async fn write_raw_frame(stream: &mut TcpStream, payload: &[u8]) {
    stream
        .write_all(&(payload.len() as u64).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(payload).await.unwrap();
}

/// Read the handshake line (through `\n`) off a TCP stream.
async fn read_handshake(stream: &mut TcpStream) -> String {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await.unwrap();
        line.push(byte[0]);
        if byte[0] == b'\n' {
            return String::from_utf8(line).unwrap();
        }
    }
}

#[tokio::test]
async fn test_end_to_end_handshake_ping_verify() {
    let mut transport =
        FramedSocketTransport::new(0, Duration::from_secs(5), Arc::new(NullDispatcher));
    assert!(transport.start().await);
    let addr = transport.bound_addr().unwrap();

    // A client connects, reads the handshake, and pings.
    let mut client = TcpStream::connect(addr).await.unwrap();
    let handshake = read_handshake(&mut client).await;
    assert!(handshake.ends_with("FRAMING=1\n"), "handshake: {handshake:?}");

    write_raw_frame(&mut client, b"ping").await;
    let reply = read_raw_frame(&mut client).await;
    let reply_text = String::from_utf8(reply).unwrap();
    assert!(reply_text.contains("pong"), "reply: {reply_text}");

    // Verification performs the same sequence and reports every phase.
    let report = transport.verify().await;
    assert!(report.success);
    assert!(report.handshake_valid);
    assert!(report.ping_succeeded);

    transport.stop().await;
}

#[tokio::test]
async fn test_commands_round_trip_through_dispatcher() {
    let mut transport =
        FramedSocketTransport::new(0, Duration::from_secs(5), Arc::new(EchoDispatcher));
    assert!(transport.start().await);
    let addr = transport.bound_addr().unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    read_handshake(&mut client).await;

    for i in 0..3 {
        let command = json!({"type": "manage_asset", "params": {"index": i}});
        write_raw_frame(&mut client, command.to_string().as_bytes()).await;
        let reply: Value = serde_json::from_slice(&read_raw_frame(&mut client).await).unwrap();
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["result"]["command"], "manage_asset");
        assert_eq!(reply["result"]["params"]["index"], i);
    }

    transport.stop().await;
}

#[tokio::test]
async fn test_zero_length_frame_drops_connection() {
    let mut transport =
        FramedSocketTransport::new(0, Duration::from_secs(5), Arc::new(NullDispatcher));
    assert!(transport.start().await);
    let addr = transport.bound_addr().unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    read_handshake(&mut client).await;

    // Zero-length frame is a protocol violation; the listener hangs up.
    client.write_all(&0u64.to_be_bytes()).await.unwrap();
    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "expected EOF after protocol violation");

    // The transport itself is unaffected.
    assert!(transport.verify().await.success);
    transport.stop().await;
}

/// Dummy peer for exercising the verification client, mirroring what a
/// misbehaving or legacy listener might do.
async fn spawn_dummy_server(greeting: &'static [u8], pong_reply: Option<&'static [u8]>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(greeting).await.unwrap();
        if let Some(reply) = pong_reply {
            let mut header = [0u8; 8];
            if stream.read_exact(&mut header).await.is_err() {
                return;
            }
            let len = u64::from_be_bytes(header) as usize;
            let mut payload = vec![0u8; len];
            if stream.read_exact(&mut payload).await.is_err() {
                return;
            }
            if payload == b"ping" {
                let encoded = framing::encode_frame(reply).unwrap();
                let _ = stream.write_all(&encoded).await;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    });
    addr
}

#[tokio::test]
async fn test_probe_rejects_handshake_without_framing_token() {
    let addr = spawn_dummy_server(b"HOSTBRIDGE/0.1\n", None).await;
    let report = probe(addr).await;
    assert!(!report.success);
    assert!(!report.handshake_valid);
}

#[tokio::test]
async fn test_probe_accepts_pong_case_variants() {
    for reply in [&b"PONG"[..], b"Pong", b"pong"] {
        let addr = spawn_dummy_server(b"HOSTBRIDGE/0.1 FRAMING=1\n", Some(reply)).await;
        let report = probe(addr).await;
        assert!(report.success, "reply {reply:?} should verify");
        assert!(report.ping_succeeded);
    }
}

#[tokio::test]
async fn test_probe_rejects_non_pong_reply() {
    let addr = spawn_dummy_server(b"HOSTBRIDGE/0.1 FRAMING=1\n", Some(b"nope")).await;
    let report = probe(addr).await;
    assert!(!report.success);
    assert!(report.handshake_valid);
    assert!(!report.ping_succeeded);
}

#[tokio::test]
async fn test_probe_unreachable_peer() {
    let report = probe("127.0.0.1:1".parse().unwrap()).await;
    assert!(!report.success);
    assert!(report.detail.is_some());
}

#[tokio::test]
async fn test_bridge_serves_framed_mode_end_to_end() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = StateStore::open_in(dir.path());
    let config = Config {
        mode: TransportMode::Stdio,
        framed_port: 0,
        project_root: dir.path().to_path_buf(),
        ..Config::default()
    };

    let bridge = Bridge::new(config, store, Arc::new(EchoDispatcher)).unwrap();
    assert!(bridge.start().await);

    let state = bridge.state().await;
    assert!(state.connected);
    let addr: SocketAddr = state
        .details
        .as_deref()
        .and_then(|d| d.rsplit(' ').next())
        .and_then(|a| a.parse().ok())
        .expect("bound address in state details");

    let mut client = TcpStream::connect(addr).await.unwrap();
    let handshake = read_handshake(&mut client).await;
    assert!(handshake.contains("FRAMING=1"));
    write_raw_frame(&mut client, b"ping").await;
    let reply = read_raw_frame(&mut client).await;
    assert!(String::from_utf8_lossy(&reply).contains("pong"));

    let report = bridge.verify().await;
    assert!(report.success && report.handshake_valid && report.ping_succeeded);

    bridge.stop().await;
    assert!(!bridge.state().await.connected);
}
