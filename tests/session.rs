//! End-to-end session tests against a live server on a loopback listener.
//!
//! Each test drives a raw TCP client through the real handshake and checks
//! the exact bytes the protocol mandates.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use des::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use des::Des;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use vncshare::capture::InputSink;
use vncshare::{ServerEvent, VncServer};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server(
    width: u16,
    height: u16,
    name: &str,
    password: Option<&str>,
) -> (VncServer, SocketAddr) {
    let server = VncServer::new(width, height);
    server.set_desktop_name(name);
    server.set_password(password.map(str::to_string));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serve = server.clone();
    tokio::spawn(async move { serve.serve(listener).await });

    (server, addr)
}

async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(TEST_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

/// Runs the version and security phases with the None security type and
/// consumes the ServerInit message.
async fn handshake_no_auth(stream: &mut TcpStream) -> Vec<u8> {
    assert_eq!(read_n(stream, 12).await, b"RFB 003.008\n");
    stream.write_all(b"RFB 003.008\n").await.unwrap();

    assert_eq!(read_n(stream, 2).await, vec![1, 1]); // one type: None
    stream.write_all(&[1]).await.unwrap();
    assert_eq!(read_n(stream, 4).await, vec![0, 0, 0, 0]); // SecurityResult OK

    stream.write_all(&[0]).await.unwrap(); // ClientInit

    // ServerInit: dimensions + pixel format + name length precede the name
    let head = read_n(stream, 24).await;
    let name_len = u32::from_be_bytes([head[20], head[21], head[22], head[23]]) as usize;
    let name = read_n(stream, name_len).await;

    let mut server_init = head;
    server_init.extend_from_slice(&name);
    server_init
}

fn vnc_response(password: &str, challenge: &[u8; 16]) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (slot, &byte) in key.iter_mut().zip(password.as_bytes().iter().take(8)) {
        *slot = byte.reverse_bits();
    }
    let cipher = Des::new_from_slice(&key).unwrap();

    let mut out = *challenge;
    let (first, second) = out.split_at_mut(8);
    cipher.encrypt_block(GenericArray::from_mut_slice(first));
    cipher.encrypt_block(GenericArray::from_mut_slice(second));
    out
}

#[tokio::test]
async fn bare_handshake_serves_expected_server_init() {
    let (server, addr) = start_server(2, 1, "x", None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let server_init = handshake_no_auth(&mut stream).await;
    assert_eq!(
        server_init,
        vec![
            0x00, 0x02, 0x00, 0x01, // 2x1
            0x20, 0x18, 0x00, 0x01, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x10, 0x08, 0x00, 0x00,
            0x00, 0x00, // pixel format
            0x00, 0x00, 0x00, 0x01, // name length
            0x78, // "x"
        ]
    );

    server.stop().await;
}

#[tokio::test]
async fn vnc_auth_accepts_correct_response() {
    let (server, addr) = start_server(4, 4, "auth", Some("pass")).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_eq!(read_n(&mut stream, 12).await, b"RFB 003.008\n");
    stream.write_all(b"RFB 003.008\n").await.unwrap();

    assert_eq!(read_n(&mut stream, 2).await, vec![1, 2]); // one type: VncAuth
    stream.write_all(&[2]).await.unwrap();

    let challenge: [u8; 16] = read_n(&mut stream, 16).await.try_into().unwrap();
    let response = vnc_response("pass", &challenge);
    stream.write_all(&response).await.unwrap();

    assert_eq!(read_n(&mut stream, 4).await, vec![0, 0, 0, 0]); // SecurityResult OK

    server.stop().await;
}

#[tokio::test]
async fn vnc_auth_rejects_wrong_password_with_reason() {
    let (server, addr) = start_server(4, 4, "auth", Some("pass")).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_eq!(read_n(&mut stream, 12).await, b"RFB 003.008\n");
    stream.write_all(b"RFB 003.008\n").await.unwrap();
    assert_eq!(read_n(&mut stream, 2).await, vec![1, 2]);
    stream.write_all(&[2]).await.unwrap();

    let challenge: [u8; 16] = read_n(&mut stream, 16).await.try_into().unwrap();
    let response = vnc_response("wrong", &challenge);
    stream.write_all(&response).await.unwrap();

    assert_eq!(read_n(&mut stream, 4).await, vec![0, 0, 0, 1]); // SecurityResult failed

    // 3.8 carries a length-prefixed reason, then the stream closes
    let reason_len = u32::from_be_bytes(read_n(&mut stream, 4).await.try_into().unwrap());
    let reason = read_n(&mut stream, reason_len as usize).await;
    assert!(!reason.is_empty());

    assert_eq!(
        timeout(TEST_TIMEOUT, stream.read(&mut [0u8; 1])).await.unwrap().unwrap(),
        0
    );

    server.stop().await;
}

#[tokio::test]
async fn legacy_33_client_gets_dictated_security_type() {
    let (server, addr) = start_server(4, 4, "legacy", None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_eq!(read_n(&mut stream, 12).await, b"RFB 003.008\n");
    stream.write_all(b"RFB 003.003\n").await.unwrap();

    // 3.3: the security type arrives as a single u32, no list
    assert_eq!(read_n(&mut stream, 4).await, vec![0, 0, 0, 1]);
    assert_eq!(read_n(&mut stream, 4).await, vec![0, 0, 0, 0]); // SecurityResult OK

    stream.write_all(&[0]).await.unwrap(); // ClientInit
    let _server_init = read_n(&mut stream, 24 + 6).await; // name "legacy"

    server.stop().await;
}

#[tokio::test]
async fn full_update_request_returns_raw_rectangle() {
    let (server, addr) = start_server(2, 2, "raw", None).await;
    server
        .set_frame(&(0u8..16).collect::<Vec<u8>>())
        .await
        .unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    handshake_no_auth(&mut stream).await;

    // Non-incremental FramebufferUpdateRequest covering the screen
    stream
        .write_all(&[3, 0, 0, 0, 0, 0, 0, 2, 0, 2])
        .await
        .unwrap();

    let update = read_n(&mut stream, 4 + 12 + 16).await;
    assert_eq!(&update[0..4], &[0, 0, 0, 1]); // one rectangle
    assert_eq!(&update[4..16], &[0, 0, 0, 0, 0, 2, 0, 2, 0, 0, 0, 0]); // raw, full screen
    assert_eq!(
        &update[16..],
        &[
            0, 1, 2, 0, //
            4, 5, 6, 0, //
            8, 9, 10, 0, //
            12, 13, 14, 0,
        ]
    );

    server.stop().await;
}

#[tokio::test]
async fn hextile_is_used_once_advertised() {
    let (server, addr) = start_server(16, 16, "hex", None).await;
    // Solid red framebuffer (BGRA)
    server
        .set_frame(&[0x00, 0x00, 0xFF, 0xFF].repeat(256))
        .await
        .unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    handshake_no_auth(&mut stream).await;

    // SetEncodings: Hextile only
    stream
        .write_all(&[2, 0, 0, 1, 0, 0, 0, 5])
        .await
        .unwrap();
    // Full update request
    stream
        .write_all(&[3, 0, 0, 0, 0, 0, 0, 16, 0, 16])
        .await
        .unwrap();

    let update = read_n(&mut stream, 4 + 12 + 5).await;
    assert_eq!(&update[0..4], &[0, 0, 0, 1]);
    assert_eq!(&update[4..12], &[0, 0, 0, 0, 0, 16, 0, 16]);
    assert_eq!(&update[12..16], &5i32.to_be_bytes()[..]); // Hextile
    assert_eq!(&update[16..], &[0x02, 0x00, 0x00, 0xFF, 0x00]); // solid tile

    server.stop().await;
}

#[tokio::test]
async fn incremental_request_waits_for_a_change() {
    let (server, addr) = start_server(8, 8, "inc", None).await;
    let frame = vec![0u8; 8 * 8 * 4];
    server.set_frame(&frame).await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    handshake_no_auth(&mut stream).await;

    // Prime the session's snapshot with a full update
    stream
        .write_all(&[3, 0, 0, 0, 0, 0, 0, 8, 0, 8])
        .await
        .unwrap();
    read_n(&mut stream, 4 + 12 + 8 * 8 * 4).await;

    // Incremental request with nothing changed: nothing may arrive
    stream
        .write_all(&[3, 1, 0, 0, 0, 0, 0, 8, 0, 8])
        .await
        .unwrap();
    let mut probe = [0u8; 1];
    assert!(
        timeout(Duration::from_millis(300), stream.read_exact(&mut probe))
            .await
            .is_err(),
        "no update may be sent while the framebuffer is unchanged"
    );

    // A broadcast with one changed pixel services the pending request
    let mut changed = frame;
    changed[0] = 0xFF;
    server.broadcast_update(&changed).await.unwrap();

    let update = read_n(&mut stream, 4 + 12).await;
    assert_eq!(&update[0..4], &[0, 0, 0, 1]);
    // The whole 8x8 framebuffer sits inside one diff tile
    assert_eq!(&update[4..12], &[0, 0, 0, 0, 0, 8, 0, 8]);
    read_n(&mut stream, 8 * 8 * 4).await;

    server.stop().await;
}

struct CountingSink {
    keys: AtomicU32,
    pointers: AtomicU32,
}

impl InputSink for CountingSink {
    fn key_event(&self, _down: bool, _keysym: u32) {
        self.keys.fetch_add(1, Ordering::SeqCst);
    }

    fn pointer_event(&self, _button_mask: u8, _x: u16, _y: u16) {
        self.pointers.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn input_events_reach_sink_and_event_stream() {
    let (server, addr) = start_server(8, 8, "input", None).await;
    let sink = Arc::new(CountingSink {
        keys: AtomicU32::new(0),
        pointers: AtomicU32::new(0),
    });
    server.set_input_sink(sink.clone());
    let mut events = server.events();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    handshake_no_auth(&mut stream).await;

    // KeyEvent: 'a' pressed
    stream
        .write_all(&[4, 1, 0, 0, 0, 0, 0, 0x61])
        .await
        .unwrap();
    // PointerEvent: left button at (10, 20)
    stream.write_all(&[5, 1, 0, 10, 0, 20]).await.unwrap();

    let mut saw_key = false;
    let mut saw_pointer = false;
    while !(saw_key && saw_pointer) {
        match timeout(TEST_TIMEOUT, events.recv()).await.unwrap().unwrap() {
            ServerEvent::KeyEvent { key, pressed, .. } => {
                assert_eq!(key, 0x61);
                assert!(pressed);
                saw_key = true;
            }
            ServerEvent::PointerEvent { x, y, button_mask, .. } => {
                assert_eq!((x, y, button_mask), (10, 20, 1));
                saw_pointer = true;
            }
            _ => {}
        }
    }

    assert_eq!(sink.keys.load(Ordering::SeqCst), 1);
    assert_eq!(sink.pointers.load(Ordering::SeqCst), 1);

    server.stop().await;
}

#[tokio::test]
async fn unknown_message_type_terminates_the_session() {
    let (server, addr) = start_server(8, 8, "bad", None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    handshake_no_auth(&mut stream).await;

    // The session registers shortly after its handshake completes
    timeout(TEST_TIMEOUT, async {
        while server.client_count().await != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    stream.write_all(&[0xAA]).await.unwrap();

    // The server closes the connection
    assert_eq!(
        timeout(TEST_TIMEOUT, stream.read(&mut [0u8; 16])).await.unwrap().unwrap(),
        0
    );

    server.stop().await;
}

#[tokio::test]
async fn cut_text_is_consumed_without_breaking_the_session() {
    let (server, addr) = start_server(2, 2, "cut", None).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    handshake_no_auth(&mut stream).await;

    // ClientCutText with a 5-byte payload, then a normal update request
    stream
        .write_all(&[6, 0, 0, 0, 0, 0, 0, 5])
        .await
        .unwrap();
    stream.write_all(b"hello").await.unwrap();
    stream
        .write_all(&[3, 0, 0, 0, 0, 0, 0, 2, 0, 2])
        .await
        .unwrap();

    let update = read_n(&mut stream, 4 + 12 + 16).await;
    assert_eq!(&update[0..4], &[0, 0, 0, 1]);

    server.stop().await;
}
