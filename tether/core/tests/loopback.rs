//! End-to-end tests over real loopback connections.

use std::{
    io::{Read, Write},
    net::TcpListener,
    thread,
};

use rstest::rstest;
use tether_core::{Socket, SocketFamily, SocketKind, Tether, TetherError, Uid, READ_CHUNK_SIZE};

fn bind_v4() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Accepts one connection, echoes exactly `expected` bytes back, and hangs
/// up so the client's drain loop sees end of stream.
fn spawn_echo(listener: TcpListener, expected: usize) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let (mut peer, _) = listener.accept().unwrap();
        let mut payload = vec![0u8; expected];
        peer.read_exact(&mut payload).unwrap();
        peer.write_all(&payload).unwrap();
    })
}

/// Accepts one connection, sends `payload`, and hangs up.
fn spawn_sender(listener: TcpListener, payload: Vec<u8>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let (mut peer, _) = listener.accept().unwrap();
        peer.write_all(&payload).unwrap();
    })
}

/// Reads until the peer hangs up. A single `read` ends at any short
/// receive, so bigger payloads can arrive split across several calls.
fn drain(socket: &Socket) -> Vec<u8> {
    let mut received = Vec::new();
    loop {
        let chunk = socket.read().unwrap();
        if chunk.is_empty() {
            break;
        }
        received.extend(chunk);
    }
    received
}

#[rstest]
#[case(16)]
#[case(READ_CHUNK_SIZE)]
#[case(3 * READ_CHUNK_SIZE + 17)]
fn echo_roundtrip(#[case] size: usize) {
    let (listener, port) = bind_v4();
    let server = spawn_echo(listener, size);

    let payload: Vec<u8> = (0..size).map(|position| (position % 251) as u8).collect();
    let socket = Socket::new(Uid::from(0));
    socket.open_tcp_to("127.0.0.1", port).unwrap();

    // A single send may come up short; repeating is the caller's job.
    let mut sent = 0;
    while sent < payload.len() {
        sent += socket.write(&payload[sent..]).unwrap();
    }

    assert_eq!(drain(&socket), payload);
    socket.close().unwrap();
    server.join().unwrap();
}

#[test]
fn facade_flow() {
    let (listener, port) = bind_v4();
    let message = "hello, tether";
    let server = spawn_echo(listener, message.len());

    let tether = Tether::new();
    tether.initialize().unwrap();

    let uid = tether.sockets().generate_tcp("127.0.0.1", port).unwrap();
    let socket = tether.sockets().at(uid).unwrap();
    assert!(!socket.is_open());
    assert_eq!(socket.describe(false), format!("{uid} [NONE, DISC]"));

    socket.open_tcp().unwrap();
    assert!(socket.is_open());
    assert_eq!(socket.kind().unwrap(), SocketKind::Tcp);
    assert_eq!(socket.family().unwrap(), SocketFamily::Ipv4);
    assert_eq!(socket.address().unwrap(), "127.0.0.1");
    assert_eq!(
        socket.describe(true),
        format!("{uid} [TCP, CONN, IPV4] 127.0.0.1 (127.0.0.1):{port}")
    );

    assert_eq!(socket.write_text(message).unwrap(), message.len());
    assert_eq!(drain(&socket), message.as_bytes());

    socket.close().unwrap();
    assert!(!socket.is_open());
    drop(socket);

    assert_eq!(tether.sockets().decrement_reference(uid).unwrap(), 0);
    assert_eq!(tether.uids().size().unwrap(), 0);
    tether.uninitialize().unwrap();
    server.join().unwrap();
}

#[test]
fn reopen_uses_retained_seed() {
    let (listener, port) = bind_v4();
    let server = thread::spawn(move || {
        for _ in 0..2 {
            let (peer, _) = listener.accept().unwrap();
            drop(peer);
        }
    });

    let socket = Socket::new(Uid::from(3));
    socket.open_tcp_to("127.0.0.1", port).unwrap();
    assert!(matches!(
        socket.open_tcp_to("127.0.0.1", port),
        Err(TetherError::AlreadyOpen)
    ));
    assert!(matches!(socket.open_tcp(), Err(TetherError::AlreadyOpen)));

    socket.close().unwrap();
    assert!(matches!(socket.close(), Err(TetherError::NotOpen)));
    assert_eq!(socket.host(), "127.0.0.1");
    assert_eq!(socket.port(), port);

    socket.open_tcp().unwrap();
    socket.close().unwrap();
    server.join().unwrap();
}

#[test]
fn ipv6_loopback() {
    // Not every environment has ::1; skip quietly where it is missing.
    let Ok(listener) = TcpListener::bind("[::1]:0") else {
        return;
    };
    let port = listener.local_addr().unwrap().port();
    let server = spawn_sender(listener, b"six".to_vec());

    let socket = Socket::new(Uid::from(6));
    socket.open_tcp_to("::1", port).unwrap();
    assert_eq!(socket.family().unwrap(), SocketFamily::Ipv6);
    assert_eq!(socket.address().unwrap(), "::1");
    assert!(socket.describe(true).contains("[TCP, CONN, IPV6]"));

    assert_eq!(drain(&socket), b"six");
    socket.close().unwrap();
    server.join().unwrap();
}

#[test]
fn drop_closes_endpoint() {
    let (listener, port) = bind_v4();
    let server = thread::spawn(move || {
        let (mut peer, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        peer.read_to_end(&mut received).unwrap();
        received
    });

    let socket = Socket::new(Uid::from(9));
    socket.open_tcp_to("127.0.0.1", port).unwrap();
    socket.write(b"bye").unwrap();
    drop(socket);

    // The server's read ends only because dropping the socket hung up.
    assert_eq!(server.join().unwrap(), b"bye");
}

#[test]
fn connect_failure_names_the_op() {
    let (listener, port) = bind_v4();
    drop(listener);

    let socket = Socket::new(Uid::from(11));
    match socket.open_tcp_to("127.0.0.1", port) {
        Err(TetherError::Transport { op, .. }) => assert_eq!(op, "connect"),
        other => panic!("expected a connect failure, got {other:?}"),
    }
    assert!(!socket.is_open());
}
