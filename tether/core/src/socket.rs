//! Lifecycle-managed TCP endpoint.
//!
//! A [`Socket`] is constructed closed, optionally seeded with a host/port
//! pair, and moves between exactly two observable states: closed and open.
//! Operations that need a connection fail with [`TetherError::NotOpen`]
//! instead of guessing; closing a closed socket is an error, not a no-op.
//! All I/O is synchronous and blocking, with no timeout or cancellation.

use std::{
    fmt,
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    sync::Mutex,
};

use socket2::{Domain, Protocol, Type};
use tracing::Level;

use crate::{
    error::{Result, TetherError},
    uid::Uid,
};

/// Receive-loop chunk size; a receive shorter than this ends the loop.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Transport kind of an endpoint. Only TCP endpoints can be opened; the UDP
/// kind exists for rendering symmetry and is never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Tcp,
    Udp,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketKind::Tcp => f.write_str("TCP"),
            SocketKind::Udp => f.write_str("UDP"),
        }
    }
}

/// Address family of the resolved peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketFamily {
    Ipv4,
    Ipv6,
}

impl fmt::Display for SocketFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketFamily::Ipv4 => f.write_str("IPV4"),
            SocketFamily::Ipv6 => f.write_str("IPV6"),
        }
    }
}

/// Endpoint state behind the instance lock.
///
/// `kind`, `family`, and `peer` are only populated while `stream` is; the
/// host/port seed survives a close so the endpoint can be reopened.
#[derive(Debug, Default)]
struct Endpoint {
    host: String,
    port: u16,
    kind: Option<SocketKind>,
    family: Option<SocketFamily>,
    peer: Option<SocketAddr>,
    stream: Option<TcpStream>,
}

impl Endpoint {
    fn require_open(&self) -> Result<&TcpStream> {
        self.stream.as_ref().ok_or(TetherError::NotOpen)
    }

    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(TetherError::AlreadyOpen);
        }

        let peer = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| TetherError::transport("resolve", source))?
            .next()
            .ok_or_else(|| {
                TetherError::transport(
                    "resolve",
                    io::Error::new(io::ErrorKind::NotFound, "name resolved to no addresses"),
                )
            })?;

        let socket = socket2::Socket::new(
            Domain::for_address(peer),
            Type::STREAM,
            Some(Protocol::TCP),
        )
        .map_err(|source| TetherError::transport("socket", source))?;
        socket
            .connect(&peer.into())
            .map_err(|source| TetherError::transport("connect", source))?;

        self.kind = Some(SocketKind::Tcp);
        self.family = Some(if peer.is_ipv4() {
            SocketFamily::Ipv4
        } else {
            SocketFamily::Ipv6
        });
        self.peer = Some(peer);
        self.stream = Some(socket.into());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.stream.take().is_none() {
            return Err(TetherError::NotOpen);
        }

        self.kind = None;
        self.family = None;
        self.peer = None;
        Ok(())
    }

    fn read(&self) -> Result<Vec<u8>> {
        let mut stream = self.require_open()?;
        let mut received = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let count = stream
                .read(&mut chunk)
                .map_err(|source| TetherError::transport("receive", source))?;
            received.extend_from_slice(&chunk[..count]);
            if count < READ_CHUNK_SIZE {
                break;
            }
        }

        Ok(received)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut stream = self.require_open()?;
        stream
            .write(data)
            .map_err(|source| TetherError::transport("send", source))
    }

    fn describe(&self, uid: Uid, verbose: bool) -> String {
        let kind = self
            .kind
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "NONE".to_string());
        let state = if self.stream.is_some() { "CONN" } else { "DISC" };

        if !verbose {
            return format!("{uid} [{kind}, {state}]");
        }

        let mut rendered = match self.family {
            Some(family) => format!("{uid} [{kind}, {state}, {family}]"),
            None => format!("{uid} [{kind}, {state}]"),
        };
        match self.peer {
            Some(peer) => {
                rendered.push_str(&format!(" {} ({}):{}", self.host, peer.ip(), self.port))
            }
            None if !self.host.is_empty() => {
                rendered.push_str(&format!(" {}:{}", self.host, self.port))
            }
            None => {}
        }

        rendered
    }
}

/// One connection-oriented endpoint, named by the [`Uid`] it was registered
/// under.
///
/// Each operation holds the instance's own lock for its full duration, so a
/// single socket is safe to share across threads; nothing is ordered across
/// instances. Dropping an open socket closes the underlying stream.
#[derive(Debug)]
pub struct Socket {
    uid: Uid,
    endpoint: Mutex<Endpoint>,
}

impl Socket {
    /// A closed endpoint with no host/port seed.
    pub fn new(uid: Uid) -> Self {
        Self::with_endpoint(uid, "", 0)
    }

    /// A closed endpoint seeded for a later [`Socket::open_tcp`].
    pub fn with_endpoint(uid: Uid, host: impl Into<String>, port: u16) -> Self {
        Self {
            uid,
            endpoint: Mutex::new(Endpoint {
                host: host.into(),
                port,
                ..Default::default()
            }),
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Resolves the stored host/port seed and connects to it. The system
    /// resolver decides the address family; the first result wins.
    #[tracing::instrument(level = Level::TRACE, skip(self), err(level = Level::TRACE))]
    pub fn open_tcp(&self) -> Result<()> {
        self.endpoint.lock()?.open()
    }

    /// Stores a new host/port seed, then resolves and connects to it. The
    /// seed of an already open endpoint is left untouched.
    #[tracing::instrument(level = Level::TRACE, skip(self), err(level = Level::TRACE))]
    pub fn open_tcp_to(&self, host: &str, port: u16) -> Result<()> {
        let mut endpoint = self.endpoint.lock()?;
        if endpoint.stream.is_some() {
            return Err(TetherError::AlreadyOpen);
        }

        endpoint.host = host.to_string();
        endpoint.port = port;
        endpoint.open()
    }

    /// Disconnects and clears everything but the host/port seed. Strict
    /// contract: closing a closed socket is an error, not a no-op.
    #[tracing::instrument(level = Level::TRACE, skip(self), err(level = Level::TRACE))]
    pub fn close(&self) -> Result<()> {
        self.endpoint.lock()?.close()
    }

    /// Drains whatever the peer has sent, in [`READ_CHUNK_SIZE`] chunks,
    /// until a short or empty receive. An empty result means the peer closed
    /// with nothing pending.
    #[tracing::instrument(level = Level::TRACE, skip(self), err(level = Level::TRACE))]
    pub fn read(&self) -> Result<Vec<u8>> {
        self.endpoint.lock()?.read()
    }

    /// [`Socket::read`], rendered as UTF-8 text (lossily).
    pub fn read_text(&self) -> Result<String> {
        let received = self.read()?;
        Ok(String::from_utf8_lossy(&received).into_owned())
    }

    /// Sends `data` with a single blocking send and returns the number of
    /// bytes actually sent. A short count is the caller's to detect and
    /// repeat; there is no retry loop here.
    #[tracing::instrument(level = Level::TRACE, skip(self, data), ret, err(level = Level::TRACE))]
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.endpoint.lock()?.write(data)
    }

    /// [`Socket::write`] over the text's UTF-8 bytes.
    pub fn write_text(&self, data: &str) -> Result<usize> {
        self.write(data.as_bytes())
    }

    pub fn is_open(&self) -> bool {
        self.endpoint
            .lock()
            .map(|endpoint| endpoint.stream.is_some())
            .unwrap_or(false)
    }

    /// Resolved peer address in standard textual form (dotted-decimal or
    /// colon-hex), without the port. Requires an open socket.
    pub fn address(&self) -> Result<String> {
        let endpoint = self.endpoint.lock()?;
        let peer = endpoint.peer.ok_or(TetherError::NotOpen)?;
        Ok(peer.ip().to_string())
    }

    /// Address family of the connection. Requires an open socket.
    pub fn family(&self) -> Result<SocketFamily> {
        self.endpoint.lock()?.family.ok_or(TetherError::NotOpen)
    }

    /// Transport kind of the connection. Requires an open socket.
    pub fn kind(&self) -> Result<SocketKind> {
        self.endpoint.lock()?.kind.ok_or(TetherError::NotOpen)
    }

    /// Stored host seed, empty when never seeded.
    pub fn host(&self) -> String {
        self.endpoint
            .lock()
            .map(|endpoint| endpoint.host.clone())
            .unwrap_or_default()
    }

    /// Stored port seed.
    pub fn port(&self) -> u16 {
        self.endpoint
            .lock()
            .map(|endpoint| endpoint.port)
            .unwrap_or_default()
    }

    /// Diagnostic rendering: `{<uid>} [<kind>, <state>]`, with family, host,
    /// resolved address, and port appended in verbose mode.
    pub fn describe(&self, verbose: bool) -> String {
        match self.endpoint.lock() {
            Ok(endpoint) => endpoint.describe(self.uid, verbose),
            Err(_) => self.uid.to_string(),
        }
    }
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(false))
    }
}

#[cfg(test)]
mod socket_tests {
    use rstest::rstest;

    use super::*;

    fn seeded() -> Socket {
        Socket::with_endpoint(Uid::from(7), "localhost", 4096)
    }

    #[rstest]
    #[case(SocketKind::Tcp, "TCP")]
    #[case(SocketKind::Udp, "UDP")]
    fn kind_tokens(#[case] kind: SocketKind, #[case] token: &str) {
        assert_eq!(kind.to_string(), token);
    }

    #[rstest]
    #[case(SocketFamily::Ipv4, "IPV4")]
    #[case(SocketFamily::Ipv6, "IPV6")]
    fn family_tokens(#[case] family: SocketFamily, #[case] token: &str) {
        assert_eq!(family.to_string(), token);
    }

    #[test]
    fn closed_operations_fail() {
        let socket = seeded();
        assert!(matches!(socket.read(), Err(TetherError::NotOpen)));
        assert!(matches!(socket.write(b"x"), Err(TetherError::NotOpen)));
        assert!(matches!(socket.close(), Err(TetherError::NotOpen)));
        assert!(matches!(socket.address(), Err(TetherError::NotOpen)));
        assert!(matches!(socket.family(), Err(TetherError::NotOpen)));
        assert!(matches!(socket.kind(), Err(TetherError::NotOpen)));
    }

    #[test]
    fn seeded_accessors() {
        let socket = seeded();
        assert!(!socket.is_open());
        assert_eq!(socket.uid(), Uid::from(7));
        assert_eq!(socket.host(), "localhost");
        assert_eq!(socket.port(), 4096);
    }

    #[test]
    fn closed_rendering() {
        let socket = seeded();
        assert_eq!(socket.to_string(), "{00000007} [NONE, DISC]");
        assert_eq!(socket.describe(false), "{00000007} [NONE, DISC]");
        assert_eq!(
            socket.describe(true),
            "{00000007} [NONE, DISC] localhost:4096"
        );

        let unseeded = Socket::new(Uid::from(7));
        assert_eq!(unseeded.describe(true), "{00000007} [NONE, DISC]");
    }

    #[test]
    fn open_without_seed_fails_in_resolve() {
        let socket = Socket::new(Uid::from(0));
        match socket.open_tcp() {
            Err(TetherError::Transport { op, .. }) => assert_eq!(op, "resolve"),
            other => panic!("expected a resolve failure, got {other:?}"),
        }
        assert!(!socket.is_open());
    }

    #[test]
    fn unresolvable_host_fails_in_resolve() {
        // `.invalid` is reserved and never resolves.
        let socket = Socket::with_endpoint(Uid::from(1), "host.invalid", 80);
        match socket.open_tcp() {
            Err(TetherError::Transport { op, .. }) => assert_eq!(op, "resolve"),
            other => panic!("expected a resolve failure, got {other:?}"),
        }
    }
}
