//! Message Transport
//!
//! The test session protocol needs three primitives: a blocking
//! request/reply exchange, a fire-and-forget notification, and a bound
//! endpoint that receives pushed messages and acknowledges them.
//! [`TcpTransport`] implements them over plain TCP with one connection per
//! exchange. Each message is framed by a [`LengthDelimitedCodec`]: a 4-byte
//! big-endian length followed by the UTF-8 payload.

use crate::result::{RecorderError, RecorderResult};
use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// URL scheme of TCP endpoints
pub const TCP_SCHEME: &str = "tcp://";

/// Largest accepted payload
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Bytes requested from the socket per read while a frame is incomplete
const READ_CHUNK: usize = 4096;

/// Pending connections queued by the listening socket
const LISTEN_BACKLOG: i32 = 128;

/// Shortest accept timeout; a zero `SO_RCVTIMEO` would block forever
const MIN_ACCEPT_WAIT: Duration = Duration::from_millis(1);

/// Bound endpoint receiving pushed messages
pub trait MessageEndpoint: Send {
    /// Wait up to `timeout` for the next message; `Ok(None)` on timeout
    fn receive(&mut self, timeout: Duration) -> RecorderResult<Option<String>>;

    /// Answer the message returned by the last [`receive`](Self::receive)
    fn reply(&mut self, message: &str) -> RecorderResult<()>;

    /// Address peers connect to
    fn address(&self) -> String;
}

/// Connection factory for the test session protocol
pub trait Transport: Send + 'static {
    /// Endpoint type produced by [`bind`](Self::bind)
    type Endpoint: MessageEndpoint + 'static;

    /// Send `message` to `endpoint` and wait up to `timeout` for the reply
    fn request(&self, endpoint: &str, message: &str, timeout: Duration) -> RecorderResult<String>;

    /// Send `message` to `endpoint` without waiting for a reply
    fn notify(&self, endpoint: &str, message: &str) -> RecorderResult<()>;

    /// Bind a receiving endpoint at `endpoint`
    fn bind(&self, endpoint: &str) -> RecorderResult<Self::Endpoint>;
}

/// Resolve a `tcp://host:port` address
pub fn parse_endpoint(endpoint: &str) -> RecorderResult<SocketAddr> {
    let invalid = || RecorderError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
    };
    let authority = endpoint.strip_prefix(TCP_SCHEME).ok_or_else(invalid)?;
    authority
        .to_socket_addrs()
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(invalid)
}

/// Render a socket address as an endpoint string
#[must_use]
pub fn format_endpoint(address: SocketAddr) -> String {
    format!("{TCP_SCHEME}{address}")
}

fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

fn codec_error(error: io::Error) -> RecorderError {
    RecorderError::transport(format!("frame rejected: {error}"))
}

/// Write one length-prefixed frame
pub fn write_frame<W: Write>(writer: &mut W, message: &str) -> RecorderResult<()> {
    let mut buffer = BytesMut::with_capacity(4 + message.len());
    frame_codec()
        .encode(Bytes::copy_from_slice(message.as_bytes()), &mut buffer)
        .map_err(codec_error)?;
    writer.write_all(&buffer)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame
///
/// The reader may be consumed past the end of the frame, so each stream
/// carries a single message.
pub fn read_frame<R: Read>(reader: &mut R) -> RecorderResult<String> {
    let mut codec = frame_codec();
    let mut buffer = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(frame) = codec.decode(&mut buffer).map_err(codec_error)? {
            return std::str::from_utf8(&frame)
                .map(str::to_owned)
                .map_err(|_| RecorderError::transport("payload is not valid UTF-8"));
        }
        let read = match reader.read(&mut chunk) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        buffer.extend_from_slice(&chunk[..read]);
    }
}

fn timeout_error(error: io::Error, timeout: Duration) -> RecorderError {
    match error.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => RecorderError::Timeout {
            ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        },
        _ => RecorderError::Io(error),
    }
}

fn map_frame_error(error: RecorderError, timeout: Duration) -> RecorderError {
    match error {
        RecorderError::Io(e) => timeout_error(e, timeout),
        other => other,
    }
}

/// Framed TCP transport
#[derive(Debug, Clone, Copy)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(250),
        }
    }
}

impl TcpTransport {
    /// Create a transport with the default connect timeout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn connect(&self, endpoint: &str) -> RecorderResult<TcpStream> {
        let address = parse_endpoint(endpoint)?;
        let stream = TcpStream::connect_timeout(&address, self.connect_timeout)
            .map_err(|e| timeout_error(e, self.connect_timeout))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    type Endpoint = TcpEndpoint;

    fn request(&self, endpoint: &str, message: &str, timeout: Duration) -> RecorderResult<String> {
        let mut stream = self.connect(endpoint)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        write_frame(&mut stream, message).map_err(|e| map_frame_error(e, timeout))?;
        read_frame(&mut stream).map_err(|e| map_frame_error(e, timeout))
    }

    fn notify(&self, endpoint: &str, message: &str) -> RecorderResult<()> {
        let mut stream = self.connect(endpoint)?;
        stream.set_write_timeout(Some(self.connect_timeout))?;
        write_frame(&mut stream, message)?;
        // The peer may still answer; nobody reads it.
        let _ = stream.shutdown(std::net::Shutdown::Write);
        Ok(())
    }

    fn bind(&self, endpoint: &str) -> RecorderResult<TcpEndpoint> {
        TcpEndpoint::bind(endpoint)
    }
}

/// Bound TCP endpoint accepting one connection per pushed message
#[derive(Debug)]
pub struct TcpEndpoint {
    listener: Socket,
    address: SocketAddr,
    pending: Option<TcpStream>,
}

impl TcpEndpoint {
    /// Bind `endpoint`; port 0 picks a free port
    pub fn bind(endpoint: &str) -> RecorderResult<Self> {
        let requested = parse_endpoint(endpoint)?;
        let listener = Socket::new(
            Domain::for_address(requested),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        #[cfg(unix)]
        listener.set_reuse_address(true)?;
        listener.bind(&requested.into())?;
        listener.listen(LISTEN_BACKLOG)?;
        let address = listener
            .local_addr()?
            .as_socket()
            .ok_or_else(|| RecorderError::transport("listener is not bound to an IP address"))?;
        Ok(Self {
            listener,
            address,
            pending: None,
        })
    }

    /// Accept the next connection, blocking until `deadline`
    ///
    /// The wait is bounded by the listener's receive timeout. Returns
    /// `Ok(None)` when the deadline passes first.
    pub fn accept_until(&self, deadline: Instant) -> RecorderResult<Option<TcpStream>> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.listener.set_read_timeout(Some(remaining.max(MIN_ACCEPT_WAIT)))?;
            match self.listener.accept() {
                Ok((socket, _)) => {
                    let stream = TcpStream::from(socket);
                    // Accepted sockets may inherit the listener's timeout.
                    stream.set_read_timeout(None)?;
                    stream.set_nodelay(true)?;
                    return Ok(Some(stream));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl MessageEndpoint for TcpEndpoint {
    fn receive(&mut self, timeout: Duration) -> RecorderResult<Option<String>> {
        self.pending = None;
        let Some(mut stream) = self.accept_until(Instant::now() + timeout)? else {
            return Ok(None);
        };
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        let message = read_frame(&mut stream).map_err(|e| map_frame_error(e, timeout))?;
        self.pending = Some(stream);
        Ok(Some(message))
    }

    fn reply(&mut self, message: &str) -> RecorderResult<()> {
        match self.pending.take() {
            Some(mut stream) => write_frame(&mut stream, message),
            None => Err(RecorderError::transport("no message to reply to")),
        }
    }

    fn address(&self) -> String {
        format_endpoint(self.address)
    }
}
