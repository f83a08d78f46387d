//! A single client connection, plaintext or TLS.
//!
//! # Design
//! A `Connection` belongs to exactly one worker and is never shared. Reads go
//! through a `BufReader` so the status and header lines can be consumed a
//! line at a time while the body is read by exact length from the same
//! buffer. Writes bypass the buffer via `get_mut()`.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Instant;

use crate::abort::AbortHandle;
use crate::config::EngineConfig;
use crate::error::{ErrorCode, ParseError, TransferError};
use crate::tls::{Connector, TlsStream};
use crate::url::Target;

pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(tcp) => tcp,
            Stream::Tls(tls) => tls.get_ref(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.read(buf),
            Stream::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.write(buf),
            Stream::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(tcp) => tcp.flush(),
            Stream::Tls(tls) => tls.flush(),
        }
    }
}

/// Failure while reading one line of the response head.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ReadLineError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub struct Connection {
    target: Target,
    reader: BufReader<Stream>,
    idle: bool,
    close: bool,
    opened_at: Instant,
    completed_at: Option<Instant>,
}

impl Connection {
    /// Resolve (IPv4 only), connect and, for `https`, complete the TLS
    /// handshake. The socket is registered with `abort` before the handshake
    /// so an abort can interrupt it.
    pub(crate) fn open(
        target: &Target,
        connector: &Connector,
        abort: &AbortHandle,
        config: &EngineConfig,
    ) -> Result<Self, TransferError> {
        if target.secure && !connector.is_enabled() {
            return Err(TransferError::new(
                ErrorCode::NoTls,
                "TLS support is not available in this engine",
            ));
        }

        let addr = resolve_ipv4(target)?;
        tracing::debug!(%addr, host = %target.host, "connecting");

        let conn_fail = |err: io::Error| TransferError::caused_by(ErrorCode::ConnFail, "Connection failed: ", err);
        let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout()).map_err(conn_fail)?;
        tcp.set_read_timeout(Some(config.io_timeout())).map_err(conn_fail)?;
        tcp.set_write_timeout(Some(config.io_timeout())).map_err(conn_fail)?;
        tcp.set_nodelay(true).map_err(conn_fail)?;
        abort.attach(&tcp);

        let stream = if target.secure {
            Stream::Tls(Box::new(connector.connect(tcp, &target.host)?))
        } else {
            Stream::Plain(tcp)
        };

        Ok(Self {
            target: target.clone(),
            reader: BufReader::new(stream),
            idle: false,
            close: false,
            opened_at: Instant::now(),
            completed_at: None,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Set once either side asked for `Connection: close`.
    pub fn is_closing(&self) -> bool {
        self.close
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    pub(crate) fn set_close(&mut self) {
        self.close = true;
    }

    /// Hand the connection to a new exchange.
    pub(crate) fn begin(&mut self, abort: &AbortHandle) {
        self.idle = false;
        abort.attach(self.reader.get_ref().tcp());
    }

    pub(crate) fn finish(&mut self) {
        self.idle = true;
        self.completed_at = Some(Instant::now());
    }

    pub(crate) fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(bytes)?;
        stream.flush()
    }

    /// Read one line of at most `max` bytes, without its `\r\n` or `\n`.
    pub(crate) fn read_line(&mut self, max: usize) -> Result<String, ReadLineError> {
        let mut line = Vec::new();
        let limit = max as u64 + 2;
        let read = (&mut self.reader).take(limit).read_until(b'\n', &mut line)?;
        if read == 0 {
            return Err(ReadLineError::Closed);
        }

        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        } else if (line.len() as u64) < limit {
            return Err(ReadLineError::Closed);
        }

        if line.len() > max {
            return Err(ParseError::LineTooLong { limit: max }.into());
        }
        String::from_utf8(line).map_err(|_| ParseError::NotUtf8.into())
    }

    /// Read up to `len` bytes. A shorter result means the peer closed early.
    pub(crate) fn read_body(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                // rustls reports a close without close_notify this way.
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("idle", &self.idle)
            .field("close", &self.close)
            .finish_non_exhaustive()
    }
}

fn resolve_ipv4(target: &Target) -> Result<SocketAddr, TransferError> {
    (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|err| TransferError::caused_by(ErrorCode::ConnFail, "Connection failed: ", err))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| {
            TransferError::new(
                ErrorCode::ConnFail,
                format!("Connection failed: no IPv4 address for {}", target.host),
            )
        })
}
