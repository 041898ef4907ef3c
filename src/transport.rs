//! Byte-stream transport contract.
//!
//! The wire client only needs blocking reads and writes with a shared
//! send/receive timeout; socket acquisition (DNS, connect) is delegated to
//! a `Connector` so the engine can be driven by an in-memory stream in
//! tests.

use bufstream::BufStream;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use Result;

/// A blocking byte stream carrying framed messages.
pub trait Transport: Read + Write {
    /// Applies one millisecond timeout to both sends and receives.
    /// Zero disables the timeout.
    fn set_timeout(&mut self, millis: u64) -> io::Result<()>;

    /// Shuts the stream down; subsequent I/O fails.
    fn close(&mut self) -> io::Result<()>;
}

/// Acquires transports to named endpoints.
pub trait Connector {
    type Stream: Transport;

    fn connect(&mut self, host: &str, port: u16) -> Result<Self::Stream>;
}

/// A buffered TCP transport.
pub struct TcpTransport {
    stream: BufStream<TcpStream>,
}

impl TcpTransport {
    pub fn connect(host: &str, port: u16) -> Result<TcpTransport> {
        let stream = TcpStream::connect((host, port))?;
        Ok(TcpTransport {
            stream: BufStream::new(stream),
        })
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn set_timeout(&mut self, millis: u64) -> io::Result<()> {
        let timeout = if millis == 0 {
            None
        } else {
            Some(Duration::from_millis(millis))
        };
        self.stream.get_ref().set_read_timeout(timeout)?;
        self.stream.get_ref().set_write_timeout(timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        self.stream.get_ref().shutdown(Shutdown::Both)
    }
}

/// The default connector, dialing plain TCP.
#[derive(Debug, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpTransport;

    fn connect(&mut self, host: &str, port: u16) -> Result<TcpTransport> {
        TcpTransport::connect(host, port)
    }
}
