use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::HttpResponse;
use crate::transport::{ResponseBuffer, Transport};

const READ_CHUNK: usize = 8192;

/// Blocking keep-alive TCP transport for WS-Management over HTTP.
///
/// The connection is opened on first use and reused until the server asks to
/// close it or a write fails.
pub struct TcpTransport {
    target: SocketAddr,
    timeout: Duration,
    max_attempts: u32,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Create a transport for `target`; nothing is connected until the first send.
    pub fn new(target: SocketAddr, timeout: Duration, connect_attempts: u32) -> Self {
        Self {
            target,
            timeout,
            max_attempts: connect_attempts.max(1),
            stream: None,
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        for attempt in 0..self.max_attempts {
            match TcpStream::connect_timeout(&self.target, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) if is_timeout(&e) => {
                    if attempt + 1 == self.max_attempts {
                        return Err(Error::Timeout);
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Err(Error::Timeout)
    }

    fn send_recv_impl(&mut self, request: &[u8]) -> Result<HttpResponse> {
        let (mut stream, reused) = match self.stream.take() {
            Some(stream) => (stream, true),
            None => (self.connect()?, false),
        };

        let mut outcome = exchange(&mut stream, request);
        if reused && matches!(outcome, Err(Error::Io(_)) | Ok(None)) {
            // The idle keep-alive connection was dropped by the server.
            stream = self.connect()?;
            outcome = exchange(&mut stream, request);
        }

        let response = outcome?.ok_or(Error::Protocol("connection closed before response"))?;
        if !response.wants_close() {
            self.stream = Some(stream);
        }
        Ok(response)
    }
}

impl Transport for TcpTransport {
    fn send_recv(&mut self, request: &[u8]) -> Result<HttpResponse> {
        self.send_recv_impl(request)
    }
}

fn exchange(stream: &mut TcpStream, request: &[u8]) -> Result<Option<HttpResponse>> {
    stream.write_all(request).map_err(map_io)?;
    stream.flush().map_err(map_io)?;
    read_response(stream)
}

/// Read one response from `reader`, or `None` if it closed before sending anything.
pub(crate) fn read_response(reader: &mut impl Read) -> Result<Option<HttpResponse>> {
    let mut buffer = ResponseBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_io(e)),
        };
        if n == 0 {
            return buffer.finish();
        }
        buffer.extend(&chunk[..n]);
        if let Some(response) = buffer.poll()? {
            return Ok(Some(response));
        }
    }
}

fn map_io(e: io::Error) -> Error {
    if is_timeout(&e) {
        Error::Timeout
    } else {
        Error::Io(e)
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
