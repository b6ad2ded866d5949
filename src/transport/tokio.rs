use std::net::SocketAddr;
use std::time::Duration;

use ::tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use ::tokio::net::TcpStream;
use ::tokio::time::timeout;

use crate::error::{Error, Result};
use crate::protocol::HttpResponse;
use crate::transport::{AsyncTransport, ResponseBuffer};

const READ_CHUNK: usize = 8192;

/// Tokio keep-alive TCP transport for WS-Management over HTTP.
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

    async fn connect(&self) -> Result<TcpStream> {
        for attempt in 0..self.max_attempts {
            match timeout(self.timeout, TcpStream::connect(self.target)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_elapsed) => {
                    if attempt + 1 == self.max_attempts {
                        return Err(Error::Timeout);
                    }
                }
            }
        }

        Err(Error::Timeout)
    }

    async fn send_recv_impl(&mut self, request: &[u8]) -> Result<HttpResponse> {
        let (mut stream, reused) = match self.stream.take() {
            Some(stream) => (stream, true),
            None => (self.connect().await?, false),
        };

        let mut outcome = self.exchange(&mut stream, request).await;
        if reused && matches!(outcome, Err(Error::Io(_)) | Ok(None)) {
            stream = self.connect().await?;
            outcome = self.exchange(&mut stream, request).await;
        }

        let response = outcome?.ok_or(Error::Protocol("connection closed before response"))?;
        if !response.wants_close() {
            self.stream = Some(stream);
        }
        Ok(response)
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        request: &[u8],
    ) -> Result<Option<HttpResponse>> {
        match timeout(self.timeout, stream.write_all(request)).await {
            Ok(result) => result?,
            Err(_elapsed) => return Err(Error::Timeout),
        }
        read_response(stream, self.timeout).await
    }
}

impl AsyncTransport for TcpTransport {
    fn send_recv<'a>(
        &'a mut self,
        request: &'a [u8],
    ) -> core::pin::Pin<Box<dyn core::future::Future<Output = Result<HttpResponse>> + Send + 'a>>
    {
        Box::pin(async move { self.send_recv_impl(request).await })
    }
}

/// Read one response, applying `limit` to each individual read.
pub(crate) async fn read_response<R>(
    reader: &mut R,
    limit: Duration,
) -> Result<Option<HttpResponse>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = ResponseBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = match timeout(limit, reader.read(&mut chunk)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_elapsed) => return Err(Error::Timeout),
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
