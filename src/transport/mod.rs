#[cfg(feature = "blocking")]
use crate::error::Result;
#[cfg(feature = "blocking")]
use crate::protocol::HttpResponse;

/// A synchronous transport that carries one HTTP request to the controller
/// and returns its response.
#[cfg(feature = "blocking")]
pub trait Transport {
    /// Write a fully framed HTTP request and read the complete response.
    ///
    /// The returned body is still chunk-framed if the server used chunked
    /// transfer encoding.
    fn send_recv(&mut self, request: &[u8]) -> Result<HttpResponse>;
}

#[cfg(feature = "async")]
mod async_support {
    use core::future::Future;
    use core::pin::Pin;

    use crate::error::Result;
    use crate::protocol::HttpResponse;

    /// An asynchronous transport that carries one HTTP request to the
    /// controller and returns its response.
    pub trait AsyncTransport {
        /// Write a fully framed HTTP request and read the complete response.
        fn send_recv<'a>(
            &'a mut self,
            request: &'a [u8],
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + 'a>>;
    }
}

#[cfg(feature = "async")]
pub use async_support::AsyncTransport;

#[cfg(any(feature = "blocking", feature = "async"))]
mod buffer {
    use crate::error::{Error, Result};
    use crate::protocol::{
        BodyFraming, HttpResponse, ResponseHead, body_complete, parse_response_head,
    };

    /// Accumulates bytes from a stream until a whole response is buffered.
    #[derive(Debug, Default)]
    pub(crate) struct ResponseBuffer {
        buf: Vec<u8>,
        head: Option<(ResponseHead, usize, BodyFraming)>,
    }

    impl ResponseBuffer {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn extend(&mut self, bytes: &[u8]) {
            self.buf.extend_from_slice(bytes);
        }

        /// Return the response once the head and the framed body are complete.
        pub(crate) fn poll(&mut self) -> Result<Option<HttpResponse>> {
            if self.head.is_none() {
                let Some((head, offset)) = parse_response_head(&self.buf)? else {
                    return Ok(None);
                };
                let framing = head.framing()?;
                self.head = Some((head, offset, framing));
            }

            let Some((_, offset, framing)) = &self.head else {
                return Ok(None);
            };
            let (offset, framing) = (*offset, *framing);
            if !body_complete(framing, &self.buf[offset..])? {
                return Ok(None);
            }

            let mut body = self.buf.split_off(offset);
            if let BodyFraming::Length(len) = framing {
                body.truncate(len);
            }
            self.buf.clear();
            Ok(self.head.take().map(|(head, _, _)| head.into_response(body)))
        }

        /// Settle the response after the peer closed the connection.
        ///
        /// `Ok(None)` means the connection closed before any byte arrived.
        pub(crate) fn finish(mut self) -> Result<Option<HttpResponse>> {
            if self.buf.is_empty() && self.head.is_none() {
                return Ok(None);
            }
            if let Some(response) = self.poll()? {
                return Ok(Some(response));
            }
            match self.head.take() {
                None => Err(Error::Protocol("connection closed inside response head")),
                Some((head, offset, BodyFraming::UntilClose)) => {
                    let body = self.buf.split_off(offset);
                    Ok(Some(head.into_response(body)))
                }
                Some((_, _, BodyFraming::Chunked)) => Err(Error::IncompleteBody),
                Some((_, _, BodyFraming::Length(_))) => Err(Error::Protocol(
                    "connection closed before Content-Length bytes arrived",
                )),
            }
        }
    }

}

#[cfg(any(feature = "blocking", feature = "async"))]
pub(crate) use buffer::ResponseBuffer;

#[cfg(feature = "blocking")]
pub(crate) mod blocking;

#[cfg(feature = "async")]
pub(crate) mod tokio;
