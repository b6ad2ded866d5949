use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::client::core::{ClientCore, Start, is_challenge, method_label, reject, start, target_for};
use crate::crypto::SecretBytes;
use crate::error::{Error, Result};
use crate::messages::{MessageBuilder, Messages};
use crate::session::{AuthSession, DigestAuth, HttpDigest};
use crate::transport::Transport;
use crate::transport::blocking::TcpTransport;
use crate::types::{Exchange, Request};

/// A blocking WS-Management client for one Intel AMT controller.
///
/// Cloning is cheap; clones share the connection and the digest session, and
/// calls are serialised.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    transport: Box<dyn Transport + Send>,
    core: ClientCore,
}

/// Builder for [`Client`].
#[derive(Debug)]
pub struct ClientBuilder {
    target: SocketAddr,
    host: Option<String>,
    path: Option<String>,
    username: Option<String>,
    password: Option<SecretBytes>,
    timeout: Duration,
    retries: u32,
}

impl ClientBuilder {
    /// Create a new builder.
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            host: None,
            path: None,
            username: None,
            password: None,
            timeout: Duration::from_secs(5),
            retries: 3,
        }
    }

    /// Set the digest username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the digest password.
    pub fn password(mut self, password: impl AsRef<str>) -> Self {
        self.password = Some(SecretBytes::new(password.as_ref().as_bytes().to_vec()));
        self
    }

    /// Override the `Host` header (defaults to the target address).
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Override the request path (defaults to `/wsman`).
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the connect, read and write timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set number of connect attempts (including the first attempt).
    pub fn retries(mut self, attempts: u32) -> Self {
        self.retries = attempts;
        self
    }

    /// Build the [`Client`]. No connection is made until the first request.
    pub fn build(self) -> Result<Client> {
        let username = self
            .username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::invalid_argument("username is required"))?;
        let password = self
            .password
            .ok_or_else(|| Error::invalid_argument("password is required"))?;

        let host = self.host.unwrap_or_else(|| self.target.to_string());
        let mut auth = HttpDigest::new(host);
        if let Some(path) = self.path {
            auth = auth.path(path);
        }

        Ok(Client::from_parts(
            TcpTransport::new(self.target, self.timeout, self.retries),
            auth,
            Messages::new(),
            AuthSession::from_secret(username, password),
        ))
    }
}

impl Client {
    /// Create a [`ClientBuilder`].
    pub fn builder(target: SocketAddr) -> ClientBuilder {
        ClientBuilder::new(target)
    }

    /// Assemble a client from its collaborators.
    pub fn from_parts(
        transport: impl Transport + Send + 'static,
        auth: impl DigestAuth + Send + 'static,
        builder: impl MessageBuilder + Send + 'static,
        session: AuthSession,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                transport: Box::new(transport),
                core: ClientCore::new(Box::new(auth), Box::new(builder), session),
            })),
        }
    }

    /// Execute one logical call.
    ///
    /// A request whose identifier cannot be decomposed comes back as an
    /// exchange with [`Exchange::errors`] filled and nothing sent. An unknown
    /// method fails with [`Error::UnsupportedMethod`], also before any I/O.
    pub fn send(&self, request: Request) -> Result<Exchange> {
        let start = Instant::now();
        let result = {
            let mut inner = self.lock_inner()?;
            send_locked(&mut inner, &request)
        };
        let elapsed = start.elapsed();
        let identifier = request.identifier.as_deref().unwrap_or_default();
        match &result {
            Ok(exchange) => crate::observe::record_ok(
                "blocking",
                method_label(&request),
                identifier,
                elapsed,
                exchange.status_code,
            ),
            Err(err) => crate::observe::record_err(
                "blocking",
                method_label(&request),
                identifier,
                elapsed,
                err,
            ),
        }
        result
    }

    /// Shorthand for `send(Request::new(identifier, method))`.
    pub fn call(&self, identifier: &str, method: &str) -> Result<Exchange> {
        self.send(Request::new(identifier, method))
    }

    /// Snapshot of the current digest session.
    pub fn session(&self) -> Result<AuthSession> {
        Ok(self.lock_inner()?.core.session().clone())
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Protocol("client lock poisoned"))
    }
}

fn send_locked(inner: &mut Inner, request: &Request) -> Result<Exchange> {
    let (mut exchange, method) = match start(request)? {
        Start::Invalid(exchange) => return Ok(exchange),
        Start::Ready(exchange, method) => (exchange, method),
    };

    let xml = match &request.xml {
        Some(xml) => xml.clone(),
        None => {
            let target = match target_for(&exchange, method) {
                Ok(target) => target,
                Err(err @ Error::InvalidRequest(_)) => return Ok(reject(exchange, &err)),
                Err(err) => return Err(err),
            };
            match method.precursor() {
                Some(precursor_method) => {
                    let mut precursor = inner.core.precursor(&exchange, precursor_method)?;
                    transmit(inner, &mut precursor)?;
                    inner
                        .core
                        .build_dependent(&mut exchange, &target, method, &precursor)?
                }
                None => {
                    if let Some(mut preflight) = inner.core.realm_request(&target, method)? {
                        transmit(inner, &mut preflight)?;
                    }
                    inner
                        .core
                        .build_direct(&target, method, request.user_input.as_ref())?
                }
            }
        }
    };
    inner.core.attach_body(&mut exchange, xml);

    transmit(inner, &mut exchange)?;
    Ok(exchange)
}

fn transmit(inner: &mut Inner, exchange: &mut Exchange) -> Result<()> {
    let request = inner.core.http_request(exchange)?;
    crate::debug::dump_text("wsman request", &request);
    let mut response = inner.transport.send_recv(&request)?;

    if is_challenge(&response) {
        let (request, stale) = inner.core.accept_challenge(exchange, &response)?;
        crate::observe::record_auth_retry("blocking", stale);
        crate::debug::dump_text("wsman request (authorized)", &request);
        response = inner.transport.send_recv(&request)?;
    }

    crate::debug::dump_text("wsman response body", &response.body);
    inner.core.complete(exchange, response)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::HttpResponse;

    #[derive(Debug, Clone, Copy)]
    struct TimeoutTransport;

    impl Transport for TimeoutTransport {
        fn send_recv(&mut self, _request: &[u8]) -> Result<HttpResponse> {
            Err(Error::Timeout)
        }
    }

    fn client() -> Client {
        Client::from_parts(
            TimeoutTransport,
            HttpDigest::new("192.0.2.1:16992"),
            Messages::new(),
            AuthSession::new("admin", "P@ssw0rd"),
        )
    }

    #[test]
    fn transport_timeout_is_returned() {
        let err = client()
            .call("AMT_GeneralSettings", "Get")
            .expect_err("expected timeout");
        assert!(matches!(err, Error::Timeout));
    }

    #[test]
    fn unknown_prefix_is_recorded_without_io() {
        let exchange = client().call("XYZ_Thing", "Get").expect("exchange");
        assert!(!exchange.is_valid());
        assert!(exchange.errors[0].contains("XYZ"));
    }

    #[test]
    fn builder_requires_credentials() {
        let target: SocketAddr = "192.0.2.1:16992".parse().unwrap();
        let err = Client::builder(target).username("admin").build().err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));
        assert!(Client::builder(target).username("admin").password("pw").build().is_ok());
    }
}
