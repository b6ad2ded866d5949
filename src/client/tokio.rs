use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ::tokio::sync::Mutex;

use crate::client::core::{ClientCore, Start, is_challenge, method_label, reject, start, target_for};
use crate::crypto::SecretBytes;
use crate::error::{Error, Result};
use crate::messages::{MessageBuilder, Messages};
use crate::session::{AuthSession, DigestAuth, HttpDigest};
use crate::transport::AsyncTransport;
use crate::transport::tokio::TcpTransport;
use crate::types::{Exchange, Request};

/// A tokio WS-Management client for one Intel AMT controller.
///
/// Same semantics as the blocking [`crate::Client`]; concurrent calls on
/// clones are serialised.
#[derive(Clone)]
pub struct AsyncClient {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    transport: Box<dyn AsyncTransport + Send>,
    core: ClientCore,
}

/// Builder for [`AsyncClient`].
#[derive(Debug)]
pub struct AsyncClientBuilder {
    target: SocketAddr,
    host: Option<String>,
    path: Option<String>,
    username: Option<String>,
    password: Option<SecretBytes>,
    timeout: Duration,
    retries: u32,
}

impl AsyncClientBuilder {
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

    /// Set the connect and per-read timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set number of connect attempts (including the first attempt).
    pub fn retries(mut self, attempts: u32) -> Self {
        self.retries = attempts;
        self
    }

    /// Build the [`AsyncClient`]. No connection is made until the first request.
    pub fn build(self) -> Result<AsyncClient> {
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

        Ok(AsyncClient::from_parts(
            TcpTransport::new(self.target, self.timeout, self.retries),
            auth,
            Messages::new(),
            AuthSession::from_secret(username, password),
        ))
    }
}

impl AsyncClient {
    /// Create an [`AsyncClientBuilder`].
    pub fn builder(target: SocketAddr) -> AsyncClientBuilder {
        AsyncClientBuilder::new(target)
    }

    /// Assemble a client from its collaborators.
    pub fn from_parts(
        transport: impl AsyncTransport + Send + 'static,
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

    /// Execute one logical call. See [`crate::Client::send`].
    pub async fn send(&self, request: Request) -> Result<Exchange> {
        let start = Instant::now();
        let result = {
            let mut inner = self.inner.lock().await;
            send_locked(&mut inner, &request).await
        };
        let elapsed = start.elapsed();
        let identifier = request.identifier.as_deref().unwrap_or_default();
        match &result {
            Ok(exchange) => crate::observe::record_ok(
                "async",
                method_label(&request),
                identifier,
                elapsed,
                exchange.status_code,
            ),
            Err(err) => crate::observe::record_err(
                "async",
                method_label(&request),
                identifier,
                elapsed,
                err,
            ),
        }
        result
    }

    /// Shorthand for `send(Request::new(identifier, method))`.
    pub async fn call(&self, identifier: &str, method: &str) -> Result<Exchange> {
        self.send(Request::new(identifier, method)).await
    }

    /// Snapshot of the current digest session.
    pub async fn session(&self) -> AuthSession {
        self.inner.lock().await.core.session().clone()
    }
}

async fn send_locked(inner: &mut Inner, request: &Request) -> Result<Exchange> {
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
                    transmit(inner, &mut precursor).await?;
                    inner
                        .core
                        .build_dependent(&mut exchange, &target, method, &precursor)?
                }
                None => {
                    if let Some(mut preflight) = inner.core.realm_request(&target, method)? {
                        transmit(inner, &mut preflight).await?;
                    }
                    inner
                        .core
                        .build_direct(&target, method, request.user_input.as_ref())?
                }
            }
        }
    };
    inner.core.attach_body(&mut exchange, xml);

    transmit(inner, &mut exchange).await?;
    Ok(exchange)
}

async fn transmit(inner: &mut Inner, exchange: &mut Exchange) -> Result<()> {
    let request = inner.core.http_request(exchange)?;
    crate::debug::dump_text("wsman request", &request);
    let mut response = inner.transport.send_recv(&request).await?;

    if is_challenge(&response) {
        let (request, stale) = inner.core.accept_challenge(exchange, &response)?;
        crate::observe::record_auth_retry("async", stale);
        crate::debug::dump_text("wsman request (authorized)", &request);
        response = inner.transport.send_recv(&request).await?;
    }

    crate::debug::dump_text("wsman response body", &response.body);
    inner.core.complete(exchange, response)
}
