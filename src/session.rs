use core::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::crypto::{SecretBytes, cnonce, md5, md5_hex};
use crate::error::{Error, Result};
use crate::protocol::HttpResponse;

const DEFAULT_PATH: &str = "/wsman";
const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Parameters of a `WWW-Authenticate: Digest` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Protection space.
    pub realm: String,
    /// Server nonce.
    pub nonce: String,
    /// Offered quality-of-protection values, as sent.
    pub qop: Option<String>,
    /// Opaque value to echo back.
    pub opaque: Option<String>,
    /// Hash algorithm; only MD5 is supported.
    pub algorithm: Option<String>,
    /// The previous nonce expired but the credentials were fine.
    pub stale: bool,
}

impl Challenge {
    /// Parse a `WWW-Authenticate` header value.
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let params = match header.split_once(char::is_whitespace) {
            Some((scheme, params)) if scheme.eq_ignore_ascii_case("digest") => params,
            _ => return Err(Error::Protocol("not a digest challenge")),
        };

        let mut realm = None;
        let mut nonce = None;
        let mut challenge = Self {
            realm: String::new(),
            nonce: String::new(),
            qop: None,
            opaque: None,
            algorithm: None,
            stale: false,
        };
        for (key, value) in parse_params(params)? {
            match key.as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => challenge.qop = Some(value),
                "opaque" => challenge.opaque = Some(value),
                "algorithm" => challenge.algorithm = Some(value),
                "stale" => challenge.stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }
        challenge.realm = realm.ok_or(Error::Protocol("digest challenge without realm"))?;
        challenge.nonce = nonce.ok_or(Error::Protocol("digest challenge without nonce"))?;
        Ok(challenge)
    }

    fn offers_auth_qop(&self) -> bool {
        self.qop.as_deref().is_some_and(|qop| {
            qop.split(',')
                .any(|option| option.trim().eq_ignore_ascii_case("auth"))
        })
    }
}

fn parse_params(mut rest: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if rest.is_empty() {
            return Ok(out);
        }
        let (key, after) = rest
            .split_once('=')
            .ok_or(Error::Protocol("malformed digest challenge parameter"))?;
        let key = key.trim().to_ascii_lowercase();
        let after = after.trim_start();

        let value;
        if let Some(quoted) = after.strip_prefix('"') {
            let mut text = String::new();
            let mut escaped = false;
            let mut end = None;
            for (i, c) in quoted.char_indices() {
                if escaped {
                    text.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    end = Some(i);
                    break;
                } else {
                    text.push(c);
                }
            }
            let end = end.ok_or(Error::Protocol("unterminated quoted string in challenge"))?;
            value = text;
            rest = &quoted[end + 1..];
        } else {
            let end = after.find(',').unwrap_or(after.len());
            value = after[..end].trim().to_string();
            rest = &after[end..];
        }
        out.push((key, value));
    }
}

/// Digest credentials for one controller.
///
/// The session is owned by a client and passed explicitly into each
/// exchange. A 401 challenge does not mutate it; [`AuthSession::challenged`]
/// returns the session to use from then on.
#[derive(Clone)]
pub struct AuthSession {
    username: String,
    password: SecretBytes,
    challenge: Option<Challenge>,
    nonce_count: u32,
}

impl AuthSession {
    /// A session that has not seen a challenge yet.
    pub fn new(username: impl Into<String>, password: impl AsRef<str>) -> Self {
        Self {
            username: username.into(),
            password: SecretBytes::new(password.as_ref().as_bytes().to_vec()),
            challenge: None,
            nonce_count: 0,
        }
    }

    pub(crate) fn from_secret(username: String, password: SecretBytes) -> Self {
        Self {
            username,
            password,
            challenge: None,
            nonce_count: 0,
        }
    }

    /// User name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The challenge currently answered, if any.
    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    /// Requests signed under the current nonce.
    pub fn nonce_count(&self) -> u32 {
        self.nonce_count
    }

    /// The session to use after `challenge`: same credentials, new nonce,
    /// nonce count restarted.
    pub fn challenged(&self, challenge: Challenge) -> Self {
        Self {
            username: self.username.clone(),
            password: self.password.clone(),
            challenge: Some(challenge),
            nonce_count: 0,
        }
    }

    pub(crate) fn password(&self) -> &[u8] {
        self.password.expose()
    }

    fn next_nonce_count(&mut self) -> u32 {
        self.nonce_count = self.nonce_count.wrapping_add(1);
        self.nonce_count
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("username", &self.username)
            .field("password", &self.password)
            .field("challenge", &self.challenge)
            .field("nonce_count", &self.nonce_count)
            .finish()
    }
}

/// HTTP Digest operations the client delegates.
pub trait DigestAuth {
    /// Extract the digest challenge from a 401 response.
    fn parse_challenge(&self, response: &HttpResponse) -> Result<Challenge>;

    /// Frame `body` into a complete HTTP request, signed with `session`'s
    /// current challenge when it has one.
    fn build_request(&self, session: &mut AuthSession, body: &str) -> Result<String>;

    /// Digest of a credential pair for the controller's ACL methods.
    fn hash_credential(
        &self,
        session: &AuthSession,
        username: &str,
        secret: &str,
    ) -> Result<String>;
}

/// RFC 2617 digest authentication over `POST <path> HTTP/1.1`.
#[derive(Debug, Clone)]
pub struct HttpDigest {
    host: String,
    path: String,
}

impl HttpDigest {
    /// Digest framing for requests sent to `host` (the `Host` header value).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: DEFAULT_PATH.to_string(),
        }
    }

    /// Override the request path (default `/wsman`).
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    fn authorization(&self, session: &mut AuthSession) -> Result<Option<String>> {
        let Some(challenge) = session.challenge.clone() else {
            return Ok(None);
        };
        if let Some(algorithm) = &challenge.algorithm {
            if !algorithm.eq_ignore_ascii_case("md5") {
                return Err(Error::protocol_owned(format!(
                    "unsupported digest algorithm {algorithm}"
                )));
            }
        }

        let qop = if challenge.offers_auth_qop() {
            Some((session.next_nonce_count(), cnonce()))
        } else {
            None
        };
        let response = digest_response(
            "POST",
            &self.path,
            session.username(),
            session.password(),
            &challenge,
            qop.as_ref().map(|(nc, cnonce)| (*nc, cnonce.as_str())),
        );

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{response}\"",
            session.username(),
            challenge.realm,
            challenge.nonce,
            self.path
        );
        if let Some((nc, cnonce)) = &qop {
            header.push_str(&format!(", qop=auth, nc={nc:08x}, cnonce=\"{cnonce}\""));
        }
        if let Some(opaque) = &challenge.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        if let Some(algorithm) = &challenge.algorithm {
            header.push_str(&format!(", algorithm={algorithm}"));
        }
        Ok(Some(header))
    }
}

impl DigestAuth for HttpDigest {
    fn parse_challenge(&self, response: &HttpResponse) -> Result<Challenge> {
        response
            .headers_named("www-authenticate")
            .find_map(|value| Challenge::parse(value).ok())
            .ok_or(Error::AuthenticationFailed(
                "401 response carries no digest challenge",
            ))
    }

    fn build_request(&self, session: &mut AuthSession, body: &str) -> Result<String> {
        let mut request = format!("POST {} HTTP/1.1\r\nHost: {}\r\n", self.path, self.host);
        if let Some(authorization) = self.authorization(session)? {
            request.push_str(&format!("Authorization: {authorization}\r\n"));
        }
        request.push_str(&format!(
            "Content-Type: {SOAP_CONTENT_TYPE}\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
            body.len()
        ));
        request.push_str(body);
        Ok(request)
    }

    fn hash_credential(
        &self,
        session: &AuthSession,
        username: &str,
        secret: &str,
    ) -> Result<String> {
        let challenge = session.challenge().ok_or(Error::AuthenticationFailed(
            "digest realm unknown until the controller has challenged this session",
        ))?;
        let digest = md5(&[
            username.as_bytes(),
            b":",
            challenge.realm.as_bytes(),
            b":",
            secret.as_bytes(),
        ]);
        Ok(STANDARD.encode(digest))
    }
}

/// RFC 2617 `request-digest`; `qop` is `(nonce count, client nonce)` for `qop=auth`.
fn digest_response(
    method: &str,
    uri: &str,
    username: &str,
    password: &[u8],
    challenge: &Challenge,
    qop: Option<(u32, &str)>,
) -> String {
    let ha1 = md5_hex(&[
        username.as_bytes(),
        b":",
        challenge.realm.as_bytes(),
        b":",
        password,
    ]);
    let ha2 = md5_hex(&[method.as_bytes(), b":", uri.as_bytes()]);
    match qop {
        Some((nc, cnonce)) => {
            let nc = format!("{nc:08x}");
            md5_hex(&[
                ha1.as_bytes(),
                b":",
                challenge.nonce.as_bytes(),
                b":",
                nc.as_bytes(),
                b":",
                cnonce.as_bytes(),
                b":auth:",
                ha2.as_bytes(),
            ])
        }
        None => md5_hex(&[
            ha1.as_bytes(),
            b":",
            challenge.nonce.as_bytes(),
            b":",
            ha2.as_bytes(),
        ]),
    }
}
