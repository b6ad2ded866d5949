use serde_json::Value;

use crate::error::{Error, Result};
use crate::messages::{Action, AdminCredential, MessageBuilder, direct_action};
use crate::protocol::{HttpResponse, decode_chunked, decode_guid};
use crate::session::{AuthSession, DigestAuth};
use crate::types::{Exchange, ExchangeState, Method, Namespace, Request, Target};

const HTTP_UNAUTHORIZED: u16 = 401;

/// Split `<Class>_<Member>` on the first underscore.
///
/// Both the identifier and the method must be present. The member keeps any
/// further underscores, so `AMT_Foo_Bar` yields `("AMT", "Foo_Bar")`.
pub fn decompose(identifier: Option<&str>, method: Option<&str>) -> Result<(String, String)> {
    let identifier = identifier.filter(|s| !s.trim().is_empty());
    let method = method.filter(|s| !s.trim().is_empty());
    let (Some(identifier), Some(_)) = (identifier, method) else {
        return Err(Error::InvalidRequest(
            "identifier and method are both required".to_string(),
        ));
    };

    match identifier.split_once('_') {
        Some((class, member)) if !class.is_empty() && !member.is_empty() => {
            Ok((class.to_string(), member.to_string()))
        }
        _ => Err(Error::InvalidRequest(format!(
            "identifier {identifier:?} is not of the form <Class>_<Member>"
        ))),
    }
}

/// Outcome of validating a request before any I/O.
#[derive(Debug)]
pub(crate) enum Start {
    /// Rejected; the exchange carries the error and is returned as-is.
    Invalid(Exchange),
    Ready(Exchange, Method),
}

pub(crate) fn start(request: &Request) -> Result<Start> {
    let parts = decompose(request.identifier.as_deref(), request.method.as_deref());
    let (class, member) = match parts {
        Ok(parts) => parts,
        Err(err) => return Ok(Start::Invalid(Exchange::invalid(&err))),
    };
    let method: Method = request.method.as_deref().unwrap_or_default().parse()?;

    let mut exchange = Exchange::new(class, member);
    exchange.method = Some(method);
    transition(&mut exchange, ExchangeState::Decomposed);
    Ok(Start::Ready(exchange, method))
}

/// Mark an exchange invalid after decomposition succeeded.
pub(crate) fn reject(mut exchange: Exchange, err: &Error) -> Exchange {
    exchange.errors.push(err.to_string());
    transition(&mut exchange, ExchangeState::Invalid);
    exchange
}

/// Class a message for `method` addresses on behalf of `exchange`.
pub(crate) fn target_for(exchange: &Exchange, method: Method) -> Result<Target> {
    if let Some((namespace, member)) = method.owning_class() {
        return Ok(Target::new(namespace, member));
    }
    let namespace = Namespace::from_prefix(&exchange.class).ok_or_else(|| {
        Error::InvalidRequest(format!("unknown class prefix {:?}", exchange.class))
    })?;
    Ok(Target::new(namespace, exchange.member.clone()))
}

/// Label used for logs and metrics before a method is resolved.
pub(crate) fn method_label(request: &Request) -> &'static str {
    request
        .method
        .as_deref()
        .and_then(|m| m.parse::<Method>().ok())
        .map(Method::as_str)
        .unwrap_or("unknown")
}

pub(crate) fn is_challenge(response: &HttpResponse) -> bool {
    response.status_code == HTTP_UNAUTHORIZED
}

fn transition(exchange: &mut Exchange, state: ExchangeState) {
    exchange.state = state;
    crate::observe::record_transition(&exchange.class, &exchange.member, state);
}

/// Message building, digest signing and response decoding for one client.
///
/// Owns no I/O: the blocking and tokio drivers move bytes between this and
/// their transport.
pub(crate) struct ClientCore {
    auth: Box<dyn DigestAuth + Send>,
    builder: Box<dyn MessageBuilder + Send>,
    session: AuthSession,
}

impl ClientCore {
    pub(crate) fn new(
        auth: Box<dyn DigestAuth + Send>,
        builder: Box<dyn MessageBuilder + Send>,
        session: AuthSession,
    ) -> Self {
        Self {
            auth,
            builder,
            session,
        }
    }

    pub(crate) fn session(&self) -> &AuthSession {
        &self.session
    }

    /// Resolve a method that needs no precursor and build its body.
    pub(crate) fn build_direct(
        &mut self,
        target: &Target,
        method: Method,
        user_input: Option<&Value>,
    ) -> Result<String> {
        let action = match method {
            Method::SetAdminAclEntryEx => {
                let credential = AdminCredential::from_user_input(user_input)?;
                let digest_password = self.auth.hash_credential(
                    &self.session,
                    &credential.username,
                    &credential.password,
                )?;
                Action::SetAdminAclEntryEx {
                    username: credential.username,
                    digest_password,
                }
            }
            other => direct_action(other, user_input)?,
        };
        self.builder.build(target, &action)
    }

    /// Fresh exchange for the precursor `parent` depends on, with its body built.
    pub(crate) fn precursor(&mut self, parent: &Exchange, method: Method) -> Result<Exchange> {
        let mut exchange = Exchange::new(parent.class.clone(), parent.member.clone());
        exchange.method = Some(method);
        let target = target_for(&exchange, method)?;
        let xml = self.build_direct(&target, method, None)?;
        self.attach_body(&mut exchange, xml);
        Ok(exchange)
    }

    /// A `Get` on `target` to send first when `method` hashes against the
    /// digest realm and this session has not been challenged yet.
    pub(crate) fn realm_request(
        &mut self,
        target: &Target,
        method: Method,
    ) -> Result<Option<Exchange>> {
        if method != Method::SetAdminAclEntryEx || self.session.challenge().is_some() {
            return Ok(None);
        }
        let mut exchange = Exchange::new(target.namespace.as_str(), target.member.clone());
        exchange.method = Some(Method::Get);
        let xml = self.build_direct(target, Method::Get, None)?;
        self.attach_body(&mut exchange, xml);
        Ok(Some(exchange))
    }

    /// Build a `Pull` or `Put` body from its completed precursor.
    pub(crate) fn build_dependent(
        &mut self,
        exchange: &mut Exchange,
        target: &Target,
        method: Method,
        precursor: &Exchange,
    ) -> Result<String> {
        let envelope = precursor.envelope()?;
        let action = match method {
            Method::Pull => {
                let context = envelope.enumeration_context()?;
                exchange.enumeration_context = Some(context.clone());
                Action::Pull { context }
            }
            Method::Put => Action::Put {
                instance: envelope.payload()?,
            },
            other => {
                return Err(Error::protocol_owned(format!(
                    "{other} does not depend on a precursor"
                )));
            }
        };
        self.builder.build(target, &action)
    }

    pub(crate) fn attach_body(&self, exchange: &mut Exchange, xml: String) {
        exchange.xml = Some(xml);
        transition(exchange, ExchangeState::BodyBuilt);
    }

    /// Frame the exchange body as an HTTP request signed with the current session.
    pub(crate) fn http_request(&mut self, exchange: &mut Exchange) -> Result<Vec<u8>> {
        let request = self.sign(exchange)?;
        transition(exchange, ExchangeState::Sent);
        Ok(request)
    }

    /// Adopt the challenge in a 401 and re-sign the identical body.
    pub(crate) fn accept_challenge(
        &mut self,
        exchange: &mut Exchange,
        response: &HttpResponse,
    ) -> Result<(Vec<u8>, bool)> {
        let challenge = self.auth.parse_challenge(response)?;
        let stale = challenge.stale;
        self.session = self.session.challenged(challenge);
        let request = self.sign(exchange)?;
        transition(exchange, ExchangeState::AuthRetried);
        Ok((request, stale))
    }

    fn sign(&mut self, exchange: &Exchange) -> Result<Vec<u8>> {
        let body = exchange
            .xml
            .as_deref()
            .ok_or(Error::Protocol("exchange has no request body"))?;
        let request = self.auth.build_request(&mut self.session, body)?;
        Ok(request.into_bytes())
    }

    /// Decode the final response into the exchange.
    pub(crate) fn complete(&self, exchange: &mut Exchange, response: HttpResponse) -> Result<()> {
        exchange.status_code = Some(response.status_code);
        if is_challenge(&response) {
            return Err(Error::AuthenticationFailed(
                "controller rejected the digest credentials",
            ));
        }

        exchange.raw_body = Some(String::from_utf8_lossy(&response.body).into_owned());
        let body = if response.is_chunked() {
            decode_chunked(&response.body)?.ok_or(Error::IncompleteBody)?
        } else {
            response.body
        };
        let body =
            String::from_utf8(body).map_err(|_| Error::Protocol("response body is not UTF-8"))?;

        exchange.envelope = if body.trim().is_empty() {
            None
        } else {
            let mut envelope = crate::envelope::Envelope::parse(&body)?;
            if let Some(uuid) = envelope.uuid_mut() {
                let Value::String(encoded) = uuid else {
                    return Err(Error::UnsupportedGuidInput(
                        "UUID is not base64 text".to_string(),
                    ));
                };
                *uuid = Value::String(decode_guid(encoded)?);
            }
            Some(envelope)
        };
        exchange.body = Some(body);
        transition(exchange, ExchangeState::Decoded);
        transition(exchange, ExchangeState::Completed);
        Ok(())
    }
}
