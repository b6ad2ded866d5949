#![cfg(feature = "blocking")]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;
use wsman::{
    Action, AuthSession, Challenge, Client, Error, ExchangeState, HttpDigest, HttpResponse,
    MessageBuilder, Messages, Method, Request, Target, Transport,
};

const CHALLENGE: &str = r#"Digest realm="Digest:A3829B3827DE4D33D4449B366831FD01", nonce="ZGI1YTg4NjQ2ZjY5Y2JhNjQ1NmQ3NTNl", stale="false", qop="auth""#;

const GET_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<a:Envelope xmlns:a="http://www.w3.org/2003/05/soap-envelope" xmlns:b="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:g="http://intel.com/wbem/wscim/1/amt-schema/1/AMT_GeneralSettings">
  <a:Header>
    <b:Action a:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/09/transfer/GetResponse</b:Action>
  </a:Header>
  <a:Body>
    <g:AMT_GeneralSettings>
      <g:DHCPv6ConfigurationTimeout>0</g:DHCPv6ConfigurationTimeout>
      <g:ElementName>Intel(r) AMT: General Settings</g:ElementName>
      <g:HostName>nuc</g:HostName>
      <g:InstanceID>Intel(r) AMT: General Settings</g:InstanceID>
      <g:PingResponseEnabled>true</g:PingResponseEnabled>
    </g:AMT_GeneralSettings>
  </a:Body>
</a:Envelope>"#;

const ENUMERATE_RESPONSE: &str = r#"<a:Envelope xmlns:a="http://www.w3.org/2003/05/soap-envelope" xmlns:g="http://schemas.xmlsoap.org/ws/2004/09/enumeration">
  <a:Header><Action>http://schemas.xmlsoap.org/ws/2004/09/enumeration/EnumerateResponse</Action></a:Header>
  <a:Body><g:EnumerateResponse><g:EnumerationContext>92340000-0000-0000-0000-000000000000</g:EnumerationContext></g:EnumerateResponse></a:Body>
</a:Envelope>"#;

const PULL_RESPONSE: &str = r#"<a:Envelope xmlns:a="http://www.w3.org/2003/05/soap-envelope" xmlns:g="http://schemas.xmlsoap.org/ws/2004/09/enumeration">
  <a:Header><Action>http://schemas.xmlsoap.org/ws/2004/09/enumeration/PullResponse</Action></a:Header>
  <a:Body>
    <g:PullResponse>
      <g:Items>
        <h:AMT_EthernetPortSettings xmlns:h="http://intel.com/wbem/wscim/1/amt-schema/1/AMT_EthernetPortSettings">
          <h:InstanceID>Intel(r) AMT Ethernet Port Settings 0</h:InstanceID>
          <h:MACAddress>c8-d9-d2-7a-1e-33</h:MACAddress>
        </h:AMT_EthernetPortSettings>
      </g:Items>
      <g:EndOfSequence></g:EndOfSequence>
    </g:PullResponse>
  </a:Body>
</a:Envelope>"#;

const FAULT_RESPONSE: &str = r#"<a:Envelope xmlns:a="http://www.w3.org/2003/05/soap-envelope">
  <a:Header><Action>http://schemas.dmtf.org/wbem/wsman/1/wsman/fault</Action></a:Header>
  <a:Body><a:Fault><a:Reason><a:Text>The action is not supported by the service.</a:Text></a:Reason></a:Fault></a:Body>
</a:Envelope>"#;

const GET_UUID_RESPONSE: &str = r#"<a:Envelope xmlns:a="http://www.w3.org/2003/05/soap-envelope">
  <a:Header><Action>http://intel.com/wbem/wscim/1/amt-schema/1/AMT_SetupAndConfigurationService/GetUuidResponse</Action></a:Header>
  <a:Body><g:GetUuid_OUTPUT xmlns:g="http://intel.com/wbem/wscim/1/amt-schema/1/AMT_SetupAndConfigurationService"><g:UUID>776t3jQSzauJ9wChssPU5Q==</g:UUID><g:ReturnValue>0</g:ReturnValue></g:GetUuid_OUTPUT></a:Body>
</a:Envelope>"#;

type Sent = Arc<Mutex<Vec<Vec<u8>>>>;
type Built = Arc<Mutex<Vec<(String, Action)>>>;

struct Scripted {
    responses: VecDeque<HttpResponse>,
    sent: Sent,
}

impl Transport for Scripted {
    fn send_recv(&mut self, request: &[u8]) -> wsman::Result<HttpResponse> {
        self.sent.lock().unwrap().push(request.to_vec());
        self.responses.pop_front().ok_or(Error::Timeout)
    }
}

struct Recording {
    messages: Messages,
    built: Built,
}

impl MessageBuilder for Recording {
    fn build(&mut self, target: &Target, action: &Action) -> wsman::Result<String> {
        self.built
            .lock()
            .unwrap()
            .push((target.class_name(), action.clone()));
        self.messages.build(target, action)
    }
}

struct Harness {
    client: Client,
    sent: Sent,
    built: Built,
}

impl Harness {
    fn new(session: AuthSession, responses: Vec<HttpResponse>) -> Self {
        let sent = Sent::default();
        let built = Built::default();
        let client = Client::from_parts(
            Scripted {
                responses: responses.into(),
                sent: sent.clone(),
            },
            HttpDigest::new("192.0.2.10:16992"),
            Recording {
                messages: Messages::new(),
                built: built.clone(),
            },
            session,
        );
        Self {
            client,
            sent,
            built,
        }
    }

    fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|request| String::from_utf8(request.clone()).unwrap())
            .collect()
    }

    fn built(&self) -> Vec<(String, Action)> {
        self.built.lock().unwrap().clone()
    }
}

fn fresh_session() -> AuthSession {
    AuthSession::new("admin", "P@ssw0rd")
}

fn challenged_session() -> AuthSession {
    fresh_session().challenged(Challenge::parse(CHALLENGE).unwrap())
}

fn unauthorized() -> HttpResponse {
    HttpResponse::new(
        401,
        vec![("WWW-Authenticate".to_string(), CHALLENGE.to_string())],
        Vec::new(),
    )
}

fn ok(xml: &str) -> HttpResponse {
    HttpResponse::new(
        200,
        vec![(
            "Content-Type".to_string(),
            "application/soap+xml; charset=UTF-8".to_string(),
        )],
        xml.as_bytes().to_vec(),
    )
}

fn ok_chunked(xml: &str) -> HttpResponse {
    let mut body = Vec::new();
    for piece in xml.as_bytes().chunks(37) {
        body.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
        body.extend_from_slice(piece);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(wsman::CHUNKED_TERMINATOR);
    HttpResponse::new(
        200,
        vec![("Transfer-Encoding".to_string(), "chunked".to_string())],
        body,
    )
}

fn body_of(request: &str) -> &str {
    request
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or_default()
}

#[test]
fn get_general_settings_after_challenge() {
    let harness = Harness::new(fresh_session(), vec![unauthorized(), ok(GET_RESPONSE)]);

    let exchange = harness
        .client
        .call("AMT_GeneralSettings", "Get")
        .expect("exchange");

    assert_eq!(exchange.class, "AMT");
    assert_eq!(exchange.member, "GeneralSettings");
    assert_eq!(exchange.method, Some(Method::Get));
    assert_eq!(exchange.state, ExchangeState::Completed);
    assert_eq!(exchange.status_code, Some(200));

    let payload = exchange.envelope().unwrap().payload().unwrap();
    assert_eq!(payload["HostName"], "nuc");
    assert_eq!(payload["PingResponseEnabled"], true);
    assert_eq!(payload["DHCPv6ConfigurationTimeout"], 0);

    let sent = harness.sent();
    assert_eq!(sent.len(), 2);
    assert!(!sent[0].contains("Authorization:"));
    assert!(sent[1].contains("Authorization: Digest username=\"admin\""));
    assert_eq!(body_of(&sent[0]), body_of(&sent[1]));
    assert_eq!(harness.client.session().unwrap().nonce_count(), 1);
}

#[test]
fn second_challenge_is_terminal() {
    let harness = Harness::new(fresh_session(), vec![unauthorized(), unauthorized()]);

    let err = harness
        .client
        .call("AMT_GeneralSettings", "Get")
        .expect_err("expected authentication failure");
    assert!(matches!(err, Error::AuthenticationFailed(_)));

    let sent = harness.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(body_of(&sent[0]), body_of(&sent[1]));
}

#[test]
fn pull_enumerates_once_and_forwards_the_context() {
    let harness = Harness::new(
        challenged_session(),
        vec![ok(ENUMERATE_RESPONSE), ok(PULL_RESPONSE)],
    );

    let exchange = harness
        .client
        .call("AMT_EthernetPortSettings", "Pull")
        .expect("exchange");

    let context = "92340000-0000-0000-0000-000000000000";
    assert_eq!(
        harness.built(),
        vec![
            ("AMT_EthernetPortSettings".to_string(), Action::Enumerate),
            (
                "AMT_EthernetPortSettings".to_string(),
                Action::Pull {
                    context: context.to_string()
                }
            ),
        ]
    );
    assert_eq!(exchange.enumeration_context.as_deref(), Some(context));
    assert_eq!(harness.sent().len(), 2);

    let envelope = exchange.envelope().unwrap();
    assert!(envelope.end_of_sequence());
    let port = envelope.payload().unwrap();
    assert_eq!(port["MACAddress"], "c8-d9-d2-7a-1e-33");
}

#[test]
fn enumeration_context_is_forwarded_verbatim() {
    for context in ["000123", "1.50", "TRUE", "1e3"] {
        let enumerate = ENUMERATE_RESPONSE.replace("92340000-0000-0000-0000-000000000000", context);
        let harness = Harness::new(challenged_session(), vec![ok(&enumerate), ok(PULL_RESPONSE)]);

        let exchange = harness
            .client
            .call("AMT_EthernetPortSettings", "Pull")
            .expect("exchange");

        assert_eq!(exchange.enumeration_context.as_deref(), Some(context));
        assert_eq!(
            harness.built()[1].1,
            Action::Pull {
                context: context.to_string()
            }
        );
    }
}

#[test]
fn pull_fails_when_enumerate_returns_no_context() {
    let harness = Harness::new(challenged_session(), vec![ok(FAULT_RESPONSE)]);

    let err = harness
        .client
        .call("AMT_EthernetPortSettings", "Pull")
        .expect_err("expected malformed envelope");
    assert!(matches!(err, Error::MalformedEnvelope(_)));
    assert_eq!(harness.sent().len(), 1);
    assert_eq!(harness.built().len(), 1);
}

#[test]
fn put_reads_the_current_instance_first() {
    let harness = Harness::new(
        challenged_session(),
        vec![ok(GET_RESPONSE), ok("")],
    );

    let exchange = harness
        .client
        .call("AMT_GeneralSettings", "Put")
        .expect("exchange");
    assert_eq!(exchange.state, ExchangeState::Completed);
    assert!(exchange.envelope.is_none());

    let built = harness.built();
    assert_eq!(built.len(), 2);
    assert_eq!(built[0], ("AMT_GeneralSettings".to_string(), Action::Get));
    assert_eq!(
        built[1].1,
        Action::Put {
            instance: json!({
                "DHCPv6ConfigurationTimeout": 0,
                "ElementName": "Intel(r) AMT: General Settings",
                "HostName": "nuc",
                "InstanceID": "Intel(r) AMT: General Settings",
                "PingResponseEnabled": true,
            })
        }
    );

    let sent = harness.sent();
    assert!(body_of(&sent[1]).contains("<h:HostName>nuc</h:HostName>"));
}

#[test]
fn supplied_xml_skips_builder_and_precursor() {
    let harness = Harness::new(challenged_session(), vec![ok(GET_RESPONSE)]);

    let request = Request::new("AMT_GeneralSettings", "Put").xml("<Envelope>custom</Envelope>");
    let exchange = harness.client.send(request).expect("exchange");

    assert_eq!(exchange.xml.as_deref(), Some("<Envelope>custom</Envelope>"));
    assert!(harness.built().is_empty());
    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(body_of(&sent[0]), "<Envelope>custom</Envelope>");
}

#[test]
fn unsupported_method_fails_before_io() {
    let harness = Harness::new(challenged_session(), vec![ok(GET_RESPONSE)]);

    let err = harness
        .client
        .call("AMT_GeneralSettings", "Frobnicate")
        .expect_err("expected unsupported method");
    assert!(matches!(err, Error::UnsupportedMethod(name) if name == "Frobnicate"));
    assert!(harness.sent().is_empty());
}

#[test]
fn invalid_identifiers_are_reported_without_io() {
    let harness = Harness::new(challenged_session(), vec![ok(GET_RESPONSE)]);

    for request in [
        Request::new("GeneralSettings", "Get"),
        Request::new("AMT_", "Get"),
        Request {
            identifier: Some("AMT_GeneralSettings".to_string()),
            method: None,
            xml: None,
            user_input: None,
        },
    ] {
        let exchange = harness.client.send(request).expect("exchange");
        assert!(!exchange.is_valid());
        assert_eq!(exchange.state, ExchangeState::Invalid);
    }
    assert!(harness.sent().is_empty());
}

#[test]
fn get_uuid_is_canonicalised() {
    let harness = Harness::new(challenged_session(), vec![ok_chunked(GET_UUID_RESPONSE)]);

    let exchange = harness
        .client
        .call("AMT_SetupAndConfigurationService", "GetUuid")
        .expect("exchange");

    assert_eq!(
        harness.built(),
        vec![(
            "AMT_SetupAndConfigurationService".to_string(),
            Action::GetUuid
        )]
    );
    let uuid = exchange.envelope().unwrap().uuid().unwrap();
    assert_eq!(uuid, "deadbeef-1234-abcd-89f7-00a1b2c3d4e5");
    assert!(exchange.raw_body.unwrap().ends_with("0\r\n\r\n"));
}

#[test]
fn extension_method_addresses_its_owning_class() {
    let harness = Harness::new(challenged_session(), vec![ok(GET_RESPONSE)]);

    harness
        .client
        .call("AMT_GeneralSettings", "GetLowAccuracyTimeSynch")
        .expect("exchange");

    let built = harness.built();
    assert_eq!(built[0].0, "AMT_TimeSynchronizationService");
    assert!(body_of(&harness.sent()[0]).contains("GetLowAccuracyTimeSynch_INPUT"));
}

#[test]
fn admin_acl_entry_hashes_against_the_realm() {
    let harness = Harness::new(challenged_session(), vec![ok(GET_RESPONSE)]);

    let request = Request::new("AMT_AuthorizationService", "SetAdminAclEntryEx")
        .user_input(json!({"Username": "admin", "DigestPassword": "P@ssw0rd"}));
    harness.client.send(request).expect("exchange");

    assert_eq!(
        harness.built()[0].1,
        Action::SetAdminAclEntryEx {
            username: "admin".to_string(),
            digest_password: "ZlTOuVM90P1tPlo8PoSZ1w==".to_string(),
        }
    );
}

#[test]
fn admin_acl_entry_learns_the_realm_first() {
    let harness = Harness::new(
        fresh_session(),
        vec![unauthorized(), ok(GET_RESPONSE), ok(GET_RESPONSE)],
    );

    let request = Request::new("AMT_AuthorizationService", "SetAdminAclEntryEx")
        .user_input(json!({"Username": "admin", "DigestPassword": "P@ssw0rd"}));
    let exchange = harness.client.send(request).expect("exchange");
    assert_eq!(exchange.method, Some(Method::SetAdminAclEntryEx));

    assert_eq!(
        harness.built(),
        vec![
            ("AMT_AuthorizationService".to_string(), Action::Get),
            (
                "AMT_AuthorizationService".to_string(),
                Action::SetAdminAclEntryEx {
                    username: "admin".to_string(),
                    digest_password: "ZlTOuVM90P1tPlo8PoSZ1w==".to_string(),
                }
            ),
        ]
    );

    let sent = harness.sent();
    assert_eq!(sent.len(), 3);
    assert!(!sent[0].contains("Authorization:"));
    assert!(sent[2].contains("nc=00000002"));
    assert!(body_of(&sent[2]).contains("SetAdminAclEntryEx_INPUT"));
}

#[test]
fn admin_acl_entry_stops_when_the_realm_request_is_rejected() {
    let harness = Harness::new(fresh_session(), vec![unauthorized(), unauthorized()]);

    let request = Request::new("AMT_AuthorizationService", "SetAdminAclEntryEx")
        .user_input(json!({"Username": "admin", "DigestPassword": "P@ssw0rd"}));
    let err = harness.client.send(request).expect_err("expected failure");

    assert!(matches!(err, Error::AuthenticationFailed(_)));
    assert_eq!(harness.sent().len(), 2);
    assert_eq!(harness.built().len(), 1);
}
