//! SOAP envelope parsing and typed access to WS-Management responses.
//!
//! Responses are turned into a `serde_json::Value` tree with a fixed set of
//! rules: namespace prefixes are dropped, attributes are ignored, repeated
//! sibling elements become arrays, and leaf text is coerced into numbers and
//! booleans (see [`coerce_value`]). [`Envelope`] wraps that tree and exposes
//! the handful of fields the client needs, failing with
//! [`Error::MalformedEnvelope`] when they are absent.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

/// Elements whose leading zeros are significant.
const IDENTIFIER_FIELDS: [&str; 2] = ["ElementName", "InstanceID"];

/// Elements whose text is an opaque token and is never coerced.
const OPAQUE_FIELDS: [&str; 1] = ["EnumerationContext"];

/// Key holding the text of an element that also has child elements.
const TEXT_KEY: &str = "_";

/// Parse XML text into a document tree.
///
/// The returned value is an object with the root element's local name as its
/// only key.
pub fn parse_envelope(xml: &str) -> Result<Value> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Value> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::malformed(format!(
                "xml error at position {}: {e}",
                reader.buffer_position()
            ))
        })?;

        match event {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(Error::malformed("content after the root element"));
                }
                stack.push(Frame::new(local_name(&start)?));
            }
            Event::Empty(start) => {
                let name = local_name(&start)?;
                let value = Value::String(String::new());
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None if root.is_none() => root = Some(wrap_root(name, value)),
                    None => return Err(Error::malformed("content after the root element")),
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| Error::malformed("unexpected closing tag"))?;
                let (name, value) = frame.finish();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => root = Some(wrap_root(name, value)),
                }
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| Error::malformed(format!("invalid text content: {e}")))?;
                push_text(stack.last_mut(), &text)?;
            }
            Event::CData(data) => {
                let bytes = data.into_inner();
                let text = std::str::from_utf8(&bytes)
                    .map_err(|_| Error::malformed("CDATA is not valid UTF-8"))?;
                push_text(stack.last_mut(), text)?;
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctypes.
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::malformed(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or_else(|| Error::malformed("document has no root element"))
}

/// Coerce the text of leaf element `name`.
///
/// `EnumerationContext` is always kept as text. `ElementName` and
/// `InstanceID` values longer than one character that start with `0` are
/// kept as text so identifiers such as `"0123"` survive. Everything else that
/// reads as a decimal number becomes a number. `true` and `false` (any case)
/// become booleans. Empty text stays an empty string.
pub fn coerce_value(name: &str, text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::String(String::new());
    }
    if OPAQUE_FIELDS.contains(&name) {
        return Value::String(text.to_string());
    }

    let keep_text =
        IDENTIFIER_FIELDS.contains(&name) && text.len() > 1 && text.starts_with('0');
    if !keep_text {
        if let Some(number) = parse_number(text) {
            return Value::Number(number);
        }
    }

    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::String(text.to_string())
}

fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return Some(Number::from(v));
    }
    if let Ok(v) = text.parse::<u64>() {
        return Some(Number::from(v));
    }
    let v = text.parse::<f64>().ok().filter(|v| v.is_finite())?;
    // 2^53: the largest range in which every integer is exact in an f64.
    if v.fract() == 0.0 && v.abs() < 9_007_199_254_740_992.0 {
        return Some(Number::from(v as i64));
    }
    Number::from_f64(v)
}

struct Frame {
    name: String,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn new(name: String) -> Self {
        Self {
            name,
            children: Map::new(),
            text: String::new(),
        }
    }

    fn finish(self) -> (String, Value) {
        if self.children.is_empty() {
            let value = coerce_value(&self.name, &self.text);
            return (self.name, value);
        }
        let mut children = self.children;
        let text = self.text.trim();
        if !text.is_empty() {
            children.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
        }
        (self.name, Value::Object(children))
    }
}

fn local_name(start: &BytesStart<'_>) -> Result<String> {
    let name = start.local_name();
    std::str::from_utf8(name.as_ref())
        .map(str::to_string)
        .map_err(|_| Error::malformed("element name is not valid UTF-8"))
}

fn push_text(frame: Option<&mut Frame>, text: &str) -> Result<()> {
    match frame {
        Some(frame) => {
            frame.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(Error::malformed("text outside the root element")),
    }
}

fn insert_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            children.insert(name, value);
        }
    }
}

fn wrap_root(name: String, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(name, value);
    Value::Object(map)
}

/// The shape of a parsed response, decided by its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// `EnumerateResponse` body carrying an enumeration context.
    Enumerate,
    /// `PullResponse` body carrying items.
    Pull,
    /// Transfer `GetResponse`: the body holds the requested instance.
    Get,
    /// Transfer `PutResponse`.
    Put,
    /// SOAP fault.
    Fault,
    /// Anything else (method invocation output, ...).
    Other,
}

/// A parsed SOAP envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    document: Value,
}

impl Envelope {
    /// Parse response XML.
    pub fn parse(xml: &str) -> Result<Self> {
        Self::from_document(parse_envelope(xml)?)
    }

    /// Wrap an already parsed document; its root must be `Envelope`.
    pub fn from_document(document: Value) -> Result<Self> {
        if !document.get("Envelope").is_some_and(Value::is_object) {
            return Err(Error::malformed("root element is not Envelope"));
        }
        Ok(Self { document })
    }

    /// The full document tree, rooted at `{"Envelope": ...}`.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Consume the envelope, returning the document tree.
    pub fn into_document(self) -> Value {
        self.document
    }

    /// `Envelope/Header`.
    pub fn header(&self) -> Result<&Map<String, Value>> {
        self.section("Header")
    }

    /// `Envelope/Body`.
    pub fn body(&self) -> Result<&Map<String, Value>> {
        self.section("Body")
    }

    /// `Envelope/Header/Action`, when present.
    pub fn action(&self) -> Option<&str> {
        self.header().ok()?.get("Action")?.as_str()
    }

    /// Classify the response.
    pub fn kind(&self) -> ResponseKind {
        if let Ok(body) = self.body() {
            if body.contains_key("EnumerateResponse") {
                return ResponseKind::Enumerate;
            }
            if body.contains_key("PullResponse") {
                return ResponseKind::Pull;
            }
            if body.contains_key("Fault") {
                return ResponseKind::Fault;
            }
        }
        match self.action() {
            Some(action) if action.ends_with("GetResponse") => ResponseKind::Get,
            Some(action) if action.ends_with("PutResponse") => ResponseKind::Put,
            _ => ResponseKind::Other,
        }
    }

    /// Continuation token from an enumerate response.
    pub fn enumeration_context(&self) -> Result<String> {
        let response = self
            .body()?
            .get("EnumerateResponse")
            .ok_or_else(|| self.missing("EnumerateResponse"))?;
        let context = response
            .get("EnumerationContext")
            .and_then(Value::as_str)
            .filter(|context| !context.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::malformed("missing EnumerationContext"))?;
        Ok(context)
    }

    /// `PullResponse/Items` of a pull response.
    pub fn pull_items(&self) -> Result<&Value> {
        self.body()?
            .get("PullResponse")
            .ok_or_else(|| self.missing("PullResponse"))?
            .get("Items")
            .ok_or_else(|| Error::malformed("missing PullResponse/Items"))
    }

    /// Whether a pull response marks the end of the enumeration.
    pub fn end_of_sequence(&self) -> bool {
        self.body()
            .ok()
            .and_then(|body| body.get("PullResponse"))
            .is_some_and(|pull| pull.get("EndOfSequence").is_some())
    }

    /// Extract the single instance a pull or get response carries.
    ///
    /// A pull response must hold items of exactly one class; when that class
    /// repeats, the first instance is taken. Any other non-fault response
    /// must have exactly one body element, which is returned.
    pub fn payload(&self) -> Result<Value> {
        match self.kind() {
            ResponseKind::Pull => {
                let items = self
                    .pull_items()?
                    .as_object()
                    .ok_or_else(|| Error::malformed("PullResponse/Items holds no elements"))?;
                let (_, item) = single_entry(items, "PullResponse/Items")?;
                match item {
                    Value::Array(instances) => instances
                        .first()
                        .cloned()
                        .ok_or_else(|| Error::malformed("PullResponse/Items is empty")),
                    other => Ok(other.clone()),
                }
            }
            ResponseKind::Get | ResponseKind::Other => {
                let (_, item) = single_entry(self.body()?, "Body")?;
                Ok(item.clone())
            }
            ResponseKind::Fault => Err(self.missing("instance")),
            ResponseKind::Enumerate | ResponseKind::Put => {
                Err(Error::malformed("response carries no instance"))
            }
        }
    }

    /// `Body/GetUuid_OUTPUT/UUID`, when present.
    pub fn uuid(&self) -> Option<&Value> {
        self.body().ok()?.get("GetUuid_OUTPUT")?.get("UUID")
    }

    pub(crate) fn uuid_mut(&mut self) -> Option<&mut Value> {
        self.document
            .get_mut("Envelope")?
            .get_mut("Body")?
            .get_mut("GetUuid_OUTPUT")?
            .get_mut("UUID")
    }

    /// `Body/Fault/Reason/Text` of a SOAP fault.
    pub fn fault_reason(&self) -> Option<String> {
        let fault = self.body().ok()?.get("Fault")?;
        fault
            .get("Reason")
            .and_then(|reason| reason.get("Text").or(Some(reason)))
            .and_then(scalar_text)
    }

    fn section(&self, name: &str) -> Result<&Map<String, Value>> {
        self.document
            .get("Envelope")
            .and_then(|envelope| envelope.get(name))
            .and_then(Value::as_object)
            .ok_or_else(|| Error::malformed(format!("missing Envelope/{name}")))
    }

    fn missing(&self, what: &str) -> Error {
        match self.fault_reason() {
            Some(reason) => Error::malformed(format!("expected {what}, got fault: {reason}")),
            None => Error::malformed(format!("missing {what}")),
        }
    }
}

fn single_entry<'a>(map: &'a Map<String, Value>, what: &str) -> Result<(&'a String, &'a Value)> {
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        (None, _) => Err(Error::malformed(format!("{what} is empty"))),
        (Some(_), Some(_)) => Err(Error::malformed(format!(
            "{what} holds {} elements, expected one",
            map.len()
        ))),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const GET_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<a:Envelope xmlns:a="http://www.w3.org/2003/05/soap-envelope" xmlns:b="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:g="http://intel.com/wbem/wscim/1/amt-schema/1/AMT_GeneralSettings">
  <a:Header>
    <b:Action a:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/09/transfer/GetResponse</b:Action>
    <b:MessageID>uuid:00000000-8086-8086-8086-000000000001</b:MessageID>
  </a:Header>
  <a:Body>
    <g:AMT_GeneralSettings>
      <g:AMTNetworkEnabled>1</g:AMTNetworkEnabled>
      <g:DDNSUpdateByDHCPServerEnabled>true</g:DDNSUpdateByDHCPServerEnabled>
      <g:ElementName>Intel(r) AMT: General Settings</g:ElementName>
      <g:HostName></g:HostName>
      <g:InstanceID>Intel(r) AMT: General Settings</g:InstanceID>
      <g:PowerSource>0</g:PowerSource>
      <g:PreferredAddressFamily>0</g:PreferredAddressFamily>
    </g:AMT_GeneralSettings>
  </a:Body>
</a:Envelope>"#;

    #[test]
    fn prefixes_are_stripped_and_attributes_ignored() {
        let doc = parse_envelope(GET_RESPONSE).expect("parse");
        let action = &doc["Envelope"]["Header"]["Action"];
        assert_eq!(
            action,
            "http://schemas.xmlsoap.org/ws/2004/09/transfer/GetResponse"
        );
        let settings = &doc["Envelope"]["Body"]["AMT_GeneralSettings"];
        assert_eq!(settings["AMTNetworkEnabled"], json!(1));
        assert_eq!(settings["DDNSUpdateByDHCPServerEnabled"], json!(true));
        assert_eq!(settings["HostName"], json!(""));
    }

    #[test]
    fn identifier_fields_keep_leading_zero() {
        assert_eq!(coerce_value("InstanceID", "0123"), json!("0123"));
        assert_eq!(coerce_value("ElementName", "0123"), json!("0123"));
        assert_eq!(coerce_value("Value", "0123"), json!(123));
        assert_eq!(coerce_value("InstanceID", "0"), json!(0));
        assert_eq!(coerce_value("InstanceID", "123"), json!(123));
    }

    #[test]
    fn booleans_and_decimals_are_coerced() {
        assert_eq!(coerce_value("Anything", "true"), json!(true));
        assert_eq!(coerce_value("EnumerationContext", "000123"), json!("000123"));
        assert_eq!(coerce_value("EnumerationContext", "TRUE"), json!("TRUE"));
        assert_eq!(coerce_value("EnumerationContext", "1e3"), json!("1e3"));
        assert_eq!(coerce_value("InstanceID", "FALSE"), json!(false));
        assert_eq!(coerce_value("Ratio", "2.5"), json!(2.5));
        assert_eq!(coerce_value("Ratio", "3.0"), json!(3));
        assert_eq!(coerce_value("Version", "11.8.50"), json!("11.8.50"));
        assert_eq!(coerce_value("Name", "inf"), json!("inf"));
        assert_eq!(coerce_value("Big", "18446744073709551615"), json!(u64::MAX));
    }

    #[test]
    fn repeated_elements_become_arrays() {
        let xml = "<Envelope><Body><Items><X>1</X><X>2</X><Y>a</Y></Items></Body></Envelope>";
        let doc = parse_envelope(xml).expect("parse");
        assert_eq!(
            doc,
            json!({"Envelope": {"Body": {"Items": {"X": [1, 2], "Y": "a"}}}})
        );
    }

    #[test]
    fn escaped_text_and_cdata_are_decoded() {
        let xml = "<Envelope><Body><A>a &amp; b</A><B><![CDATA[<raw>]]></B></Body></Envelope>";
        let doc = parse_envelope(xml).expect("parse");
        assert_eq!(doc["Envelope"]["Body"]["A"], "a & b");
        assert_eq!(doc["Envelope"]["Body"]["B"], "<raw>");
    }

    #[test]
    fn malformed_xml_is_an_error() {
        for xml in [
            "<Envelope><Body></Envelope>",
            "<Envelope><Body>",
            "",
            "just text",
            "<A/><B/>",
        ] {
            let err = parse_envelope(xml).unwrap_err();
            assert!(matches!(err, Error::MalformedEnvelope(_)), "{xml:?}");
        }
    }

    #[test]
    fn get_response_payload_is_the_sole_body_child() {
        let envelope = Envelope::parse(GET_RESPONSE).expect("envelope");
        assert_eq!(envelope.kind(), ResponseKind::Get);
        let payload = envelope.payload().expect("payload");
        assert_eq!(payload["PowerSource"], json!(0));
        assert_eq!(payload["InstanceID"], "Intel(r) AMT: General Settings");
    }

    #[test]
    fn pull_response_payload_requires_single_class() {
        let xml = "<Envelope><Header/><Body><PullResponse><Items>\
                   <AMT_EthernetPortSettings><InstanceID>Intel(r) AMT Ethernet Port Settings 0</InstanceID></AMT_EthernetPortSettings>\
                   <AMT_EthernetPortSettings><InstanceID>Intel(r) AMT Ethernet Port Settings 1</InstanceID></AMT_EthernetPortSettings>\
                   </Items><EndOfSequence/></PullResponse></Body></Envelope>";
        let envelope = Envelope::parse(xml).expect("envelope");
        assert_eq!(envelope.kind(), ResponseKind::Pull);
        assert!(envelope.end_of_sequence());
        let payload = envelope.payload().expect("payload");
        assert_eq!(
            payload["InstanceID"],
            "Intel(r) AMT Ethernet Port Settings 0"
        );

        let xml = "<Envelope><Body><PullResponse><Items><A>1</A><B>2</B></Items></PullResponse></Body></Envelope>";
        let err = Envelope::parse(xml).expect("envelope").payload().unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));
    }

    #[test]
    fn single_body_child_is_a_payload_without_action() {
        let xml = "<Envelope><Header/><Body><CIM_Chassis><Tag>CIM_Chassis</Tag></CIM_Chassis></Body></Envelope>";
        let envelope = Envelope::parse(xml).expect("envelope");
        assert_eq!(envelope.kind(), ResponseKind::Other);
        assert_eq!(envelope.payload().expect("payload")["Tag"], "CIM_Chassis");

        let xml = "<Envelope><Header/><Body><A>1</A><B>2</B></Body></Envelope>";
        let err = Envelope::parse(xml).expect("envelope").payload().unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));
    }

    #[test]
    fn enumeration_context_is_required() {
        let xml = "<Envelope><Header/><Body><EnumerateResponse><EnumerationContext>A1000000-0000-0000-0000-000000000000</EnumerationContext></EnumerateResponse></Body></Envelope>";
        let envelope = Envelope::parse(xml).expect("envelope");
        assert_eq!(envelope.kind(), ResponseKind::Enumerate);
        assert_eq!(
            envelope.enumeration_context().expect("context"),
            "A1000000-0000-0000-0000-000000000000"
        );

        let envelope = Envelope::parse(GET_RESPONSE).expect("envelope");
        let err = envelope.enumeration_context().unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));
    }

    #[test]
    fn fault_reason_is_reported() {
        let xml = "<Envelope><Header><Action>http://schemas.xmlsoap.org/ws/2004/08/addressing/fault</Action></Header>\
                   <Body><Fault><Code><Value>Sender</Value></Code><Reason><Text>The action is not supported by the service.</Text></Reason></Fault></Body></Envelope>";
        let envelope = Envelope::parse(xml).expect("envelope");
        assert_eq!(envelope.kind(), ResponseKind::Fault);
        assert_eq!(
            envelope.fault_reason().as_deref(),
            Some("The action is not supported by the service.")
        );
        let err = envelope.enumeration_context().unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn non_envelope_root_is_rejected() {
        let err = Envelope::parse("<html><body/></html>").unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));
    }
}
