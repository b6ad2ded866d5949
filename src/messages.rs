//! WS-Management request bodies.
//!
//! The client resolves every request to an [`Action`] and hands it, together
//! with the addressed [`Target`], to a [`MessageBuilder`]. [`Messages`] is the
//! stock builder; callers with their own templates can plug in another.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::escape::escape;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{Method, Target};

const SOAP_ENVELOPE_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const ADDRESSING_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const ENUMERATION_NS: &str = "http://schemas.xmlsoap.org/ws/2004/09/enumeration";
const TRANSFER_NS: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer";
const COMMON_NS: &str = "http://schemas.dmtf.org/wbem/wscim/1/common";
const ALARM_OCCURRENCE_NS: &str =
    "http://intel.com/wbem/wscim/1/ips-schema/1/IPS_AlarmClockOccurrence";
const ANONYMOUS_ADDRESS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

const PULL_MAX_ELEMENTS: u32 = 999;
const PULL_MAX_CHARACTERS: u32 = 99_999;
const DEFAULT_MAX_READ_RECORDS: u32 = 390;

/// A fully resolved operation, ready to be rendered into XML.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Transfer `Get`.
    Get,
    /// Enumeration `Enumerate`.
    Enumerate,
    /// Enumeration `Pull` with the context returned by `Enumerate`.
    Pull {
        /// Opaque enumeration context.
        context: String,
    },
    /// Transfer `Put` of an instance previously fetched with `Get`.
    Put {
        /// Instance document (element name to value).
        instance: Value,
    },
    /// Schedule a wake-up alarm.
    AddAlarm(AlarmTemplate),
    /// Read audit log records starting at `start_index`.
    ReadRecords {
        /// One-based index of the first record.
        start_index: u32,
    },
    /// Read event log records.
    GetRecords {
        /// Iteration handle from `PositionToFirstRecord`.
        iteration_identifier: u32,
        /// Maximum records to return.
        max_read_records: u32,
    },
    /// Position the event log iterator at the first record.
    PositionToFirstRecord,
    /// Read the platform UUID.
    GetUuid,
    /// Commit pending setup changes.
    CommitChanges,
    /// Read the controller's low accuracy clock.
    GetLowAccuracyTimeSynch,
    /// Start a user consent (opt-in) flow.
    StartOptIn,
    /// Cancel a user consent (opt-in) flow.
    CancelOptIn,
    /// Set the administrator ACL entry.
    SetAdminAclEntryEx {
        /// Administrator user name.
        username: String,
        /// Base64 MD5 credential digest (see [`crate::DigestAuth::hash_credential`]).
        digest_password: String,
    },
}

impl Action {
    /// The method this action implements.
    pub fn method(&self) -> Method {
        match self {
            Self::Get => Method::Get,
            Self::Enumerate => Method::Enumerate,
            Self::Pull { .. } => Method::Pull,
            Self::Put { .. } => Method::Put,
            Self::AddAlarm(_) => Method::AddAlarm,
            Self::ReadRecords { .. } => Method::ReadRecords,
            Self::GetRecords { .. } => Method::GetRecords,
            Self::PositionToFirstRecord => Method::PositionToFirstRecord,
            Self::GetUuid => Method::GetUuid,
            Self::CommitChanges => Method::CommitChanges,
            Self::GetLowAccuracyTimeSynch => Method::GetLowAccuracyTimeSynch,
            Self::StartOptIn => Method::StartOptIn,
            Self::CancelOptIn => Method::CancelOptIn,
            Self::SetAdminAclEntryEx { .. } => Method::SetAdminAclEntryEx,
        }
    }
}

/// Alarm to schedule with `AddAlarm`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmTemplate {
    /// Alarm instance id.
    pub instance_id: String,
    /// Display name; defaults to the instance id.
    pub element_name: Option<String>,
    /// First occurrence.
    pub start_time: DateTime<Utc>,
    /// Repeat interval as an `xs:duration` (e.g. `P1DT0H0M`).
    pub interval: Option<String>,
    /// Remove the alarm once it fired.
    pub delete_on_completion: bool,
}

impl AlarmTemplate {
    /// Build from caller input.
    ///
    /// Recognised keys: `InstanceID` (required), `StartTime` (required,
    /// RFC 3339 or `YYYY-MM-DD[THH:MM[:SS]]` in UTC), `ElementName`,
    /// `Interval` (minutes or an `xs:duration` string), `DeleteOnCompletion`.
    pub fn from_user_input(input: Option<&Value>) -> Result<Self> {
        let input = input.ok_or_else(|| Error::invalid_argument("AddAlarm requires user input"))?;
        let instance_id = required_str(input, "InstanceID")?.to_string();
        let start_time = parse_start_time(required_str(input, "StartTime")?)?;
        let element_name = input
            .get("ElementName")
            .and_then(Value::as_str)
            .map(str::to_string);
        let interval = match input.get("Interval") {
            None | Some(Value::Null) => None,
            Some(Value::Number(minutes)) => {
                let minutes = minutes
                    .as_u64()
                    .ok_or_else(|| Error::invalid_argument("Interval must be whole minutes"))?;
                Some(minutes_to_duration(minutes))
            }
            Some(Value::String(duration)) => Some(duration.clone()),
            Some(_) => {
                return Err(Error::invalid_argument("Interval must be minutes or a duration"));
            }
        };
        let delete_on_completion = input
            .get("DeleteOnCompletion")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        Ok(Self {
            instance_id,
            element_name,
            start_time,
            interval,
            delete_on_completion,
        })
    }
}

/// Parse an alarm start time. Text without an offset is taken as UTC.
pub fn parse_start_time(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Ok(time.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(time) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(time.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|time| time.and_utc())
        .ok_or_else(|| Error::invalid_argument(format!("invalid StartTime: {text:?}")))
}

fn minutes_to_duration(minutes: u64) -> String {
    let days = minutes / (24 * 60);
    let hours = (minutes / 60) % 24;
    let minutes = minutes % 60;
    format!("P{days}DT{hours}H{minutes}M")
}

/// Administrator credential supplied for `SetAdminAclEntryEx`.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminCredential {
    /// Administrator user name.
    pub username: String,
    /// Clear-text password, hashed before it is sent.
    pub password: String,
}

impl AdminCredential {
    /// Build from caller input with `Username` and `DigestPassword` keys.
    pub fn from_user_input(input: Option<&Value>) -> Result<Self> {
        let input = input
            .ok_or_else(|| Error::invalid_argument("SetAdminAclEntryEx requires user input"))?;
        Ok(Self {
            username: required_str(input, "Username")?.to_string(),
            password: required_str(input, "DigestPassword")?.to_string(),
        })
    }
}

impl core::fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdminCredential")
            .field("username", &self.username)
            .field("password", &"<secret>")
            .finish()
    }
}

fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_argument(format!("user input is missing {key}")))
}

fn optional_u32(input: Option<&Value>, key: &str, default: u32) -> Result<u32> {
    match input.and_then(|input| input.get(key)) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                Error::invalid_argument(format!("{key} must be a 32-bit unsigned integer"))
            }),
    }
}

/// Resolve a method that needs neither a precursor nor a credential hash.
///
/// `Pull`, `Put` and `SetAdminAclEntryEx` are resolved by the client, which
/// owns the collaborators they depend on.
pub(crate) fn direct_action(method: Method, user_input: Option<&Value>) -> Result<Action> {
    Ok(match method {
        Method::Get => Action::Get,
        Method::Enumerate => Action::Enumerate,
        Method::AddAlarm => Action::AddAlarm(AlarmTemplate::from_user_input(user_input)?),
        Method::ReadRecords => Action::ReadRecords {
            start_index: optional_u32(user_input, "StartIndex", 1)?,
        },
        Method::GetRecords => Action::GetRecords {
            iteration_identifier: optional_u32(user_input, "IterationIdentifier", 1)?,
            max_read_records: optional_u32(user_input, "MaxReadRecords", DEFAULT_MAX_READ_RECORDS)?,
        },
        Method::PositionToFirstRecord => Action::PositionToFirstRecord,
        Method::GetUuid => Action::GetUuid,
        Method::CommitChanges => Action::CommitChanges,
        Method::GetLowAccuracyTimeSynch => Action::GetLowAccuracyTimeSynch,
        Method::StartOptIn => Action::StartOptIn,
        Method::CancelOptIn => Action::CancelOptIn,
        Method::Pull | Method::Put | Method::SetAdminAclEntryEx => {
            return Err(Error::protocol_owned(format!(
                "{method} cannot be resolved without collaborators"
            )));
        }
    })
}

/// Renders [`Action`]s into WS-Management request bodies.
pub trait MessageBuilder {
    /// Build the XML body for `action` addressed to `target`.
    fn build(&mut self, target: &Target, action: &Action) -> Result<String>;
}

/// Stock WS-Management message builder.
#[derive(Debug, Default)]
pub struct Messages {
    next_message_id: u64,
}

impl Messages {
    /// Create a builder whose message ids start at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_message_id(&mut self) -> u64 {
        let current = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        current
    }
}

impl MessageBuilder for Messages {
    fn build(&mut self, target: &Target, action: &Action) -> Result<String> {
        let resource_uri = target.resource_uri();
        let class_name = target.class_name();

        let (action_uri, body) = match action {
            Action::Get => (format!("{TRANSFER_NS}/Get"), String::new()),
            Action::Enumerate => (
                format!("{ENUMERATION_NS}/Enumerate"),
                format!("<Enumerate xmlns=\"{ENUMERATION_NS}\" />"),
            ),
            Action::Pull { context } => (
                format!("{ENUMERATION_NS}/Pull"),
                format!(
                    "<Pull xmlns=\"{ENUMERATION_NS}\"><EnumerationContext>{}</EnumerationContext><MaxElements>{PULL_MAX_ELEMENTS}</MaxElements><MaxCharacters>{PULL_MAX_CHARACTERS}</MaxCharacters></Pull>",
                    escape(context.as_str())
                ),
            ),
            Action::Put { instance } => {
                let fields = instance
                    .as_object()
                    .ok_or_else(|| Error::invalid_argument("Put instance must be an object"))?;
                let mut body = format!("<h:{class_name} xmlns:h=\"{resource_uri}\">");
                for (name, value) in fields {
                    write_element(&mut body, name, value);
                }
                body.push_str(&format!("</h:{class_name}>"));
                (format!("{TRANSFER_NS}/Put"), body)
            }
            other => {
                let method = other.method();
                let params = method_parameters(other);
                let body = if params.is_empty() {
                    format!("<h:{method}_INPUT xmlns:h=\"{resource_uri}\" />")
                } else {
                    format!(
                        "<h:{method}_INPUT xmlns:h=\"{resource_uri}\">{params}</h:{method}_INPUT>"
                    )
                };
                (format!("{resource_uri}/{method}"), body)
            }
        };

        let message_id = self.allocate_message_id();
        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <Envelope xmlns=\"{SOAP_ENVELOPE_NS}\" xmlns:a=\"{ADDRESSING_NS}\" xmlns:w=\"{WSMAN_NS}\">\
             <Header>\
             <a:Action>{action_uri}</a:Action>\
             <a:To>/wsman</a:To>\
             <w:ResourceURI>{resource_uri}</w:ResourceURI>\
             <a:MessageID>{message_id}</a:MessageID>\
             <a:ReplyTo><a:Address>{ANONYMOUS_ADDRESS}</a:Address></a:ReplyTo>\
             <w:OperationTimeout>PT60S</w:OperationTimeout>\
             </Header>\
             <Body>{body}</Body>\
             </Envelope>"
        ))
    }
}

fn method_parameters(action: &Action) -> String {
    match action {
        Action::AddAlarm(alarm) => {
            let element_name = alarm.element_name.as_deref().unwrap_or(&alarm.instance_id);
            let mut out = format!(
                "<h:AlarmTemplate xmlns:s=\"{ALARM_OCCURRENCE_NS}\" xmlns:c=\"{COMMON_NS}\">\
                 <s:InstanceID>{}</s:InstanceID>\
                 <s:ElementName>{}</s:ElementName>\
                 <s:StartTime><c:Datetime>{}</c:Datetime></s:StartTime>",
                escape(alarm.instance_id.as_str()),
                escape(element_name),
                alarm.start_time.format("%Y-%m-%dT%H:%M:%SZ"),
            );
            if let Some(interval) = &alarm.interval {
                out.push_str(&format!(
                    "<s:Interval><c:Interval>{}</c:Interval></s:Interval>",
                    escape(interval.as_str())
                ));
            }
            out.push_str(&format!(
                "<s:DeleteOnCompletion>{}</s:DeleteOnCompletion></h:AlarmTemplate>",
                alarm.delete_on_completion
            ));
            out
        }
        Action::ReadRecords { start_index } => {
            format!("<h:StartIndex>{start_index}</h:StartIndex>")
        }
        Action::GetRecords {
            iteration_identifier,
            max_read_records,
        } => format!(
            "<h:IterationIdentifier>{iteration_identifier}</h:IterationIdentifier><h:MaxReadRecords>{max_read_records}</h:MaxReadRecords>"
        ),
        Action::SetAdminAclEntryEx {
            username,
            digest_password,
        } => format!(
            "<h:Username>{}</h:Username><h:DigestPassword>{}</h:DigestPassword>",
            escape(username.as_str()),
            escape(digest_password.as_str())
        ),
        _ => String::new(),
    }
}

fn write_element(out: &mut String, name: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                write_element(out, name, item);
            }
        }
        Value::Object(fields) => {
            out.push_str(&format!("<h:{name}>"));
            for (child, value) in fields {
                if child == "_" {
                    write_text(out, value);
                } else {
                    write_element(out, child, value);
                }
            }
            out.push_str(&format!("</h:{name}>"));
        }
        scalar => {
            out.push_str(&format!("<h:{name}>"));
            write_text(out, scalar);
            out.push_str(&format!("</h:{name}>"));
        }
    }
}

fn write_text(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => out.push_str(&escape(s.as_str())),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        _ => {}
    }
}
