use core::fmt;
use core::str::FromStr;

use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::Error;

/// Abstract management method requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// WS-Enumeration `Enumerate`.
    Enumerate,
    /// WS-Transfer `Get`.
    Get,
    /// WS-Enumeration `Pull`; needs a prior `Enumerate`.
    Pull,
    /// WS-Transfer `Put`; needs a prior `Get`.
    Put,
    /// `AMT_AlarmClockService.AddAlarm`.
    AddAlarm,
    /// `AMT_AuditLog.ReadRecords`.
    ReadRecords,
    /// `AMT_MessageLog.GetRecords`.
    GetRecords,
    /// `AMT_MessageLog.PositionToFirstRecord`.
    PositionToFirstRecord,
    /// `AMT_SetupAndConfigurationService.GetUuid`.
    GetUuid,
    /// `AMT_SetupAndConfigurationService.CommitChanges`.
    CommitChanges,
    /// `AMT_TimeSynchronizationService.GetLowAccuracyTimeSynch`.
    GetLowAccuracyTimeSynch,
    /// `IPS_OptInService.StartOptIn`.
    StartOptIn,
    /// `IPS_OptInService.CancelOptIn`.
    CancelOptIn,
    /// `AMT_AuthorizationService.SetAdminAclEntryEx`.
    SetAdminAclEntryEx,
}

impl Method {
    /// Every method the dispatcher supports.
    pub const ALL: [Method; 14] = [
        Method::Enumerate,
        Method::Get,
        Method::Pull,
        Method::Put,
        Method::AddAlarm,
        Method::ReadRecords,
        Method::GetRecords,
        Method::PositionToFirstRecord,
        Method::GetUuid,
        Method::CommitChanges,
        Method::GetLowAccuracyTimeSynch,
        Method::StartOptIn,
        Method::CancelOptIn,
        Method::SetAdminAclEntryEx,
    ];

    /// Wire name of the method (also the WS-Management action suffix).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enumerate => "Enumerate",
            Self::Get => "Get",
            Self::Pull => "Pull",
            Self::Put => "Put",
            Self::AddAlarm => "AddAlarm",
            Self::ReadRecords => "ReadRecords",
            Self::GetRecords => "GetRecords",
            Self::PositionToFirstRecord => "PositionToFirstRecord",
            Self::GetUuid => "GetUuid",
            Self::CommitChanges => "CommitChanges",
            Self::GetLowAccuracyTimeSynch => "GetLowAccuracyTimeSynch",
            Self::StartOptIn => "StartOptIn",
            Self::CancelOptIn => "CancelOptIn",
            Self::SetAdminAclEntryEx => "SetAdminAclEntryEx",
        }
    }

    /// The method whose response a dependent request needs, if any.
    pub fn precursor(self) -> Option<Method> {
        match self {
            Self::Pull => Some(Self::Enumerate),
            Self::Put => Some(Self::Get),
            _ => None,
        }
    }

    /// The class an extension method always addresses.
    ///
    /// Generic transfer/enumeration methods return `None`: they address the
    /// caller's class.
    pub fn owning_class(self) -> Option<(Namespace, &'static str)> {
        match self {
            Self::AddAlarm => Some((Namespace::Amt, "AlarmClockService")),
            Self::ReadRecords => Some((Namespace::Amt, "AuditLog")),
            Self::GetRecords | Self::PositionToFirstRecord => Some((Namespace::Amt, "MessageLog")),
            Self::GetUuid | Self::CommitChanges => {
                Some((Namespace::Amt, "SetupAndConfigurationService"))
            }
            Self::GetLowAccuracyTimeSynch => Some((Namespace::Amt, "TimeSynchronizationService")),
            Self::StartOptIn | Self::CancelOptIn => Some((Namespace::Ips, "OptInService")),
            Self::SetAdminAclEntryEx => Some((Namespace::Amt, "AuthorizationService")),
            Self::Enumerate | Self::Get | Self::Pull | Self::Put => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    /// Accepts `Pull`, `PULL`, `GetUuid`, `GET_UUID`, ... in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Method::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| Error::UnsupportedMethod(s.to_string()))
    }
}

/// Schema family of a managed class, selected by the identifier prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// `AMT_*` classes.
    Amt,
    /// `CIM_*` classes.
    Cim,
    /// `IPS_*` classes.
    Ips,
}

impl Namespace {
    /// Identifier prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amt => "AMT",
            Self::Cim => "CIM",
            Self::Ips => "IPS",
        }
    }

    /// Base of the resource URIs of this family's classes.
    pub fn resource_uri_base(self) -> &'static str {
        match self {
            Self::Amt => "http://intel.com/wbem/wscim/1/amt-schema/1/",
            Self::Cim => "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/",
            Self::Ips => "http://intel.com/wbem/wscim/1/ips-schema/1/",
        }
    }

    /// Look up the family named by an identifier prefix.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "AMT" => Some(Self::Amt),
            "CIM" => Some(Self::Cim),
            "IPS" => Some(Self::Ips),
            _ => None,
        }
    }
}

/// A managed class addressed by a message: namespace plus member name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Class namespace.
    pub namespace: Namespace,
    /// Member (class name without the namespace prefix).
    pub member: String,
}

impl Target {
    /// Create a target.
    pub fn new(namespace: Namespace, member: impl Into<String>) -> Self {
        Self {
            namespace,
            member: member.into(),
        }
    }

    /// Full class name, e.g. `AMT_GeneralSettings`.
    pub fn class_name(&self) -> String {
        format!("{}_{}", self.namespace.as_str(), self.member)
    }

    /// Resource URI of the class.
    pub fn resource_uri(&self) -> String {
        format!(
            "{}{}",
            self.namespace.resource_uri_base(),
            self.class_name()
        )
    }
}

/// A caller's request.
///
/// Identifier and method are optional so that a request missing either can
/// be represented and reported as invalid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    /// `"<Class>_<Member>"`, e.g. `AMT_GeneralSettings`.
    pub identifier: Option<String>,
    /// Method name, e.g. `PULL` or `GetUuid`.
    pub method: Option<String>,
    /// Pre-built XML body, sent as-is instead of building one.
    pub xml: Option<String>,
    /// Extra parameters for methods that need them.
    pub user_input: Option<Value>,
}

impl Request {
    /// Create a request for `identifier` and `method`.
    pub fn new(identifier: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            method: Some(method.into()),
            ..Self::default()
        }
    }

    /// Send `xml` instead of building a body.
    pub fn xml(mut self, xml: impl Into<String>) -> Self {
        self.xml = Some(xml.into());
        self
    }

    /// Attach user input (e.g. `{"StartTime": "..."}` for `AddAlarm`).
    pub fn user_input(mut self, input: Value) -> Self {
        self.user_input = Some(input);
        self
    }
}

/// Where an exchange is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Rejected before any I/O; see [`Exchange::errors`].
    Invalid,
    /// Identifier split into class and member.
    Decomposed,
    /// Request body built.
    BodyBuilt,
    /// Request written to the transport.
    Sent,
    /// Resent once after a digest challenge.
    AuthRetried,
    /// Response body decoded and parsed.
    Decoded,
    /// Done.
    Completed,
}

impl ExchangeState {
    /// Lower-case name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Decomposed => "decomposed",
            Self::BodyBuilt => "body_built",
            Self::Sent => "sent",
            Self::AuthRetried => "auth_retried",
            Self::Decoded => "decoded",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Working record and result of one logical call.
///
/// A fresh `Exchange` is created for every call and for every internal
/// precursor; none is reused.
#[derive(Clone, PartialEq)]
pub struct Exchange {
    /// Class part of the identifier (e.g. `AMT`).
    pub class: String,
    /// Member part of the identifier (e.g. `GeneralSettings`).
    pub member: String,
    /// Resolved method, once parsed.
    pub method: Option<Method>,
    /// Current life-cycle state.
    pub state: ExchangeState,
    /// Continuation token obtained from the precursor of a `Pull`.
    pub enumeration_context: Option<String>,
    /// Validation errors; non-empty means nothing was sent.
    pub errors: Vec<String>,
    /// Outbound XML body.
    pub xml: Option<String>,
    /// Response body as received (still chunk-framed when chunked).
    pub raw_body: Option<String>,
    /// Decoded response XML.
    pub body: Option<String>,
    /// Parsed response.
    pub envelope: Option<Envelope>,
    /// HTTP status code of the final response.
    pub status_code: Option<u16>,
}

impl Exchange {
    pub(crate) fn new(class: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            member: member.into(),
            method: None,
            state: ExchangeState::Decomposed,
            enumeration_context: None,
            errors: Vec::new(),
            xml: None,
            raw_body: None,
            body: None,
            envelope: None,
            status_code: None,
        }
    }

    pub(crate) fn invalid(error: &Error) -> Self {
        let mut exchange = Self::new(String::new(), String::new());
        exchange.state = ExchangeState::Invalid;
        exchange.errors.push(error.to_string());
        exchange
    }

    /// Whether the request passed validation.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// `"<Class>_<Member>"`.
    pub fn identifier(&self) -> String {
        format!("{}_{}", self.class, self.member)
    }

    /// The parsed response, or `MalformedEnvelope` when there is none.
    pub fn envelope(&self) -> Result<&Envelope, Error> {
        self.envelope
            .as_ref()
            .ok_or_else(|| Error::malformed("response has no body"))
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("class", &self.class)
            .field("member", &self.member)
            .field("method", &self.method)
            .field("state", &self.state)
            .field("errors", &self.errors)
            .field("status_code", &self.status_code)
            .field("xml_len", &self.xml.as_ref().map(String::len))
            .field("body_len", &self.body.as_ref().map(String::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_parse_in_both_spellings() {
        assert_eq!("PULL".parse::<Method>().expect("pull"), Method::Pull);
        assert_eq!("Pull".parse::<Method>().expect("pull"), Method::Pull);
        assert_eq!("GET_UUID".parse::<Method>().expect("uuid"), Method::GetUuid);
        assert_eq!(
            "SET_ADMIN_ACL_ENTRY_EX".parse::<Method>().expect("acl"),
            Method::SetAdminAclEntryEx
        );
        assert_eq!(
            "GetLowAccuracyTimeSynch".parse::<Method>().expect("time"),
            Method::GetLowAccuracyTimeSynch
        );
    }

    #[test]
    fn exchange_states_display_in_snake_case() {
        assert_eq!(ExchangeState::BodyBuilt.to_string(), "body_built");
        assert_eq!(ExchangeState::AuthRetried.to_string(), "auth_retried");
    }

    #[test]
    fn unknown_method_is_unsupported() {
        let err = "Delete".parse::<Method>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedMethod(ref m) if m == "Delete"));
    }

    #[test]
    fn only_pull_and_put_have_precursors() {
        for method in Method::ALL {
            let expected = match method {
                Method::Pull => Some(Method::Enumerate),
                Method::Put => Some(Method::Get),
                _ => None,
            };
            assert_eq!(method.precursor(), expected, "{method}");
        }
    }

    #[test]
    fn target_resource_uri() {
        let target = Target::new(Namespace::Cim, "BIOSElement");
        assert_eq!(target.class_name(), "CIM_BIOSElement");
        assert_eq!(
            target.resource_uri(),
            "http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_BIOSElement"
        );
    }
}
