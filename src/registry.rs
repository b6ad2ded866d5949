//! Managed classes a controller exposes and the methods each one accepts.
//!
//! The table is informational: the client does not consult it before
//! sending, so callers can still address classes that are missing here.

use crate::types::Method;

use Method::{
    AddAlarm, CancelOptIn, CommitChanges, Enumerate, Get, GetLowAccuracyTimeSynch, GetRecords,
    GetUuid, PositionToFirstRecord, Pull, Put, ReadRecords, SetAdminAclEntryEx, StartOptIn,
};

const READ: &[Method] = &[Enumerate, Get, Pull];
const READ_WRITE: &[Method] = &[Enumerate, Get, Pull, Put];

static CLASSES: &[(&str, &[Method])] = &[
    ("AMT_AlarmClockService", &[Enumerate, Get, Pull, AddAlarm]),
    ("AMT_AuditLog", &[Enumerate, Get, Pull, ReadRecords]),
    ("AMT_AuthorizationService", &[Enumerate, Get, Pull, SetAdminAclEntryEx]),
    ("AMT_BootCapabilities", READ),
    ("AMT_BootSettingData", READ_WRITE),
    ("AMT_EnvironmentDetectionSettingData", READ_WRITE),
    ("AMT_EthernetPortSettings", &[Enumerate, Pull]),
    ("AMT_GeneralSettings", READ_WRITE),
    ("AMT_IEEE8021xCredentialContext", READ),
    ("AMT_IEEE8021xProfile", READ_WRITE),
    ("AMT_ManagementPresenceRemoteSAP", READ),
    (
        "AMT_MessageLog",
        &[Enumerate, Get, GetRecords, PositionToFirstRecord, Pull],
    ),
    ("AMT_PublicKeyCertificate", READ),
    ("AMT_PublicKeyManagementService", READ),
    ("AMT_PublicPrivateKeyPair", READ),
    ("AMT_RedirectionService", READ_WRITE),
    ("AMT_RemoteAccessPolicyAppliesToMPS", READ_WRITE),
    ("AMT_RemoteAccessPolicyRule", READ),
    ("AMT_RemoteAccessService", READ),
    (
        "AMT_SetupAndConfigurationService",
        &[CommitChanges, Enumerate, Get, GetUuid, Pull],
    ),
    (
        "AMT_TimeSynchronizationService",
        &[Enumerate, Get, Pull, GetLowAccuracyTimeSynch],
    ),
    ("AMT_TLSCredentialContext", READ),
    ("AMT_TLSSettingData", READ),
    ("AMT_UserInitiatedConnectionService", READ),
    ("AMT_WiFiPortConfigurationService", READ_WRITE),
    ("CIM_BIOSElement", READ),
    ("CIM_BootService", READ),
    ("CIM_Card", READ),
    ("CIM_Chassis", READ),
    ("CIM_Chip", READ),
    ("CIM_ComputerSystemPackage", READ),
    ("CIM_IEEE8021xSettings", READ),
    ("CIM_KVMRedirectionSAP", READ),
    ("CIM_MediaAccessDevice", READ),
    ("CIM_PhysicalMemory", READ),
    ("CIM_PhysicalPackage", READ),
    ("CIM_PowerManagementService", READ),
    ("CIM_Processor", READ),
    ("CIM_ServiceAvailableToElement", READ),
    ("CIM_SoftwareIdentity", READ),
    ("CIM_SystemPackaging", READ),
    ("CIM_WiFiEndpointSettings", READ),
    ("CIM_WiFiPort", READ),
    ("IPS_AlarmClockOccurrence", READ),
    ("IPS_HostBasedSetupService", READ),
    ("IPS_IEEE8021xCredentialContext", READ),
    ("IPS_IEEE8021xSettings", READ_WRITE),
    (
        "IPS_OptInService",
        &[CancelOptIn, Enumerate, Get, Pull, Put, StartOptIn],
    ),
];

/// Every known class identifier, in table order.
pub fn classes() -> impl Iterator<Item = &'static str> {
    CLASSES.iter().map(|(name, _)| *name)
}

/// Methods a class accepts, or `None` for an unknown class.
pub fn methods_for(identifier: &str) -> Option<&'static [Method]> {
    CLASSES
        .iter()
        .find(|(name, _)| *name == identifier)
        .map(|(_, methods)| *methods)
}

/// Whether `method` is listed for `identifier`.
pub fn is_supported(identifier: &str, method: Method) -> bool {
    methods_for(identifier).is_some_and(|methods| methods.contains(&method))
}
