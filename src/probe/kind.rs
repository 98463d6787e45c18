//! The closed set of probe kinds and their phases.

use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Phase of an object-storage round trip.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoragePhase {
    Create,
    UpdateMetadata,
    Archive,
    Delete,
}

impl StoragePhase {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::UpdateMetadata => "update-metadata",
            Self::Archive => "archive",
            Self::Delete => "delete",
        }
    }
}

/// Phase of an orchestration-API round trip.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiServerPhase {
    Create,
    Update,
    Delete,
}

impl ApiServerPhase {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Every delivery path the helper knows how to exercise.
///
/// The wire name of each kind is the `type` attribute of a probe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// Forward the probe through a broker and wait for it to come back.
    BrokerDelivery,
    /// Publish to a message-bus topic watched by a pub/sub source.
    PubSubSource,
    /// Mutate an object in a bucket watched by a storage source.
    StorageSource(StoragePhase),
    /// Wait for the next tick of a scheduled job.
    SchedulerSource,
    /// Wait for the next tick of a ping source.
    PingSource,
    /// Mutate a pod watched by an orchestration-API source.
    ApiServerSource(ApiServerPhase),
    /// Create a topic and wait for the resulting audit-log entry.
    AuditLogsSource,
}

impl ProbeKind {
    /// All kinds, in wire-name order.
    pub const ALL: [Self; 12] = [
        Self::BrokerDelivery,
        Self::PubSubSource,
        Self::StorageSource(StoragePhase::Create),
        Self::StorageSource(StoragePhase::UpdateMetadata),
        Self::StorageSource(StoragePhase::Archive),
        Self::StorageSource(StoragePhase::Delete),
        Self::SchedulerSource,
        Self::PingSource,
        Self::ApiServerSource(ApiServerPhase::Create),
        Self::ApiServerSource(ApiServerPhase::Update),
        Self::ApiServerSource(ApiServerPhase::Delete),
        Self::AuditLogsSource,
    ];

    /// The `type` attribute identifying this kind.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::BrokerDelivery => "broker-e2e-delivery-probe",
            Self::PubSubSource => "cloudpubsubsource-probe",
            Self::StorageSource(StoragePhase::Create) => "cloudstoragesource-probe-create",
            Self::StorageSource(StoragePhase::UpdateMetadata) => "cloudstoragesource-probe-update-metadata",
            Self::StorageSource(StoragePhase::Archive) => "cloudstoragesource-probe-archive",
            Self::StorageSource(StoragePhase::Delete) => "cloudstoragesource-probe-delete",
            Self::SchedulerSource => "cloudschedulersource-probe",
            Self::PingSource => "pingsource-probe",
            Self::ApiServerSource(ApiServerPhase::Create) => "apiserversource-probe-create",
            Self::ApiServerSource(ApiServerPhase::Update) => "apiserversource-probe-update",
            Self::ApiServerSource(ApiServerPhase::Delete) => "apiserversource-probe-delete",
            Self::AuditLogsSource => "cloudauditlogssource-probe",
        }
    }

    /// True for kinds that wait on an autonomous tick instead of triggering.
    #[must_use]
    pub const fn is_periodic(self) -> bool {
        matches!(self, Self::SchedulerSource | Self::PingSource)
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for ProbeKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.wire_name() == s)
            .ok_or_else(|| ValidationError::UnrecognizedKind { kind: s.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_parse_back() {
        for kind in ProbeKind::ALL {
            assert_eq!(kind.wire_name().parse::<ProbeKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = "unrecognized-probe-type".parse::<ProbeKind>().unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnrecognizedKind {
                kind: "unrecognized-probe-type".to_string()
            }
        );
    }

    #[test]
    fn only_tick_kinds_are_periodic() {
        let periodic: Vec<_> = ProbeKind::ALL.into_iter().filter(|k| k.is_periodic()).collect();
        assert_eq!(periodic, vec![ProbeKind::SchedulerSource, ProbeKind::PingSource]);
    }
}
