//! Correlation keys matching a delivered event to its pending probe.

use std::fmt;

use super::kind::{ApiServerPhase, StoragePhase};

/// Identifies one outstanding round trip.
///
/// A probe request and the event the platform later delivers for it must
/// derive the same key. Multi-phase flows carry their phase so sequential
/// probes on the same resource never collide.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    Broker { namespace: String, broker: String },
    PubSub { topic: String },
    Storage { bucket: String, phase: StoragePhase },
    Scheduler,
    Ping,
    ApiServer { phase: ApiServerPhase },
    AuditLogs { topic: String },
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broker { namespace, broker } => write!(f, "broker/{namespace}/{broker}"),
            Self::PubSub { topic } => write!(f, "pubsub/{topic}"),
            Self::Storage { bucket, phase } => write!(f, "storage/{bucket}/{}", phase.as_str()),
            Self::Scheduler => f.write_str("scheduler"),
            Self::Ping => f.write_str("ping"),
            Self::ApiServer { phase } => write!(f, "apiserver/{}", phase.as_str()),
            Self::AuditLogs { topic } => write!(f, "auditlogs/{topic}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_phase() {
        let key = CorrelationKey::Storage {
            bucket: "b".to_string(),
            phase: StoragePhase::UpdateMetadata,
        };
        assert_eq!(key.to_string(), "storage/b/update-metadata");
        assert_eq!(
            CorrelationKey::ApiServer { phase: ApiServerPhase::Delete }.to_string(),
            "apiserver/delete"
        );
    }

    #[test]
    fn phases_do_not_collide() {
        let create = CorrelationKey::Storage {
            bucket: "b".to_string(),
            phase: StoragePhase::Create,
        };
        let delete = CorrelationKey::Storage {
            bucket: "b".to_string(),
            phase: StoragePhase::Delete,
        };
        assert_ne!(create, delete);
    }
}
