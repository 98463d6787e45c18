//! Classification of delivered events into correlation keys.
//!
//! Every delivery path produces a platform-specific event type. This module
//! maps each of them back to the key its probe registered under; anything it
//! does not recognize yields `None` and is ignored by the receiver.

use crate::event::Event;

use super::key::CorrelationKey;
use super::kind::{ApiServerPhase, ProbeKind, StoragePhase};
use super::registry::{BROKER_EXTENSION, DEFAULT_BROKER, NAMESPACE_EXTENSION};

/// Delivered type of a pub/sub source message.
pub const PUBSUB_PUBLISHED: &str = "google.cloud.pubsub.topic.v1.messagePublished";
#[allow(missing_docs)]
pub const STORAGE_FINALIZED: &str = "google.cloud.storage.object.v1.finalized";
#[allow(missing_docs)]
pub const STORAGE_METADATA_UPDATED: &str = "google.cloud.storage.object.v1.metadataUpdated";
#[allow(missing_docs)]
pub const STORAGE_ARCHIVED: &str = "google.cloud.storage.object.v1.archived";
#[allow(missing_docs)]
pub const STORAGE_DELETED: &str = "google.cloud.storage.object.v1.deleted";
#[allow(missing_docs)]
pub const SCHEDULER_EXECUTED: &str = "google.cloud.scheduler.job.v1.executed";
#[allow(missing_docs)]
pub const PING_TICK: &str = "dev.knative.sources.ping";
#[allow(missing_docs)]
pub const APISERVER_ADD: &str = "dev.knative.apiserver.resource.add";
#[allow(missing_docs)]
pub const APISERVER_UPDATE: &str = "dev.knative.apiserver.resource.update";
#[allow(missing_docs)]
pub const APISERVER_DELETE: &str = "dev.knative.apiserver.resource.delete";
/// Delivered type of an audit-log entry.
pub const AUDIT_LOG_WRITTEN: &str = "google.cloud.audit.log.v1.written";

/// Audit-log `methodname` extension emitted when a topic is created.
pub const CREATE_TOPIC_METHOD: &str = "google.pubsub.v1.Publisher.CreateTopic";
#[allow(missing_docs)]
pub const METHOD_NAME_EXTENSION: &str = "methodname";

/// Computes the key a delivered event resolves, if any.
#[must_use]
pub fn correlation_key_for_delivered(event: &Event) -> Option<CorrelationKey> {
    let key = match event.kind.as_str() {
        kind if kind == ProbeKind::BrokerDelivery.wire_name() => CorrelationKey::Broker {
            namespace: event.non_empty_extension(NAMESPACE_EXTENSION)?.to_string(),
            broker: event
                .non_empty_extension(BROKER_EXTENSION)
                .unwrap_or(DEFAULT_BROKER)
                .to_string(),
        },
        PUBSUB_PUBLISHED => CorrelationKey::PubSub {
            topic: resource_after(&event.source, "topics")?.to_string(),
        },
        STORAGE_FINALIZED => storage_key(event, StoragePhase::Create)?,
        STORAGE_METADATA_UPDATED => storage_key(event, StoragePhase::UpdateMetadata)?,
        STORAGE_ARCHIVED => storage_key(event, StoragePhase::Archive)?,
        STORAGE_DELETED => storage_key(event, StoragePhase::Delete)?,
        SCHEDULER_EXECUTED => CorrelationKey::Scheduler,
        PING_TICK => CorrelationKey::Ping,
        APISERVER_ADD => CorrelationKey::ApiServer {
            phase: ApiServerPhase::Create,
        },
        APISERVER_UPDATE => CorrelationKey::ApiServer {
            phase: ApiServerPhase::Update,
        },
        APISERVER_DELETE => CorrelationKey::ApiServer {
            phase: ApiServerPhase::Delete,
        },
        AUDIT_LOG_WRITTEN => {
            if event.extension(METHOD_NAME_EXTENSION) != Some(CREATE_TOPIC_METHOD) {
                return None;
            }
            CorrelationKey::AuditLogs {
                topic: last_segment(event.subject.as_deref()?)?.to_string(),
            }
        }
        _ => return None,
    };
    Some(key)
}

fn storage_key(event: &Event, phase: StoragePhase) -> Option<CorrelationKey> {
    Some(CorrelationKey::Storage {
        bucket: resource_after(&event.source, "buckets")?.to_string(),
        phase,
    })
}

/// Returns the segment following `collection` in a resource path such as
/// `//pubsub.googleapis.com/projects/p/topics/t`.
fn resource_after<'a>(path: &'a str, collection: &str) -> Option<&'a str> {
    let mut segments = path.split('/');
    segments.find(|s| *s == collection)?;
    segments.next().filter(|s| !s.is_empty())
}

fn last_segment(path: &str) -> Option<&str> {
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivered(kind: &str, source: &str) -> Event {
        Event::new("id", kind, source)
    }

    #[test]
    fn forwarded_broker_probe_defaults_broker() {
        let event = delivered("broker-e2e-delivery-probe", "probe")
            .with_extension("namespace", "test-namespace");
        assert_eq!(
            correlation_key_for_delivered(&event),
            Some(CorrelationKey::Broker {
                namespace: "test-namespace".to_string(),
                broker: "default".to_string(),
            })
        );
    }

    #[test]
    fn broker_probe_without_namespace_is_unmatched() {
        let event = delivered("broker-e2e-delivery-probe", "probe");
        assert_eq!(correlation_key_for_delivered(&event), None);
    }

    #[test]
    fn pubsub_topic_comes_from_source() {
        let event = delivered(
            PUBSUB_PUBLISHED,
            "//pubsub.googleapis.com/projects/my-project/topics/cloudpubsubsource-topic",
        );
        assert_eq!(
            correlation_key_for_delivered(&event),
            Some(CorrelationKey::PubSub {
                topic: "cloudpubsubsource-topic".to_string()
            })
        );
    }

    #[test]
    fn storage_phase_follows_type() {
        let source = "//storage.googleapis.com/projects/_/buckets/my-bucket";
        let cases = [
            (STORAGE_FINALIZED, StoragePhase::Create),
            (STORAGE_METADATA_UPDATED, StoragePhase::UpdateMetadata),
            (STORAGE_ARCHIVED, StoragePhase::Archive),
            (STORAGE_DELETED, StoragePhase::Delete),
        ];
        for (kind, phase) in cases {
            assert_eq!(
                correlation_key_for_delivered(&delivered(kind, source)),
                Some(CorrelationKey::Storage {
                    bucket: "my-bucket".to_string(),
                    phase,
                })
            );
        }
    }

    #[test]
    fn storage_without_bucket_is_unmatched() {
        let event = delivered(STORAGE_FINALIZED, "//storage.googleapis.com/projects/_");
        assert_eq!(correlation_key_for_delivered(&event), None);
    }

    #[test]
    fn audit_log_requires_create_topic_method() {
        let event = delivered(AUDIT_LOG_WRITTEN, "//cloudaudit.googleapis.com/projects/p/logs/activity")
            .with_subject("pubsub.googleapis.com/projects/p/topics/cloudauditlogssource-probe-1")
            .with_extension(METHOD_NAME_EXTENSION, CREATE_TOPIC_METHOD);
        assert_eq!(
            correlation_key_for_delivered(&event),
            Some(CorrelationKey::AuditLogs {
                topic: "cloudauditlogssource-probe-1".to_string()
            })
        );

        let other = event
            .clone()
            .with_extension(METHOD_NAME_EXTENSION, "google.pubsub.v1.Publisher.DeleteTopic");
        assert_eq!(correlation_key_for_delivered(&other), None);
    }

    #[test]
    fn ticks_and_pod_events() {
        assert_eq!(
            correlation_key_for_delivered(&delivered(PING_TICK, "/apis/v1/namespaces/ns/pingsources/p")),
            Some(CorrelationKey::Ping)
        );
        assert_eq!(
            correlation_key_for_delivered(&delivered(SCHEDULER_EXECUTED, "jobs/j")),
            Some(CorrelationKey::Scheduler)
        );
        assert_eq!(
            correlation_key_for_delivered(&delivered(APISERVER_UPDATE, "https://10.0.0.1:443")),
            Some(CorrelationKey::ApiServer {
                phase: ApiServerPhase::Update
            })
        );
    }

    #[test]
    fn unknown_types_are_ignored() {
        assert_eq!(correlation_key_for_delivered(&delivered("com.example.other", "x")), None);
        assert_eq!(correlation_key_for_delivered(&delivered("pingsource-probe", "x")), None);
    }
}
