//! Dispatch registry: per-kind validation, deadline policy and triggers.
//!
//! A probe request is admitted in one pure step ([`DispatchRegistry::admit`])
//! that validates its extensions, derives the correlation key and computes
//! how long to wait. Only an admitted probe is ever triggered, so a request
//! that fails validation has no side effect.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::clients::{Clients, ProbePod};
use crate::error::{TriggerError, ValidationError};
use crate::event::Event;
use crate::time::parse_duration;

use super::key::CorrelationKey;
use super::kind::{ApiServerPhase, ProbeKind, StoragePhase};

/// Namespace of the broker to probe.
pub const NAMESPACE_EXTENSION: &str = "namespace";
/// Name of the broker to probe.
pub const BROKER_EXTENSION: &str = "broker";
/// Broker used when the `broker` extension is absent.
pub const DEFAULT_BROKER: &str = "default";
#[allow(missing_docs)]
pub const TOPIC_EXTENSION: &str = "topic";
#[allow(missing_docs)]
pub const BUCKET_EXTENSION: &str = "bucket";
/// Tick period of a periodic source.
pub const PERIOD_EXTENSION: &str = "period";
/// Per-request wait bound.
pub const TIMEOUT_EXTENSION: &str = "timeout";

/// Prefix of the topics created by audit-log probes.
pub const AUDIT_TOPIC_PREFIX: &str = "cloudauditlogssource-probe-";
/// Metadata written by the update-metadata storage phase.
pub const STORAGE_METADATA: (&str, &str) = ("some-key", "Metadata updated!");
/// Attribute carrying the probe id on published messages.
pub const PROBE_ID_ATTRIBUTE: &str = "probe-id";

const CREATE_IMAGE: &str = "busybox";
const UPDATE_IMAGE: &str = "alpine";

/// How long a probe may wait for its delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlinePolicy {
    /// Used when `timeout` is absent or unparsable.
    pub default_timeout: Duration,
    /// Upper clamp for any requested `timeout`.
    pub max_timeout: Duration,
}

impl DeadlinePolicy {
    /// The wait bound requested by `event`, before any period bound.
    #[must_use]
    pub fn timeout_for(&self, event: &Event) -> Duration {
        let Some(raw) = event.extension(TIMEOUT_EXTENSION) else {
            return self.default_timeout;
        };
        match parse_duration(raw) {
            Ok(requested) => requested.min(self.max_timeout),
            Err(err) => {
                debug!(timeout = raw, error = %err, "ignoring unusable timeout extension");
                self.default_timeout
            }
        }
    }
}

/// Where orchestration-API probes create their pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTarget {
    #[allow(missing_docs)]
    pub namespace: String,
    /// Base pod name; the probe id is appended to it.
    pub name: String,
}

impl Default for PodTarget {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            name: "apiserversource-probe-pod".to_string(),
        }
    }
}

/// A validated probe request.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Broker {
        namespace: String,
        broker: String,
    },
    PubSub {
        topic: String,
    },
    Storage {
        bucket: String,
        object: String,
        phase: StoragePhase,
    },
    Scheduler {
        period: Option<Duration>,
    },
    Ping {
        period: Duration,
    },
    ApiServer {
        namespace: String,
        pod: String,
        phase: ApiServerPhase,
    },
    AuditLogs {
        topic: String,
    },
}

impl Probe {
    /// Validates the extensions `kind` requires on `event`.
    ///
    /// # Errors
    ///
    /// Returns `MissingExtension` or `InvalidExtension` naming the offending
    /// attribute.
    pub fn validate(kind: ProbeKind, event: &Event, pods: &PodTarget) -> Result<Self, ValidationError> {
        let probe = match kind {
            ProbeKind::BrokerDelivery => Self::Broker {
                namespace: required(event, NAMESPACE_EXTENSION)?.to_string(),
                broker: event
                    .non_empty_extension(BROKER_EXTENSION)
                    .unwrap_or(DEFAULT_BROKER)
                    .to_string(),
            },
            ProbeKind::PubSubSource => Self::PubSub {
                topic: required(event, TOPIC_EXTENSION)?.to_string(),
            },
            ProbeKind::StorageSource(phase) => Self::Storage {
                bucket: required(event, BUCKET_EXTENSION)?.to_string(),
                object: event.id.clone(),
                phase,
            },
            ProbeKind::SchedulerSource => Self::Scheduler {
                period: match event.non_empty_extension(PERIOD_EXTENSION) {
                    Some(raw) => Some(duration_extension(PERIOD_EXTENSION, raw)?),
                    None => None,
                },
            },
            ProbeKind::PingSource => Self::Ping {
                period: duration_extension(PERIOD_EXTENSION, required(event, PERIOD_EXTENSION)?)?,
            },
            ProbeKind::ApiServerSource(phase) => Self::ApiServer {
                namespace: pods.namespace.clone(),
                pod: format!("{}.{}", pods.name, event.id),
                phase,
            },
            ProbeKind::AuditLogsSource => Self::AuditLogs {
                topic: format!("{AUDIT_TOPIC_PREFIX}{}", Uuid::new_v4().simple()),
            },
        };
        Ok(probe)
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn kind(&self) -> ProbeKind {
        match self {
            Self::Broker { .. } => ProbeKind::BrokerDelivery,
            Self::PubSub { .. } => ProbeKind::PubSubSource,
            Self::Storage { phase, .. } => ProbeKind::StorageSource(*phase),
            Self::Scheduler { .. } => ProbeKind::SchedulerSource,
            Self::Ping { .. } => ProbeKind::PingSource,
            Self::ApiServer { phase, .. } => ProbeKind::ApiServerSource(*phase),
            Self::AuditLogs { .. } => ProbeKind::AuditLogsSource,
        }
    }

    /// The key the delivered event for this probe will carry.
    #[must_use]
    pub fn correlation_key(&self) -> CorrelationKey {
        match self {
            Self::Broker { namespace, broker } => CorrelationKey::Broker {
                namespace: namespace.clone(),
                broker: broker.clone(),
            },
            Self::PubSub { topic } => CorrelationKey::PubSub { topic: topic.clone() },
            Self::Storage { bucket, phase, .. } => CorrelationKey::Storage {
                bucket: bucket.clone(),
                phase: *phase,
            },
            Self::Scheduler { .. } => CorrelationKey::Scheduler,
            Self::Ping { .. } => CorrelationKey::Ping,
            Self::ApiServer { phase, .. } => CorrelationKey::ApiServer { phase: *phase },
            Self::AuditLogs { topic } => CorrelationKey::AuditLogs { topic: topic.clone() },
        }
    }

    /// Tick period bounding the wait of periodic kinds.
    #[must_use]
    pub const fn period(&self) -> Option<Duration> {
        match self {
            Self::Scheduler { period } => *period,
            Self::Ping { period } => Some(*period),
            _ => None,
        }
    }
}

fn required<'a>(event: &'a Event, extension: &str) -> Result<&'a str, ValidationError> {
    event
        .non_empty_extension(extension)
        .ok_or_else(|| ValidationError::MissingExtension {
            extension: extension.to_string(),
        })
}

fn duration_extension(extension: &str, raw: &str) -> Result<Duration, ValidationError> {
    parse_duration(raw).map_err(|err| ValidationError::InvalidExtension {
        extension: extension.to_string(),
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

/// An admitted probe: validated, keyed and bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    #[allow(missing_docs)]
    pub probe: Probe,
    #[allow(missing_docs)]
    pub key: CorrelationKey,
    /// Effective wait bound; zero means the probe is already expired.
    pub wait: Duration,
}

/// Fixed table from probe kind to validator, key extractor and trigger.
#[derive(Debug, Clone)]
pub struct DispatchRegistry {
    clients: Clients,
    policy: DeadlinePolicy,
    pods: PodTarget,
}

impl DispatchRegistry {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn new(clients: Clients, policy: DeadlinePolicy, pods: PodTarget) -> Self {
        Self { clients, policy, pods }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn policy(&self) -> &DeadlinePolicy {
        &self.policy
    }

    /// Validates `event` and computes its key and wait bound.
    ///
    /// # Errors
    ///
    /// `UnrecognizedKind` for an unknown `type`, otherwise whatever
    /// [`Probe::validate`] reports.
    pub fn admit(&self, event: &Event) -> Result<Admission, ValidationError> {
        let kind: ProbeKind = event.kind.parse()?;
        let probe = Probe::validate(kind, event, &self.pods)?;
        let mut wait = self.policy.timeout_for(event);
        if let Some(period) = probe.period() {
            wait = wait.min(period);
        }
        Ok(Admission {
            key: probe.correlation_key(),
            probe,
            wait,
        })
    }

    /// Performs the single externally visible effect of `probe`.
    ///
    /// Periodic kinds have nothing to trigger and return immediately.
    ///
    /// # Errors
    ///
    /// Returns the collaborator's failure, or `NotConfigured` if the
    /// collaborator the kind needs is absent.
    pub async fn trigger(&self, probe: &Probe, event: &Event) -> Result<(), TriggerError> {
        match probe {
            Probe::Broker { namespace, broker } => {
                self.clients.broker()?.send(namespace, broker, event).await
            }
            Probe::PubSub { topic } => {
                let mut attributes = BTreeMap::new();
                attributes.insert(PROBE_ID_ATTRIBUTE.to_string(), event.id.clone());
                self.clients.pubsub()?.publish(topic, &attributes).await
            }
            Probe::Storage { bucket, object, phase } => {
                let storage = self.clients.storage()?;
                match phase {
                    StoragePhase::Create => storage.create_object(bucket, object, event.id.as_bytes()).await,
                    StoragePhase::UpdateMetadata => {
                        let (name, value) = STORAGE_METADATA;
                        let metadata = BTreeMap::from([(name.to_string(), value.to_string())]);
                        storage.update_metadata(bucket, object, &metadata).await
                    }
                    StoragePhase::Archive => storage.archive_object(bucket, object).await,
                    StoragePhase::Delete => storage.delete_object(bucket, object).await,
                }
            }
            Probe::Scheduler { .. } | Probe::Ping { .. } => Ok(()),
            Probe::ApiServer { namespace, pod, phase } => {
                let apiserver = self.clients.apiserver()?;
                let probe_pod = |image: &str| ProbePod {
                    namespace: namespace.clone(),
                    name: pod.clone(),
                    image: image.to_string(),
                };
                match phase {
                    ApiServerPhase::Create => apiserver.create_pod(&probe_pod(CREATE_IMAGE)).await,
                    ApiServerPhase::Update => apiserver.update_pod(&probe_pod(UPDATE_IMAGE)).await,
                    ApiServerPhase::Delete => apiserver.delete_pod(namespace, pod).await,
                }
            }
            Probe::AuditLogs { topic } => self.clients.pubsub()?.create_topic(topic).await,
        }
    }
}
