//! External collaborators the trigger actions talk to.
//!
//! Each subsystem sits behind an async trait so the helper treats it as a
//! black-box single-call trigger. The `Rest*` implementations speak the
//! subsystem's REST API against a configurable endpoint; tests plug in fakes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TriggerError;
use crate::event::Event;

/// Broker ingress forwarding.
pub mod broker;
/// Orchestration API (pods).
pub mod apiserver;
/// Message bus topics.
pub mod pubsub;
/// Shared REST plumbing.
pub mod rest;
/// Object storage.
pub mod storage;

pub use apiserver::RestApiServerClient;
pub use broker::HttpBrokerIngress;
pub use pubsub::RestPubSubClient;
pub use rest::RestEndpoint;
pub use storage::RestStorageClient;

/// Delivers an event into a broker.
#[async_trait]
pub trait BrokerIngress: Send + Sync {
    /// Sends `event` to the ingress of `namespace/broker`.
    async fn send(&self, namespace: &str, broker: &str, event: &Event) -> Result<(), TriggerError>;
}

/// Publishes to and manages message-bus topics.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Publishes one message carrying `attributes`.
    async fn publish(&self, topic: &str, attributes: &BTreeMap<String, String>) -> Result<(), TriggerError>;

    /// Creates a topic.
    async fn create_topic(&self, topic: &str) -> Result<(), TriggerError>;
}

/// Object mutations in a bucket.
#[allow(missing_docs)]
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn create_object(&self, bucket: &str, object: &str, contents: &[u8]) -> Result<(), TriggerError>;

    async fn update_metadata(
        &self,
        bucket: &str,
        object: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), TriggerError>;

    /// Rewrites the object into the archive storage class.
    async fn archive_object(&self, bucket: &str, object: &str) -> Result<(), TriggerError>;

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), TriggerError>;
}

/// Minimal pod description used by the orchestration-API probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePod {
    #[allow(missing_docs)]
    pub namespace: String,
    #[allow(missing_docs)]
    pub name: String,
    /// Image of the single container.
    pub image: String,
}

/// Pod lifecycle calls against the orchestration API.
#[allow(missing_docs)]
#[async_trait]
pub trait ApiServerClient: Send + Sync {
    async fn create_pod(&self, pod: &ProbePod) -> Result<(), TriggerError>;

    async fn update_pod(&self, pod: &ProbePod) -> Result<(), TriggerError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), TriggerError>;
}

/// The set of collaborators available to the dispatch registry.
///
/// A missing collaborator turns the probes that need it into
/// `TriggerError::NotConfigured` NACKs instead of failing construction.
#[derive(Clone, Default)]
pub struct Clients {
    broker: Option<Arc<dyn BrokerIngress>>,
    pubsub: Option<Arc<dyn PubSubClient>>,
    storage: Option<Arc<dyn StorageClient>>,
    apiserver: Option<Arc<dyn ApiServerClient>>,
}

impl fmt::Debug for Clients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clients")
            .field("broker", &self.broker.is_some())
            .field("pubsub", &self.pubsub.is_some())
            .field("storage", &self.storage.is_some())
            .field("apiserver", &self.apiserver.is_some())
            .finish()
    }
}

impl Clients {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn with_broker(mut self, broker: Arc<dyn BrokerIngress>) -> Self {
        self.broker = Some(broker);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn with_pubsub(mut self, pubsub: Arc<dyn PubSubClient>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageClient>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn with_apiserver(mut self, apiserver: Arc<dyn ApiServerClient>) -> Self {
        self.apiserver = Some(apiserver);
        self
    }

    pub(crate) fn broker(&self) -> Result<&dyn BrokerIngress, TriggerError> {
        self.broker
            .as_deref()
            .ok_or(TriggerError::NotConfigured { collaborator: "broker" })
    }

    pub(crate) fn pubsub(&self) -> Result<&dyn PubSubClient, TriggerError> {
        self.pubsub
            .as_deref()
            .ok_or(TriggerError::NotConfigured { collaborator: "pubsub" })
    }

    pub(crate) fn storage(&self) -> Result<&dyn StorageClient, TriggerError> {
        self.storage
            .as_deref()
            .ok_or(TriggerError::NotConfigured { collaborator: "storage" })
    }

    pub(crate) fn apiserver(&self) -> Result<&dyn ApiServerClient, TriggerError> {
        self.apiserver
            .as_deref()
            .ok_or(TriggerError::NotConfigured { collaborator: "apiserver" })
    }
}
