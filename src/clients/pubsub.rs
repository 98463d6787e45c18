use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;

use super::rest::{send_checked, RestEndpoint};
use super::PubSubClient;
use crate::error::TriggerError;

const COLLABORATOR: &str = "pubsub";

#[derive(Serialize)]
struct PublishRequest<'a> {
    messages: [PubsubMessage<'a>; 1],
}

#[derive(Serialize)]
struct PubsubMessage<'a> {
    attributes: &'a BTreeMap<String, String>,
}

/// Pub/Sub REST client (`v1/projects/{project}/topics/...`).
///
/// Works against the real service or the local emulator.
#[derive(Debug, Clone)]
pub struct RestPubSubClient {
    endpoint: RestEndpoint,
    project: String,
}

impl RestPubSubClient {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(endpoint: RestEndpoint, project: impl Into<String>) -> Self {
        Self {
            endpoint,
            project: project.into(),
        }
    }

    fn topic_url(&self, topic_segment: &str) -> Result<reqwest::Url, TriggerError> {
        self.endpoint
            .url(COLLABORATOR, &["v1", "projects", &self.project, "topics", topic_segment])
    }
}

#[async_trait]
impl PubSubClient for RestPubSubClient {
    async fn publish(&self, topic: &str, attributes: &BTreeMap<String, String>) -> Result<(), TriggerError> {
        let url = self.topic_url(&format!("{topic}:publish"))?;
        let body = PublishRequest {
            messages: [PubsubMessage { attributes }],
        };
        let request = self.endpoint.request(Method::POST, url).json(&body);
        send_checked(COLLABORATOR, request).await?;
        Ok(())
    }

    async fn create_topic(&self, topic: &str) -> Result<(), TriggerError> {
        let url = self.topic_url(topic)?;
        let request = self
            .endpoint
            .request(Method::PUT, url)
            .json(&serde_json::json!({}));
        send_checked(COLLABORATOR, request).await?;
        Ok(())
    }
}
