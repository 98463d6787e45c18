use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value as JsonValue};

use super::rest::{send_checked, RestEndpoint};
use super::{ApiServerClient, ProbePod};
use crate::error::TriggerError;

const COLLABORATOR: &str = "apiserver";

/// Core `v1` pods API client, usually pointed at `kubectl proxy` or the
/// in-cluster API server with a service-account token.
#[derive(Debug, Clone)]
pub struct RestApiServerClient {
    endpoint: RestEndpoint,
}

impl RestApiServerClient {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn new(endpoint: RestEndpoint) -> Self {
        Self { endpoint }
    }

    fn pods_url(&self, namespace: &str, name: Option<&str>) -> Result<reqwest::Url, TriggerError> {
        let mut segments = vec!["api", "v1", "namespaces", namespace, "pods"];
        segments.extend(name);
        self.endpoint.url(COLLABORATOR, &segments)
    }
}

/// Manifest for a single-container pod named after the probe.
pub(crate) fn pod_manifest(pod: &ProbePod) -> JsonValue {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": pod.name,
            "namespace": pod.namespace,
        },
        "spec": {
            "containers": [{
                "name": "busybox",
                "image": pod.image,
            }],
            "restartPolicy": "Never",
        },
    })
}

#[async_trait]
impl ApiServerClient for RestApiServerClient {
    async fn create_pod(&self, pod: &ProbePod) -> Result<(), TriggerError> {
        let url = self.pods_url(&pod.namespace, None)?;
        let request = self.endpoint.request(Method::POST, url).json(&pod_manifest(pod));
        send_checked(COLLABORATOR, request).await?;
        Ok(())
    }

    async fn update_pod(&self, pod: &ProbePod) -> Result<(), TriggerError> {
        let url = self.pods_url(&pod.namespace, Some(&pod.name))?;
        let request = self
            .endpoint
            .request(Method::PATCH, url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/strategic-merge-patch+json",
            )
            .body(pod_manifest(pod).to_string());
        send_checked(COLLABORATOR, request).await?;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), TriggerError> {
        let url = self.pods_url(namespace, Some(name))?;
        send_checked(COLLABORATOR, self.endpoint.request(Method::DELETE, url)).await?;
        Ok(())
    }
}
