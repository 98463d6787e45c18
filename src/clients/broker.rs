use async_trait::async_trait;
use reqwest::Method;

use super::rest::{send_checked, RestEndpoint};
use super::BrokerIngress;
use crate::error::TriggerError;
use crate::event::{binding, Event};

const COLLABORATOR: &str = "broker";

/// Forwards events to a broker ingress at `{base}/{namespace}/{broker}` using
/// the binary CloudEvents binding.
#[derive(Debug, Clone)]
pub struct HttpBrokerIngress {
    endpoint: RestEndpoint,
}

impl HttpBrokerIngress {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn new(endpoint: RestEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl BrokerIngress for HttpBrokerIngress {
    async fn send(&self, namespace: &str, broker: &str, event: &Event) -> Result<(), TriggerError> {
        let (headers, body) =
            binding::encode_binary(event).map_err(|e| TriggerError::request_failed(COLLABORATOR, e))?;
        let url = self.endpoint.url(COLLABORATOR, &[namespace, broker])?;
        let request = self.endpoint.request(Method::POST, url).headers(headers).body(body);
        send_checked(COLLABORATOR, request).await?;
        Ok(())
    }
}
