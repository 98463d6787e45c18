//! Configuration for the probe helper.
//!
//! [`ProbeHelperConfig`] is what the library needs to build a
//! [`ProbeHelper`](crate::ProbeHelper). [`ServerConfig`] is the flag/env
//! surface of the server binary and knows how to turn itself into a helper
//! config plus the collaborator clients.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::clients::{
    Clients, HttpBrokerIngress, RestApiServerClient, RestEndpoint, RestPubSubClient, RestStorageClient,
};
use crate::error::ValidationError;
use crate::probe::{DeadlinePolicy, PodTarget};
use crate::time::parse_duration;

/// Service-level knobs of the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHelperConfig {
    /// Maximum age of the last successful round trip before the helper
    /// reports itself unhealthy.
    pub liveness_stale_duration: Duration,
    /// Wait bound when a probe carries no usable `timeout`.
    pub default_timeout: Duration,
    /// Upper clamp on any requested `timeout`.
    pub max_timeout: Duration,
    /// How often the pending table drops entries past their deadline.
    pub sweep_interval: Duration,
    /// Where orchestration-API probes create their pod.
    pub pods: PodTarget,
}

impl Default for ProbeHelperConfig {
    fn default() -> Self {
        Self {
            liveness_stale_duration: Duration::from_secs(5 * 60),
            default_timeout: Duration::from_secs(2 * 60),
            max_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(1),
            pods: PodTarget::default(),
        }
    }
}

impl ProbeHelperConfig {
    /// Checks the relations between the durations.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the default timeout exceeds the maximum or
    /// if the stale duration or sweep interval is zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_timeout > self.max_timeout {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "default timeout {} exceeds max timeout {}",
                    humantime::format_duration(self.default_timeout),
                    humantime::format_duration(self.max_timeout)
                ),
            });
        }
        if self.liveness_stale_duration.is_zero() {
            return Err(ValidationError::InvalidConfig {
                reason: "liveness stale duration must be positive".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ValidationError::InvalidConfig {
                reason: "sweep interval must be positive".to_string(),
            });
        }
        if self.pods.namespace.is_empty() || self.pods.name.is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "pod namespace and name must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// The deadline policy derived from the timeouts.
    #[must_use]
    pub const fn deadline_policy(&self) -> DeadlinePolicy {
        DeadlinePolicy {
            default_timeout: self.default_timeout,
            max_timeout: self.max_timeout,
        }
    }
}

fn duration_arg(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).map_err(|e| e.to_string())
}

/// Flags and environment of the `probe-helper` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "probe-helper", version, about = "Synthetic round-trip prober for the event delivery platform")]
pub struct ServerConfig {
    /// Address both listeners bind to.
    #[arg(long, env = "BIND_ADDRESS", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_address: IpAddr,

    /// Port of the probe listener.
    #[arg(long, env = "PROBE_PORT", default_value_t = 8070)]
    pub probe_port: u16,

    /// Port of the receiver listener (also serves `/healthz`).
    #[arg(long, env = "RECEIVER_PORT", default_value_t = 8080)]
    pub receiver_port: u16,

    /// Port of the gRPC service; disabled when unset.
    #[arg(long, env = "GRPC_PORT")]
    pub grpc_port: Option<u16>,

    /// Base URL of the broker ingress; events go to `{url}/{namespace}/{broker}`.
    #[arg(long, env = "BROKER_INGRESS_URL")]
    pub broker_ingress_url: Option<String>,

    /// Cloud project owning the probe topics; enables the pub/sub client.
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: Option<String>,

    #[arg(long, env = "PUBSUB_ENDPOINT", default_value = "https://pubsub.googleapis.com")]
    #[allow(missing_docs)]
    pub pubsub_endpoint: String,

    /// Object storage endpoint; the storage client is disabled when unset.
    #[arg(long, env = "STORAGE_ENDPOINT")]
    pub storage_endpoint: Option<String>,

    /// Orchestration API endpoint, e.g. a `kubectl proxy` address.
    #[arg(long, env = "K8S_API_ENDPOINT")]
    pub k8s_api_endpoint: Option<String>,

    /// Namespace the probe pod lives in.
    #[arg(long, env = "K8S_NAMESPACE", default_value = "default")]
    pub k8s_namespace: String,

    /// Base name of the probe pod.
    #[arg(long, env = "PROBE_POD_NAME", default_value = "apiserversource-probe-pod")]
    pub probe_pod_name: String,

    /// Bearer token for the cloud APIs.
    #[arg(long, env = "CLOUD_ACCESS_TOKEN", hide_env_values = true)]
    pub cloud_access_token: Option<String>,

    /// Bearer token for the orchestration API.
    #[arg(long, env = "K8S_TOKEN", hide_env_values = true)]
    pub k8s_token: Option<String>,

    #[arg(long, env = "LIVENESS_STALE_DURATION", default_value = "5m", value_parser = duration_arg)]
    #[allow(missing_docs)]
    pub liveness_stale_duration: Duration,

    #[arg(long, env = "DEFAULT_TIMEOUT", default_value = "2m", value_parser = duration_arg)]
    #[allow(missing_docs)]
    pub default_timeout: Duration,

    #[arg(long, env = "MAX_TIMEOUT", default_value = "30m", value_parser = duration_arg)]
    #[allow(missing_docs)]
    pub max_timeout: Duration,

    #[arg(long, env = "SWEEP_INTERVAL", default_value = "1s", value_parser = duration_arg)]
    #[allow(missing_docs)]
    pub sweep_interval: Duration,

    /// Timeout of a single collaborator request.
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "30s", value_parser = duration_arg)]
    pub request_timeout: Duration,
}

impl ServerConfig {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn probe_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.probe_port)
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn receiver_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.receiver_port)
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn grpc_addr(&self) -> Option<SocketAddr> {
        self.grpc_port.map(|port| SocketAddr::new(self.bind_address, port))
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn helper_config(&self) -> ProbeHelperConfig {
        ProbeHelperConfig {
            liveness_stale_duration: self.liveness_stale_duration,
            default_timeout: self.default_timeout,
            max_timeout: self.max_timeout,
            sweep_interval: self.sweep_interval,
            pods: PodTarget {
                namespace: self.k8s_namespace.clone(),
                name: self.probe_pod_name.clone(),
            },
        }
    }

    /// Builds a client for every collaborator whose endpoint is configured.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a configured endpoint URL is unusable.
    pub fn build_clients(&self) -> Result<Clients, ValidationError> {
        let mut clients = Clients::new();

        if let Some(url) = &self.broker_ingress_url {
            let endpoint = RestEndpoint::new(url, None, self.request_timeout)?;
            clients = clients.with_broker(Arc::new(HttpBrokerIngress::new(endpoint)));
        }
        if let Some(project) = &self.project_id {
            let endpoint = RestEndpoint::new(
                &self.pubsub_endpoint,
                self.cloud_access_token.clone(),
                self.request_timeout,
            )?;
            clients = clients.with_pubsub(Arc::new(RestPubSubClient::new(endpoint, project.clone())));
        }
        if let Some(url) = &self.storage_endpoint {
            let endpoint = RestEndpoint::new(url, self.cloud_access_token.clone(), self.request_timeout)?;
            clients = clients.with_storage(Arc::new(RestStorageClient::new(endpoint)));
        }
        if let Some(url) = &self.k8s_api_endpoint {
            let endpoint = RestEndpoint::new(url, self.k8s_token.clone(), self.request_timeout)?;
            clients = clients.with_apiserver(Arc::new(RestApiServerClient::new(endpoint)));
        }

        Ok(clients)
    }
}
