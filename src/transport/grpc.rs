//! gRPC transport for the probe helper.
//!
//! Envelopes travel as structured-mode CloudEvents JSON bytes, so the gRPC
//! surface accepts exactly what the HTTP listeners accept in structured mode.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

use crate::error::{ExecutionError, ProbeError, TransportError};
use crate::event::binding::{self, MAX_EVENT_BYTES};
use crate::event::Event;
use crate::probe::ProbeHelper;

#[allow(missing_docs, clippy::pedantic)]
pub mod proto {
    tonic::include_proto!("probehelper");
}

use proto::probe_helper_server::{ProbeHelper as ProbeHelperRpc, ProbeHelperServer};

/// gRPC service backed by a shared [`ProbeHelper`].
#[derive(Debug, Clone)]
pub struct ProbeHelperService {
    helper: Arc<ProbeHelper>,
}

impl ProbeHelperService {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn new(helper: Arc<ProbeHelper>) -> Self {
        Self { helper }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn into_server(self) -> ProbeHelperServer<Self> {
        ProbeHelperServer::new(self)
    }
}

fn parse_event(bytes: &[u8]) -> Result<Event, Status> {
    if bytes.is_empty() {
        return Err(Status::invalid_argument("event_json is required"));
    }
    if bytes.len() > MAX_EVENT_BYTES {
        return Err(Status::invalid_argument("event_json exceeds maximum size"));
    }
    binding::decode_structured(bytes).map_err(|e| Status::invalid_argument(e.to_string()))
}

/// Maps a failure that aborts the call to a gRPC status. Ordinary NACKs are
/// reported in-band through `ProbeResponse`.
fn status_from_probe_error(err: &ProbeError) -> Status {
    match err {
        ProbeError::Validation(v) => Status::invalid_argument(v.to_string()),
        ProbeError::Trigger(t) => Status::unavailable(t.to_string()),
        ProbeError::Execution(e) => match e {
            ExecutionError::Timeout { .. } => Status::deadline_exceeded(e.to_string()),
            ExecutionError::Collision { .. } => Status::already_exists(e.to_string()),
            ExecutionError::ShuttingDown => Status::unavailable(e.to_string()),
        },
        ProbeError::Transport(t) => Status::invalid_argument(t.to_string()),
        ProbeError::Internal { message } => Status::internal(message.clone()),
    }
}

#[tonic::async_trait]
impl ProbeHelperRpc for ProbeHelperService {
    async fn probe(
        &self,
        request: Request<proto::ProbeRequest>,
    ) -> Result<Response<proto::ProbeResponse>, Status> {
        let event = parse_event(&request.into_inner().event_json)?;
        let response = match self.helper.handle_probe(event).await {
            Ok(()) => proto::ProbeResponse {
                ack: true,
                reason: String::new(),
            },
            Err(err) if err.is_shutdown() => return Err(status_from_probe_error(&err)),
            Err(err) => proto::ProbeResponse {
                ack: false,
                reason: err.to_string(),
            },
        };
        Ok(Response::new(response))
    }

    async fn deliver(
        &self,
        request: Request<proto::DeliverRequest>,
    ) -> Result<Response<proto::DeliverResponse>, Status> {
        let event = parse_event(&request.into_inner().event_json)?;
        let resolved = self.helper.handle_delivery(&event);
        Ok(Response::new(proto::DeliverResponse { resolved }))
    }

    async fn health(
        &self,
        _request: Request<proto::HealthRequest>,
    ) -> Result<Response<proto::HealthResponse>, Status> {
        let status = self.helper.health();
        Ok(Response::new(proto::HealthResponse {
            healthy: status.healthy,
            since_last_success_ms: u64::try_from(status.since_last_success.as_millis()).unwrap_or(u64::MAX),
        }))
    }
}

/// Serves the gRPC service on an already bound `listener` until `shutdown`
/// fires.
///
/// # Errors
///
/// Returns `TransportError::Listener` if the server fails.
pub async fn serve(
    helper: Arc<ProbeHelper>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<(), TransportError> {
    tonic::transport::Server::builder()
        .add_service(ProbeHelperService::new(helper).into_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown.cancelled_owned())
        .await
        .map_err(|e| TransportError::Listener {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::Clients;
    use crate::config::ProbeHelperConfig;

    fn service() -> ProbeHelperService {
        ProbeHelperService::new(Arc::new(
            ProbeHelper::new(ProbeHelperConfig::default(), Clients::new()).unwrap(),
        ))
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let err = service()
            .probe(Request::new(proto::ProbeRequest { event_json: Vec::new() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn validation_failure_is_an_in_band_nack() {
        let event = Event::new("1", "broker-e2e-delivery-probe", "test");
        let event_json = binding::encode_structured(&event).unwrap();
        let response = service()
            .probe(Request::new(proto::ProbeRequest { event_json }))
            .await
            .unwrap()
            .into_inner();
        assert!(!response.ack);
        assert!(response.reason.contains("namespace"));
    }

    #[tokio::test]
    async fn unmatched_delivery_reports_unresolved() {
        let event = Event::new("1", "com.example.other", "test");
        let event_json = binding::encode_structured(&event).unwrap();
        let response = service()
            .deliver(Request::new(proto::DeliverRequest { event_json }))
            .await
            .unwrap()
            .into_inner();
        assert!(!response.resolved);
    }

    #[tokio::test]
    async fn fresh_helper_is_healthy() {
        let response = service()
            .health(Request::new(proto::HealthRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert!(response.healthy);
    }
}
