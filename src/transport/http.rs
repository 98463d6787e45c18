//! HTTP listeners.
//!
//! - probe listener: any path; answers once the round trip is known
//!   (`200` ACK, non-2xx NACK)
//! - receiver listener: any path accepts delivered events with `202`;
//!   `GET /healthz` reports liveness

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ExecutionError, ProbeError, TransportError};
use crate::event::binding;
use crate::probe::ProbeHelper;

/// Route of the health endpoint on the receiver listener.
pub const HEALTH_PATH: &str = "/healthz";

#[derive(Debug, Serialize)]
struct ProbeReply {
    result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthReply {
    healthy: bool,
    since_last_success_ms: u64,
    stale_duration_ms: u64,
}

/// Maps a NACK cause to the probe listener's response status.
#[must_use]
pub fn status_for(err: &ProbeError) -> StatusCode {
    match err {
        ProbeError::Validation(_) => StatusCode::BAD_REQUEST,
        ProbeError::Trigger(_) => StatusCode::BAD_GATEWAY,
        ProbeError::Execution(e) => match e {
            ExecutionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ExecutionError::Collision { .. } => StatusCode::CONFLICT,
            ExecutionError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        },
        ProbeError::Transport(TransportError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        ProbeError::Transport(TransportError::Listener { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        ProbeError::Transport(_) => StatusCode::BAD_REQUEST,
        ProbeError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn nack(err: &ProbeError) -> Response {
    let reply = ProbeReply {
        result: "NACK",
        reason: Some(err.to_string()),
    };
    (status_for(err), Json(reply)).into_response()
}

async fn probe(State(helper): State<Arc<ProbeHelper>>, headers: HeaderMap, body: Bytes) -> Response {
    let event = match binding::decode_http(&headers, &body) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "undecodable probe request");
            return nack(&ProbeError::from(err));
        }
    };

    match helper.handle_probe(event).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ProbeReply {
                result: "ACK",
                reason: None,
            }),
        )
            .into_response(),
        Err(err) => nack(&err),
    }
}

async fn receive(State(helper): State<Arc<ProbeHelper>>, headers: HeaderMap, body: Bytes) -> StatusCode {
    match binding::decode_http(&headers, &body) {
        Ok(event) => {
            helper.handle_delivery(&event);
        }
        Err(err) => debug!(error = %err, "ignoring undecodable delivered event"),
    }
    StatusCode::ACCEPTED
}

async fn health(State(helper): State<Arc<ProbeHelper>>) -> Response {
    let status = helper.health();
    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let reply = HealthReply {
        healthy: status.healthy,
        since_last_success_ms: u64::try_from(status.since_last_success.as_millis()).unwrap_or(u64::MAX),
        stale_duration_ms: u64::try_from(status.stale_duration.as_millis()).unwrap_or(u64::MAX),
    };
    (code, Json(reply)).into_response()
}

/// Router of the probe listener.
pub fn probe_router(helper: Arc<ProbeHelper>) -> Router {
    Router::new().fallback(probe).with_state(helper)
}

/// Router of the receiver listener, including the health endpoint.
pub fn receiver_router(helper: Arc<ProbeHelper>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .fallback(receive)
        .with_state(helper)
}

/// Serves `router` on `listener` until `shutdown` fires.
///
/// # Errors
///
/// Returns `TransportError::Listener` if the server fails.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> Result<(), TransportError> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| TransportError::Listener {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TriggerError, ValidationError};
    use crate::probe::CorrelationKey;

    #[test]
    fn nack_statuses() {
        let cases: Vec<(ProbeError, StatusCode)> = vec![
            (
                ValidationError::UnrecognizedKind { kind: "x".to_string() }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                TriggerError::NotConfigured { collaborator: "broker" }.into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ExecutionError::Timeout {
                    key: CorrelationKey::Ping,
                    waited_ms: 0,
                }
                .into(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ExecutionError::Collision {
                    key: CorrelationKey::Scheduler,
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (ExecutionError::ShuttingDown.into(), StatusCode::SERVICE_UNAVAILABLE),
            (
                TransportError::MalformedEvent {
                    message: "missing id".to_string(),
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                TransportError::PayloadTooLarge { actual: 2, limit: 1 }.into(),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(status_for(&err), expected, "{err}");
        }
    }

    #[test]
    fn ack_reply_omits_reason() {
        let reply = ProbeReply {
            result: "ACK",
            reason: None,
        };
        assert_eq!(serde_json::to_string(&reply).unwrap(), r#"{"result":"ACK"}"#);
    }
}
