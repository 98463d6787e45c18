//! HTTP listeners end to end over ephemeral ports.
//!
//! Probe requests go to the probe listener in binary or structured mode; a
//! fake broker ingress (axum) forwards what the helper sends it back to the
//! receiver listener, closing the loop the way the platform would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use serde_json::Value as JsonValue;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use probe_helper::clients::{HttpBrokerIngress, RestEndpoint};
use probe_helper::event::binding;
use probe_helper::transport::http;
use probe_helper::{Clients, Event, ProbeHelper, ProbeHelperConfig};

struct Stack {
    probe_url: String,
    receiver_url: String,
    helper: Arc<ProbeHelper>,
    client: reqwest::Client,
    cancel: CancellationToken,
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[derive(Clone)]
struct BrokerState {
    receiver_url: String,
    client: reqwest::Client,
}

/// Fake broker ingress: only `test-namespace/default` exists.
async fn broker_ingress(
    State(state): State<BrokerState>,
    Path((namespace, broker)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if namespace != "test-namespace" || broker != "default" {
        return StatusCode::NOT_FOUND;
    }
    let Ok(event) = binding::decode_http(&headers, &body) else {
        return StatusCode::BAD_REQUEST;
    };
    let Ok((headers, body)) = binding::encode_binary(&event) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };
    let client = state.client.clone();
    let target = state.receiver_url.clone();
    tokio::spawn(async move {
        let _ = client.post(target).headers(headers).body(body).send().await;
    });
    StatusCode::ACCEPTED
}

async fn start(config: ProbeHelperConfig) -> Stack {
    let cancel = CancellationToken::new();
    let client = reqwest::Client::new();

    let (probe_listener, probe_addr) = listen().await;
    let (receiver_listener, receiver_addr) = listen().await;
    let (broker_listener, broker_addr) = listen().await;
    let receiver_url = format!("http://{receiver_addr}");

    let broker = Router::new()
        .route("/:namespace/:broker", post(broker_ingress))
        .with_state(BrokerState {
            receiver_url: format!("{receiver_url}/probe-target"),
            client: client.clone(),
        });
    tokio::spawn(http::serve(broker_listener, broker, cancel.clone()));

    let endpoint = RestEndpoint::new(
        &format!("http://{broker_addr}"),
        None,
        Duration::from_secs(5),
    )
    .unwrap();
    let clients = Clients::new().with_broker(Arc::new(HttpBrokerIngress::new(endpoint)));
    let helper = Arc::new(ProbeHelper::new(config, clients).unwrap());

    tokio::spawn(http::serve(
        probe_listener,
        http::probe_router(Arc::clone(&helper)),
        cancel.clone(),
    ));
    tokio::spawn(http::serve(
        receiver_listener,
        http::receiver_router(Arc::clone(&helper)),
        cancel.clone(),
    ));

    Stack {
        probe_url: format!("http://{probe_addr}"),
        receiver_url,
        helper,
        client,
        cancel,
    }
}

impl Stack {
    async fn send_binary(&self, url: &str, event: &Event) -> reqwest::Response {
        let (headers, body) = binding::encode_binary(event).unwrap();
        self.client.post(url).headers(headers).body(body).send().await.unwrap()
    }

    async fn probe(&self, event: &Event) -> (StatusCode, JsonValue) {
        let response = self.send_binary(&self.probe_url, event).await;
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn health(&self) -> StatusCode {
        self.client
            .get(format!("{}{}", self.receiver_url, http::HEALTH_PATH))
            .send()
            .await
            .unwrap()
            .status()
    }
}

fn broker_probe() -> Event {
    Event::with_random_id("broker-e2e-delivery-probe", "http-e2e").with_extension("namespace", "test-namespace")
}

#[tokio::test]
async fn broker_round_trip_acks() {
    let stack = start(ProbeHelperConfig::default()).await;
    let (status, body) = stack.probe(&broker_probe()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "ACK");
    assert!(stack.helper.pending().is_empty());
}

#[tokio::test]
async fn structured_mode_probe_acks() {
    let stack = start(ProbeHelperConfig::default()).await;
    let event = broker_probe().with_extension("broker", "default");
    let response = stack
        .client
        .post(&stack.probe_url)
        .header(reqwest::header::CONTENT_TYPE, binding::STRUCTURED_CONTENT_TYPE)
        .body(binding::encode_structured(&event).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_broker_is_a_bad_gateway() {
    let stack = start(ProbeHelperConfig::default()).await;
    let (status, body) = stack
        .probe(&broker_probe().with_extension("broker", "wrongbroker"))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["result"], "NACK");
    assert!(body["reason"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn validation_failures_are_bad_requests() {
    let stack = start(ProbeHelperConfig::default()).await;

    let missing_namespace = Event::with_random_id("broker-e2e-delivery-probe", "http-e2e");
    let (status, body) = stack.probe(&missing_namespace).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["reason"].as_str().unwrap().contains("namespace"));

    let unknown = Event::with_random_id("unrecognized-probe-type", "http-e2e");
    assert_eq!(stack.probe(&unknown).await.0, StatusCode::BAD_REQUEST);

    let response = stack
        .client
        .post(&stack.probe_url)
        .header("ce-type", "pingsource-probe")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_delivery_is_a_gateway_timeout() {
    let stack = start(ProbeHelperConfig::default()).await;
    let ping = Event::with_random_id("pingsource-probe", "http-e2e").with_extension("period", "300ms");
    let (status, body) = stack.probe(&ping).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["result"], "NACK");
    assert!(stack.helper.pending().is_empty());
}

#[tokio::test]
async fn receiver_accepts_anything() {
    let stack = start(ProbeHelperConfig::default()).await;

    let unrelated = Event::with_random_id("com.example.unrelated", "elsewhere");
    let response = stack
        .send_binary(&format!("{}/any/path", stack.receiver_url), &unrelated)
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let garbage = stack
        .client
        .post(&stack.receiver_url)
        .body("not an event")
        .send()
        .await
        .unwrap();
    assert_eq!(garbage.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn health_follows_round_trips() {
    let stack = start(ProbeHelperConfig {
        liveness_stale_duration: Duration::from_millis(300),
        ..ProbeHelperConfig::default()
    })
    .await;
    assert_eq!(stack.health().await, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(stack.health().await, StatusCode::SERVICE_UNAVAILABLE);

    // A ping probe resolved by a tick posted to the receiver.
    let probe = {
        let ping = Event::with_random_id("pingsource-probe", "http-e2e").with_extension("period", "5s");
        let client = stack.client.clone();
        let url = stack.probe_url.clone();
        let (headers, body) = binding::encode_binary(&ping).unwrap();
        tokio::spawn(async move { client.post(url).headers(headers).body(body).send().await })
    };
    while stack.helper.pending().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let tick = Event::with_random_id("dev.knative.sources.ping", "/apis/v1/namespaces/ns/pingsources/p");
    assert_eq!(
        stack.send_binary(&stack.receiver_url, &tick).await.status(),
        StatusCode::ACCEPTED
    );

    let response = probe.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(stack.health().await, StatusCode::OK);
}

#[tokio::test]
async fn shutdown_answers_blocked_probes_with_unavailable() {
    let stack = start(ProbeHelperConfig::default()).await;
    let probe = {
        let ping = Event::with_random_id("pingsource-probe", "http-e2e").with_extension("period", "1m");
        let client = stack.client.clone();
        let url = stack.probe_url.clone();
        let (headers, body) = binding::encode_binary(&ping).unwrap();
        tokio::spawn(async move { client.post(url).headers(headers).body(body).send().await })
    };
    while stack.helper.pending().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    stack.helper.shutdown();
    let response = probe.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
