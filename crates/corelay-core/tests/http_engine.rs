//! ---
//! corelay_section: "04-relay-core"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "HTTP engine calls against a local axum server."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use corelay_common::{AppConfig, EngineBodyStyle};
use corelay_core::{EngineRequest, ExecutionEngine, HttpEngine, Relay};
use corelay_msg::{FailureKind, OperationResult, Parameters, RequestId};
use serde_json::{json, Value as JsonValue};
use url::Url;

#[derive(Clone, Default)]
struct Seen {
    calls: Arc<Mutex<Vec<(Option<String>, JsonValue)>>>,
}

impl Seen {
    fn last(&self) -> (Option<String>, JsonValue) {
        self.calls.lock().unwrap().last().cloned().expect("a call")
    }
}

async fn answer(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> (StatusCode, String) {
    let authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    seen.calls.lock().unwrap().push((authorization, body.clone()));

    let operation = body
        .get("operation")
        .or_else(|| body.get("query"))
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_owned();
    match operation.as_str() {
        "login" => (
            StatusCode::OK,
            json!({"data": {"login": {"token": "t-1"}}}).to_string(),
        ),
        "crash" => (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_owned()),
        "getUsers" => (
            StatusCode::OK,
            json!({"data": null, "errors": [{"message": "Not authorised"}]}).to_string(),
        ),
        "garbled" => (StatusCode::OK, "<html>".to_owned()),
        "sleepy" => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            (StatusCode::OK, "{}".to_owned())
        }
        _ => (StatusCode::OK, json!({"data": {"echo": body}}).to_string()),
    }
}

async fn serve() -> (SocketAddr, Seen) {
    let seen = Seen::default();
    let router = Router::new()
        .route("/", post(answer))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (addr, seen)
}

fn engine(addr: SocketAddr, timeout: Duration, style: EngineBodyStyle) -> HttpEngine {
    let endpoint = Url::parse(&format!("http://{addr}/")).unwrap();
    HttpEngine::new(endpoint, timeout, style).unwrap()
}

async fn call(
    engine: &HttpEngine,
    operation: &str,
    credential: Option<&str>,
) -> Result<JsonValue, corelay_core::EngineError> {
    let id = RequestId::from("r-http");
    let mut parameters = Parameters::new();
    parameters.insert("email".into(), json!("a@b.com"));
    engine
        .execute(EngineRequest {
            request_id: &id,
            operation,
            parameters: &parameters,
            credential,
        })
        .await
}

#[tokio::test]
async fn successful_call_returns_payload_and_sends_credential() {
    let (addr, seen) = serve().await;
    let engine = engine(addr, Duration::from_secs(5), EngineBodyStyle::Relay);

    let payload = call(&engine, "login", Some("tok-9")).await.unwrap();
    assert_eq!(payload, json!({"data": {"login": {"token": "t-1"}}}));

    let (authorization, body) = seen.last();
    assert_eq!(authorization.as_deref(), Some("Bearer tok-9"));
    assert_eq!(
        body,
        json!({"operation": "login", "parameters": {"email": "a@b.com"}})
    );
}

#[tokio::test]
async fn missing_credential_sends_no_authorization_header() {
    let (addr, seen) = serve().await;
    let engine = engine(addr, Duration::from_secs(5), EngineBodyStyle::Graphql);

    call(&engine, "login", None).await.unwrap();
    let (authorization, body) = seen.last();
    assert!(authorization.is_none());
    assert_eq!(body["query"], json!("login"));
    assert_eq!(body["variables"]["email"], json!("a@b.com"));
}

#[tokio::test]
async fn engine_failures_become_engine_errors() {
    let (addr, _seen) = serve().await;
    let engine = engine(addr, Duration::from_secs(5), EngineBodyStyle::Relay);

    let err = call(&engine, "crash", None).await.unwrap_err();
    assert!(err.message().starts_with("engine returned 500"));
    assert!(err.message().ends_with("boom"));

    let err = call(&engine, "getUsers", Some("tok")).await.unwrap_err();
    assert_eq!(err.message(), "Not authorised");

    let err = call(&engine, "garbled", None).await.unwrap_err();
    assert!(err.message().starts_with("engine returned invalid JSON"));
}

#[tokio::test]
async fn slow_engine_is_cut_off_by_the_client_timeout() {
    let (addr, _seen) = serve().await;
    let engine = engine(addr, Duration::from_millis(200), EngineBodyStyle::Relay);

    let err = call(&engine, "sleepy", None).await.unwrap_err();
    assert!(err.message().starts_with("engine timed out"), "{err}");
}

#[tokio::test]
async fn unreachable_engine_is_reported() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let engine = engine(addr, Duration::from_secs(2), EngineBodyStyle::Relay);

    let err = call(&engine, "login", None).await.unwrap_err();
    assert!(err.message().starts_with("engine"), "{err}");
}

#[tokio::test]
async fn relay_round_trip_through_http_engine() {
    let (addr, seen) = serve().await;
    let config: AppConfig = format!(
        r#"
[engine]
endpoint = "http://{addr}/"
timeout_secs = 5

[submitter]
attempts = 40
delay_ms = 50
"#
    )
    .parse()
    .unwrap();
    let engine = Arc::new(HttpEngine::from_config(&config.engine).unwrap());
    let relay = Relay::in_memory(&config, engine).await.unwrap();
    let submitter = relay.submitter();

    let mut parameters = Parameters::new();
    parameters.insert("email".into(), json!("a@b.com"));
    let outcome = submitter.submit("login", parameters, None).await.unwrap();
    assert_eq!(
        outcome.result(),
        &OperationResult::success(json!({"data": {"login": {"token": "t-1"}}}))
    );

    let outcome = submitter
        .submit("getUsers", Parameters::new(), Some("tok".into()))
        .await
        .unwrap();
    assert_eq!(
        outcome.result(),
        &OperationResult::failure(FailureKind::EngineError, "Not authorised")
    );
    assert_eq!(seen.calls.lock().unwrap().len(), 2);

    relay.shutdown().await.unwrap();
}
