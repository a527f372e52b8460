//! ---
//! corelay_section: "04-relay-core"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Internal execution engine seam and its HTTP client."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use corelay_common::{EngineBodyStyle, EngineConfig};
use corelay_msg::{Parameters, RequestId};
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use tracing::debug;
use url::Url;

/// Failure reported by an execution engine. The message reaches the submitter verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// Wrap an engine message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The engine's message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Consume into the message.
    pub fn into_message(self) -> String {
        self.message
    }
}

/// One call into the engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest<'a> {
    /// Correlation key, for logging only.
    pub request_id: &'a RequestId,
    /// Operation descriptor, forwarded verbatim.
    pub operation: &'a str,
    /// Operation arguments.
    pub parameters: &'a Parameters,
    /// Bearer credential, if the caller supplied one.
    pub credential: Option<&'a str>,
}

/// The internal service that actually runs operations.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Execute the operation and return its structured payload.
    async fn execute(&self, request: EngineRequest<'_>) -> Result<JsonValue, EngineError>;
}

/// Engine reached over HTTP with a JSON POST per operation.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    client: Client,
    endpoint: Url,
    body_style: EngineBodyStyle,
}

impl HttpEngine {
    /// Build a client for `endpoint`. `timeout` bounds each whole call.
    pub fn new(
        endpoint: Url,
        timeout: Duration,
        body_style: EngineBodyStyle,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| EngineError::new(format!("engine client setup failed: {err}")))?;
        Ok(Self {
            client,
            endpoint,
            body_style,
        })
    }

    /// Build from the `[engine]` configuration block.
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let endpoint = config.endpoint_url()?;
        Ok(Self::new(endpoint, config.timeout, config.body_style)?)
    }

    /// Target endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn body(&self, request: &EngineRequest<'_>) -> JsonValue {
        match self.body_style {
            EngineBodyStyle::Relay => json!({
                "operation": request.operation,
                "parameters": request.parameters,
            }),
            EngineBodyStyle::Graphql => json!({
                "query": request.operation,
                "variables": request.parameters,
            }),
        }
    }
}

#[async_trait]
impl ExecutionEngine for HttpEngine {
    async fn execute(&self, request: EngineRequest<'_>) -> Result<JsonValue, EngineError> {
        let mut call = self
            .client
            .post(self.endpoint.clone())
            .json(&self.body(&request));
        if let Some(credential) = request.credential {
            call = call.bearer_auth(credential);
        }

        let response = call.send().await.map_err(|err| {
            if err.is_timeout() {
                EngineError::new(format!("engine timed out: {err}"))
            } else {
                EngineError::new(format!("engine unreachable: {err}"))
            }
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| EngineError::new(format!("engine response unreadable: {err}")))?;
        debug!(
            request_id = %request.request_id,
            status = status.as_u16(),
            bytes = text.len(),
            "engine responded"
        );

        if !status.is_success() {
            return Err(EngineError::new(format!("engine returned {status}: {text}")));
        }
        let payload: JsonValue = serde_json::from_str(&text)
            .map_err(|err| EngineError::new(format!("engine returned invalid JSON: {err}")))?;
        if let Some(message) = reported_errors(&payload) {
            return Err(EngineError::new(message));
        }
        Ok(payload)
    }
}

/// Joined `message` fields of a non-empty top-level `errors` array.
fn reported_errors(payload: &JsonValue) -> Option<String> {
    let errors = payload.get("errors")?.as_array()?;
    if errors.is_empty() {
        return None;
    }
    let messages: Vec<String> = errors
        .iter()
        .map(|error| match error.get("message").and_then(JsonValue::as_str) {
            Some(message) => message.to_owned(),
            None => error.to_string(),
        })
        .collect();
    Some(messages.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_errors_are_joined() {
        let payload = json!({
            "data": null,
            "errors": [
                {"message": "User not found"},
                {"message": "Invalid password", "path": ["login"]},
                {"code": 7}
            ]
        });
        assert_eq!(
            reported_errors(&payload).as_deref(),
            Some("User not found; Invalid password; {\"code\":7}")
        );
    }

    #[test]
    fn empty_or_absent_errors_are_success() {
        assert!(reported_errors(&json!({"data": {"ok": true}})).is_none());
        assert!(reported_errors(&json!({"data": 1, "errors": []})).is_none());
        assert!(reported_errors(&json!([1, 2])).is_none());
    }

    #[test]
    fn body_style_controls_field_names() {
        let id = RequestId::from("r-1");
        let mut parameters = Parameters::new();
        parameters.insert("email".into(), json!("a@b.com"));
        let request = EngineRequest {
            request_id: &id,
            operation: "login",
            parameters: &parameters,
            credential: None,
        };
        let endpoint = Url::parse("http://127.0.0.1:9/").unwrap();

        let relay = HttpEngine::new(endpoint.clone(), Duration::from_secs(1), EngineBodyStyle::Relay)
            .unwrap();
        assert_eq!(
            relay.body(&request),
            json!({"operation": "login", "parameters": {"email": "a@b.com"}})
        );

        let graphql = HttpEngine::new(endpoint, Duration::from_secs(1), EngineBodyStyle::Graphql)
            .unwrap();
        assert_eq!(
            graphql.body(&request),
            json!({"query": "login", "variables": {"email": "a@b.com"}})
        );
    }
}
