//! ---
//! corelay_section: "04-relay-core"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Submit two operations through an in-process relay."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use corelay_common::AppConfig;
use corelay_core::{EngineError, EngineRequest, ExecutionEngine, Relay, Submission};
use serde_json::{json, Value as JsonValue};

/// Stand-in for the internal API.
struct DemoEngine;

#[async_trait]
impl ExecutionEngine for DemoEngine {
    async fn execute(&self, request: EngineRequest<'_>) -> Result<JsonValue, EngineError> {
        match request.operation {
            "login" => Ok(json!({"token": "demo-token"})),
            other => Ok(json!({"operation": other, "caller": request.credential})),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config: AppConfig = "[submitter]\nattempts = 20\ndelay_ms = 100\n".parse()?;
    let relay = Relay::in_memory(&config, Arc::new(DemoEngine)).await?;
    let submitter = relay.submitter();

    let login = submitter
        .submit_with_cancel(
            Submission::new("login").parameter("email", "a@b.com"),
            tokio::sync::watch::channel(false).1,
        )
        .await?;
    println!("login -> {:?} after {} poll(s)", login.result(), login.attempts());

    // no credential, so this is answered with Unauthenticated
    let denied = submitter
        .submit("updateRole", Default::default(), None)
        .await?;
    match denied.into_result() {
        Ok(payload) => println!("updateRole -> {payload}"),
        Err(err) => println!("updateRole rejected: {err}"),
    }

    relay.shutdown().await
}
