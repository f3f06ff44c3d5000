//! CLI batch runner: one request from a file, straight to the dispatcher.
//!
//! Used by the job service to execute a submitted job: no HTTP, no job
//! bridge, and the response is written to a file instead of a socket.

use std::path::Path;

use anyhow::Context;
use ccrpc_protocol::{
    ProtocolVersion, RequestContext, RequestEnvelope, ResponseEnvelope, RpcContext, RpcError,
    TokenValidator,
};
use ccrpc_transport::client::random_call_id;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;

/// Exit status when the written response carries an error.
pub const ERROR_EXIT_CODE: i32 = 500;

pub struct BatchRunner<V> {
    service_name: String,
    dispatcher: Dispatcher,
    validator: V,
}

impl<V: TokenValidator> BatchRunner<V> {
    pub fn new(service_name: impl Into<String>, dispatcher: Dispatcher, validator: V) -> Self {
        Self {
            service_name: service_name.into(),
            dispatcher,
            validator,
        }
    }

    /// Read the request at `input`, run it and write the response to
    /// `output`. Returns the process exit code.
    pub async fn run_from_file(
        &self,
        input: &Path,
        output: &Path,
        token: Option<&str>,
    ) -> anyhow::Result<i32> {
        let text = tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read {}", input.display()))?;

        let response = self.run(&text, token).await;
        let exit_code = if response.is_error() { ERROR_EXIT_CODE } else { 0 };

        let body = serde_json::to_string(&response).context("Failed to encode response")?;
        tokio::fs::write(output, body)
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;

        info!("Batch call finished with exit code {exit_code}");
        Ok(exit_code)
    }

    /// Run one request given as JSON text. Always produces a response, even
    /// for requests that did not carry an id.
    pub async fn run(&self, text: &str, token: Option<&str>) -> ResponseEnvelope {
        let mut ctx = RequestContext::new(self.service_name.as_str());
        ctx.cli = true;

        let envelope = match parse_request(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                ctx.error(&err.to_string());
                return ResponseEnvelope::error(ProtocolVersion::V1_1, None, &err);
            }
        };

        ctx.seed_from(&envelope);
        if let Some(context) = &envelope.context {
            match serde_json::from_value::<RpcContext>(context.clone()) {
                Ok(rpc_context) => ctx.rpc_context = Some(rpc_context),
                Err(e) => warn!("Ignoring malformed call context: {e}"),
            }
        }

        if let Some(token) = token {
            match self.validator.validate(token).await {
                Ok(identity) => ctx.authenticate(identity.user_id, token),
                Err(e) => {
                    let err = RpcError::token_validation_failed(format!(
                        "Token validation failed: {e}"
                    ));
                    ctx.error(&err.to_string());
                    return ResponseEnvelope::error(envelope.version, envelope.id.clone(), &err);
                }
            }
        }

        let outcome = self.dispatcher.invoke(&ctx, &envelope).await;
        if let Err(err) = &outcome {
            ctx.error(&err.to_string());
        }
        ResponseEnvelope::from_outcome(envelope.version, envelope.id.clone(), outcome)
    }
}

/// Parse a batch request, filling in a version and an id when absent.
fn parse_request(text: &str) -> Result<RequestEnvelope, RpcError> {
    let mut value: Value =
        serde_json::from_str(text).map_err(|e| RpcError::parse_error(e.to_string()))?;
    let Some(object) = value.as_object_mut() else {
        return Err(RpcError::invalid_request("request must be a JSON object"));
    };
    if !object.contains_key("version") && !object.contains_key("jsonrpc") {
        object.insert("version".into(), json!("1.1"));
    }
    if object.get("id").is_none_or(Value::is_null) {
        object.insert("id".into(), json!(random_call_id()));
    }
    RequestEnvelope::from_value(value)
}

