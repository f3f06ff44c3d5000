//! Outbound JSON-RPC over HTTP, used to reach other services (the job
//! service, the workspace store) with the same envelope this server speaks.

use std::time::Duration;

use ccrpc_protocol::{ErrorKind, ErrorObject, RpcError};
use reqwest::{StatusCode, Url, header};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

/// Synchronous-style JSON-RPC 1.1 client bound to one service URL.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: Url,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<ErrorObject>,
}

impl JsonRpcClient {
    /// Build a client for `url`. The URL must be http(s) and the timeout at
    /// least one second.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let parsed = Url::parse(url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| RpcError::server_error(format!("{url} isn't a valid http url")))?;
        if timeout < Duration::from_secs(1) {
            return Err(RpcError::server_error(
                "Timeout value must be at least 1 second",
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::server_error(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, url: parsed })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Call `method` with positional `params` and return its `result`.
    ///
    /// A 500 with a JSON error object is re-raised as that error; any other
    /// failed exchange becomes a `ServerError` carrying the raw body.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        token: Option<&str>,
    ) -> Result<Value, RpcError> {
        let body = json!({
            "method": method,
            "params": params,
            "version": "1.1",
            "id": random_call_id(),
        });

        let mut request = self.http.post(self.url.clone()).json(&body);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, token);
        }

        debug!("Calling {method} at {}", self.url);
        let response = request.send().await.map_err(|e| {
            RpcError::server_error(format!("Request to {} failed: {e}", self.url))
        })?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        let text = response.text().await.map_err(|e| {
            RpcError::server_error(format!("Failed to read response from {}: {e}", self.url))
        })?;

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            if is_json {
                if let Ok(ErrorBody { error: Some(error) }) = serde_json::from_str(&text) {
                    return Err(RpcError::relayed(ErrorKind::ServerError, error));
                }
            }
            return Err(unknown_error(text));
        }
        if !status.is_success() {
            return Err(RpcError::server_error(format!("{status}: {text}")));
        }

        let mut reply: Value = serde_json::from_str(&text).map_err(|e| {
            RpcError::server_error(format!("Invalid JSON from {}: {e}", self.url))
        })?;
        match reply.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(unknown_error("An unknown server error occurred")),
        }
    }
}

fn unknown_error(message: impl Into<String>) -> RpcError {
    RpcError {
        code: 0,
        name: "Unknown".into(),
        ..RpcError::server_error(message)
    }
}

/// Random digit string used as a request id.
pub fn random_call_id() -> String {
    rand::random::<u64>().to_string()
}
