//! HTTP front door using Axum.
//!
//! Terminates HTTP, answers CORS pre-flight, reads the body by its declared
//! length, turns unparseable JSON into a parse-error response, works out the
//! caller's address and bearer token, and hands everything else to the
//! [`RequestHandler`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::{self, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN,
            ACCESS_CONTROL_REQUEST_HEADERS, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE,
        },
        request::Parts,
    },
    response::{IntoResponse, Response},
    routing::any,
};
use ccrpc_protocol::{ProtocolVersion, Reply, RequestContext, ResponseEnvelope, RpcError};
use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Implemented by the RPC server. Called once per parsed request body.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a parsed JSON body. `None` means nothing to send back
    /// (notifications only).
    fn handle_call(
        &self,
        call: HttpCall,
    ) -> impl std::future::Future<Output = Option<Reply>> + Send;
}

/// Everything the front door learned about one HTTP request.
#[derive(Debug)]
pub struct HttpCall {
    pub body: Value,
    pub token: Option<SecretString>,
    pub client_ip: Option<String>,
    pub forwarded_for: Option<String>,
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Honour `X-Forwarded-For` / `X-Real-IP` for the client address
    pub trust_x_ip_headers: bool,
    /// Upper bound on a request body
    pub max_body_bytes: usize,
    /// Service name used to tag log lines written before routing
    pub service_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 9999,
            hostname: "localhost".into(),
            trust_x_ip_headers: true,
            max_body_bytes: 100 * 1024 * 1024,
            service_name: String::new(),
        }
    }
}

/// Shared state for the transport server.
struct AppState<H: RequestHandler> {
    handler: Arc<H>,
    config: TransportConfig,
}

/// Build the Axum router. Exposed so tests can drive it in-process.
pub fn router<H: RequestHandler>(handler: Arc<H>, config: TransportConfig) -> Router {
    let state = Arc::new(AppState { handler, config });
    Router::new()
        .route("/", any(rpc_handler::<H>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// The transport server. Owns the listener task.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound address
    local_addr: SocketAddr,
}

impl TransportServer {
    /// Bind and start serving with the given request handler.
    pub async fn start<H: RequestHandler>(
        config: TransportConfig,
        handler: Arc<H>,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let listener =
            tokio::net::TcpListener::bind((config.hostname.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;

        info!("JSON-RPC server listening on http://{local_addr}/");

        let app = router(handler, config);
        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("JSON-RPC server stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn rpc_handler<H: RequestHandler>(
    State(state): State<Arc<AppState<H>>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let allow_headers = parts
        .headers
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("authorization"));

    // Pre-flight: headers only
    if parts.method == Method::OPTIONS {
        return with_cors(StatusCode::OK, String::new(), allow_headers);
    }

    let client_ip = client_ip(&parts, state.config.trust_x_ip_headers);

    let mut ctx = RequestContext::new(state.config.service_name.clone());
    ctx.client_ip = client_ip.clone();

    let body = match read_body(&parts.headers, body, state.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            ctx.error(&err.to_string());
            let reply = Reply::Single(ResponseEnvelope::error(ProtocolVersion::V1_1, None, &err));
            return reply_response(Some(reply), allow_headers);
        }
    };

    let body: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            let err = RpcError::parse_error(e.to_string());
            ctx.error(&err.to_string());
            let reply = Reply::Single(ResponseEnvelope::error(ProtocolVersion::V1_1, None, &err));
            return reply_response(Some(reply), allow_headers);
        }
    };

    let call = HttpCall {
        body,
        token: bearer_token(&parts.headers).map(|token| SecretString::new(token.into())),
        client_ip,
        forwarded_for: header_str(&parts.headers, "x-forwarded-for").map(str::to_string),
    };

    let reply = state.handler.handle_call(call).await;
    reply_response(reply, allow_headers)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Read the body, keeping only as many bytes as `Content-Length` declares.
/// A missing or unparseable length means an empty body.
async fn read_body(
    headers: &HeaderMap,
    body: body::Body,
    limit: usize,
) -> Result<Bytes, RpcError> {
    let declared = header_str(headers, CONTENT_LENGTH.as_str())
        .and_then(|len| len.trim().parse::<usize>().ok())
        .unwrap_or(0);
    if declared == 0 {
        return Ok(Bytes::new());
    }
    let bytes = body::to_bytes(body, limit)
        .await
        .map_err(|e| RpcError::invalid_request(format!("Failed to read request body: {e}")))?;
    Ok(bytes.slice(..declared.min(bytes.len())))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// The `Authorization` header, with an optional `Bearer ` prefix removed.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = header_str(headers, AUTHORIZATION.as_str())?.trim();
    let token = match raw.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => raw[7..].trim_start(),
        _ => raw,
    };
    (!token.is_empty()).then_some(token)
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
fn client_ip(parts: &Parts, trust_x_ip_headers: bool) -> Option<String> {
    if trust_x_ip_headers {
        let forwarded = header_str(&parts.headers, "x-forwarded-for")
            .and_then(|xff| xff.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return Some(ip.to_string());
        }
        let real_ip = header_str(&parts.headers, "x-real-ip")
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = real_ip {
            return Some(ip.to_string());
        }
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn reply_response(reply: Option<Reply>, allow_headers: HeaderValue) -> Response {
    let Some(reply) = reply else {
        return with_cors(StatusCode::OK, String::new(), allow_headers);
    };
    let status = if reply.is_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    match serde_json::to_string(&reply) {
        Ok(body) => with_cors(status, body, allow_headers),
        Err(e) => {
            error!("Failed to serialize response: {e}");
            let fallback = ResponseEnvelope::error(ProtocolVersion::V1_1, None, &RpcError::unexpected());
            let body = serde_json::to_string(&fallback).unwrap_or_default();
            with_cors(StatusCode::INTERNAL_SERVER_ERROR, body, allow_headers)
        }
    }
}

fn with_cors(status: StatusCode, body: String, allow_headers: HeaderValue) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
