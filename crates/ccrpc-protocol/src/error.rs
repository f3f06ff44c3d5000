//! RPC error taxonomy and the error object carried on the wire.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Every failure a call can end in, local or relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // JSON-RPC standard errors
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    KeywordNotSupported,

    // Authentication
    AuthenticationRequired,
    TokenValidationFailed,

    // Server errors
    ServerError,
    UpstreamJobError,
    Unexpected,
}

impl ErrorKind {
    pub fn code(&self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams | Self::KeywordNotSupported => -32602,
            Self::AuthenticationRequired
            | Self::TokenValidationFailed
            | Self::ServerError
            | Self::UpstreamJobError => -32000,
            Self::Unexpected => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams | Self::KeywordNotSupported => "Invalid params",
            Self::AuthenticationRequired => "Authentication required",
            Self::TokenValidationFailed => "Token validation failed",
            Self::ServerError | Self::UpstreamJobError => "Server error",
            Self::Unexpected => "Unexpected Server Error",
        }
    }

    /// Errors raised while checking a request before any handler runs.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ParseError
                | Self::InvalidRequest
                | Self::MethodNotFound
                | Self::InvalidParams
                | Self::KeywordNotSupported
        )
    }
}

/// An RPC failure. `code` and `name` normally come from `kind`, but relayed
/// errors keep whatever the remote service reported.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{name} [{code}]: {message}")]
pub struct RpcError {
    pub kind: ErrorKind,
    pub code: i64,
    pub name: String,
    pub message: String,
    pub trace: Option<String>,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            name: kind.name().to_string(),
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Rebuild an error from an object reported by another service,
    /// preserving its code, name, message and trace.
    pub fn relayed(kind: ErrorKind, object: ErrorObject) -> Self {
        Self {
            kind,
            code: object.code,
            name: object.name,
            message: object.message,
            trace: object.trace,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorKind::MethodNotFound, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn keyword_not_supported() -> Self {
        Self::new(
            ErrorKind::KeywordNotSupported,
            "Keyword arguments are not supported by JSON-RPC 1.0",
        )
    }

    pub fn authentication_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationRequired, message)
    }

    pub fn token_validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TokenValidationFailed, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    pub fn upstream(object: ErrorObject) -> Self {
        Self::relayed(ErrorKind::UpstreamJobError, object)
    }

    pub fn unexpected() -> Self {
        Self::new(ErrorKind::Unexpected, "An unexpected server error occurred")
    }

    /// Wire form. The trace is only attached when the framing allows it.
    pub fn to_object(&self, include_trace: bool) -> ErrorObject {
        ErrorObject {
            code: self.code,
            name: self.name.clone(),
            message: self.message.clone(),
            trace: if include_trace { self.trace.clone() } else { None },
        }
    }
}

/// Error object as it appears in a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ErrorObject {
    /// Read an error object reported by another service without insisting
    /// on its shape. Missing members fall back to code 0 and name
    /// `Unknown`; a bare value becomes the message.
    pub fn lenient(value: &Value) -> Self {
        let text = |member: Option<&Value>| match member {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };
        match value {
            Value::Object(object) => Self {
                code: object.get("code").and_then(Value::as_i64).unwrap_or(0),
                name: text(object.get("name")).unwrap_or_else(|| "Unknown".into()),
                message: text(object.get("message")).unwrap_or_default(),
                trace: text(object.get("error")),
            },
            other => Self {
                code: 0,
                name: "Unknown".into(),
                message: text(Some(other)).unwrap_or_default(),
                trace: None,
            },
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}
