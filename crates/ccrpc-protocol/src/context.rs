//! Request context: per-call state threaded through request handling.
//!
//! A fresh [`RequestContext`] is built for every request (and for every
//! entry of a batch). The front door fills in the caller's address, the
//! authenticated identity, the call stack and the provenance record; handlers
//! read it and log through it so every log line carries the same correlation
//! fields. A context is never shared between requests.

use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::envelope::RequestEnvelope;
use crate::methods::split_method;

/// One frame of the RPC call stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStackFrame {
    pub time: String,
    pub method: String,
}

/// Call metadata handed on to downstream services (the job service).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RpcContext {
    #[serde(default)]
    pub call_stack: Vec<CallStackFrame>,
    /// Anything else a caller put in its context.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Audit record of which service and method produced a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceAction {
    pub service: String,
    pub method: String,
    pub method_params: Value,
}

/// Debug verbosity accepted by [`RequestContext::debug_at`]. Internally
/// levels run 7..=9; callers may also say 1..=3 or `DEBUG`..`DEBUG3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DebugLevel(u8);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal log level: {0}")]
pub struct LogLevelError(pub String);

impl DebugLevel {
    pub const DEBUG: Self = Self(7);
    pub const DEBUG2: Self = Self(8);
    pub const DEBUG3: Self = Self(9);

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for DebugLevel {
    fn default() -> Self {
        Self::DEBUG
    }
}

impl TryFrom<i64> for DebugLevel {
    type Error = LogLevelError;

    fn try_from(level: i64) -> Result<Self, Self::Error> {
        match level {
            1..=3 => Ok(Self(level as u8 + 6)),
            7..=9 => Ok(Self(level as u8)),
            _ => Err(LogLevelError(level.to_string())),
        }
    }
}

impl FromStr for DebugLevel {
    type Err = LogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(Self::DEBUG),
            "DEBUG2" => Ok(Self::DEBUG2),
            "DEBUG3" => Ok(Self::DEBUG3),
            other => other
                .trim()
                .parse::<i64>()
                .map_err(|_| LogLevelError(other.to_string()))
                .and_then(Self::try_from),
        }
    }
}

/// Emit an event at a fixed level with the context's correlation fields.
macro_rules! context_event {
    ($ctx:expr, $level:expr, $message:expr) => {
        tracing::event!(
            $level,
            service = %$ctx.service,
            client_ip = $ctx.client_ip.as_deref().unwrap_or("-"),
            user = $ctx.user_id.as_deref().unwrap_or("-"),
            module = $ctx.module.as_deref().unwrap_or("-"),
            method = $ctx.method.as_deref().unwrap_or("-"),
            call_id = %CallId($ctx.call_id.as_ref()),
            "{}",
            $message
        )
    };
}

struct CallId<'a>(Option<&'a Value>);

impl fmt::Display for CallId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(Value::String(id)) => f.write_str(id),
            Some(id) => write!(f, "{id}"),
            None => f.write_str("-"),
        }
    }
}

/// State for a single call.
#[derive(Default)]
pub struct RequestContext {
    /// Service name used to tag log lines.
    pub service: String,
    pub client_ip: Option<String>,
    pub user_id: Option<String>,
    pub authenticated: bool,
    pub token: Option<SecretString>,
    pub module: Option<String>,
    pub method: Option<String>,
    pub call_id: Option<Value>,
    pub rpc_context: Option<RpcContext>,
    pub provenance: Vec<ProvenanceAction>,
    /// Set when the call comes from the batch runner rather than HTTP.
    pub cli: bool,
}

impl RequestContext {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    /// Record the method, call id, a one-frame call stack and the
    /// provenance entry for `envelope`.
    pub fn seed_from(&mut self, envelope: &RequestEnvelope) {
        let (module, function) = split_method(&envelope.method);
        self.module = module.map(str::to_string);
        self.method = Some(function.to_string());
        self.call_id = envelope.id.clone();
        self.rpc_context = Some(RpcContext {
            call_stack: vec![CallStackFrame {
                time: local_timestamp(),
                method: envelope.method.clone(),
            }],
            extra: Map::new(),
        });
        self.provenance = vec![ProvenanceAction {
            service: module.unwrap_or_default().to_string(),
            method: function.to_string(),
            method_params: envelope.params.to_value(),
        }];
    }

    /// Record a validated identity.
    pub fn authenticate(&mut self, user_id: impl Into<String>, token: &str) {
        self.user_id = Some(user_id.into());
        self.authenticated = true;
        self.token = Some(SecretString::new(token.into()));
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|token| token.expose_secret())
    }

    pub fn error(&self, message: &str) {
        context_event!(self, tracing::Level::ERROR, message);
    }

    pub fn info(&self, message: &str) {
        context_event!(self, tracing::Level::INFO, message);
    }

    pub fn debug(&self, message: &str) {
        self.debug_at(DebugLevel::DEBUG, message);
    }

    pub fn debug_at(&self, level: DebugLevel, message: &str) {
        if level == DebugLevel::DEBUG {
            context_event!(self, tracing::Level::DEBUG, message);
        } else {
            context_event!(self, tracing::Level::TRACE, message);
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("service", &self.service)
            .field("client_ip", &self.client_ip)
            .field("user_id", &self.user_id)
            .field("authenticated", &self.authenticated)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("module", &self.module)
            .field("method", &self.method)
            .field("call_id", &self.call_id)
            .field("cli", &self.cli)
            .finish_non_exhaustive()
    }
}

/// Current local time as ISO-8601 with the UTC offset, e.g.
/// `2016-03-01T10:15:30.123456-08:00`.
pub fn local_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f%:z")
        .to_string()
}
