//! JSON-RPC request and response envelopes for protocol versions 1.0, 1.1
//! and 2.0.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorObject, RpcError};

/// Protocol version, taken from `jsonrpc` (2.0) or `version` (1.0/1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V1_0,
    V1_1,
    V2_0,
}

impl ProtocolVersion {
    /// Named parameters arrived with 1.1.
    pub fn supports_named_params(self) -> bool {
        self >= Self::V1_1
    }

    /// Only the legacy framing carries handler traces back to the caller.
    pub fn includes_trace(self) -> bool {
        self != Self::V2_0
    }

    /// Response field and value that mark this version.
    pub fn marker(self) -> (&'static str, &'static str) {
        match self {
            Self::V1_0 => ("version", "1.0"),
            Self::V1_1 => ("version", "1.1"),
            Self::V2_0 => ("jsonrpc", "2.0"),
        }
    }

    /// Detect the version of a request object. Neither marker means 1.0.
    pub fn detect(object: &Map<String, Value>) -> Result<Self, RpcError> {
        if let Some(marker) = object.get("jsonrpc") {
            return match marker.as_str() {
                Some("2.0") => Ok(Self::V2_0),
                _ => Err(RpcError::invalid_request(format!(
                    "Unsupported jsonrpc version: {marker}"
                ))),
            };
        }
        match object.get("version") {
            None => Ok(Self::V1_0),
            Some(marker) => match marker.as_str() {
                Some("1.0") => Ok(Self::V1_0),
                Some("1.1") => Ok(Self::V1_1),
                Some("2.0") => Ok(Self::V2_0),
                _ => Err(RpcError::invalid_request(format!(
                    "Unsupported version: {marker}"
                ))),
            },
        }
    }
}

/// Call parameters: positional, named, or none at all.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Params {
    fn from_member(member: Option<Value>) -> Result<Self, RpcError> {
        match member {
            None | Some(Value::Null) => Ok(Self::None),
            Some(Value::Array(values)) => Ok(Self::Positional(values)),
            Some(Value::Object(map)) => Ok(Self::Named(map)),
            Some(other) => Err(RpcError::invalid_request(format!(
                "params must be an array or an object, got {other}"
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::None => Value::Array(Vec::new()),
            Self::Positional(values) => Value::Array(values.clone()),
            Self::Named(map) => Value::Object(map.clone()),
        }
    }
}

/// A single parsed request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub method: String,
    pub params: Params,
    /// `None` (absent or null) makes this a notification.
    pub id: Option<Value>,
    pub version: ProtocolVersion,
    /// Caller-supplied RPC context, used by batch execution.
    pub context: Option<Value>,
}

impl RequestEnvelope {
    pub fn new(method: impl Into<String>, params: Params, id: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            id,
            version: ProtocolVersion::V1_1,
            context: None,
        }
    }

    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Validate the shape of a request object.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let Value::Object(mut object) = value else {
            return Err(RpcError::invalid_request("request must be a JSON object"));
        };
        if object.is_empty() {
            return Err(RpcError::invalid_request("empty request object"));
        }
        let version = ProtocolVersion::detect(&object)?;
        let method = match object.remove("method") {
            Some(Value::String(method)) if !method.is_empty() => method,
            Some(_) => return Err(RpcError::invalid_request("method must be a non-empty string")),
            None => return Err(RpcError::invalid_request("request has no method")),
        };
        let params = Params::from_member(object.remove("params"))?;
        let id = object.remove("id").filter(|id| !id.is_null());
        let context = object.remove("context").filter(|c| !c.is_null());

        Ok(Self {
            method,
            params,
            id,
            version,
            context,
        })
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A request body: one envelope or a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Single(RequestEnvelope),
    Batch(Vec<RequestEnvelope>),
}

impl Incoming {
    /// Parse a request body. Every batch entry is validated before any of
    /// them runs; one malformed entry rejects the whole batch.
    pub fn parse(value: Value) -> Result<Self, RpcError> {
        match value {
            Value::Object(_) => RequestEnvelope::from_value(value).map(Self::Single),
            Value::Array(entries) if !entries.is_empty() => entries
                .into_iter()
                .map(RequestEnvelope::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Batch),
            Value::Array(_) => Err(RpcError::invalid_request("empty batch")),
            _ => Err(RpcError::invalid_request(
                "request body must be a JSON object or array",
            )),
        }
    }
}

/// Exactly one of result or error.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Result(Value),
    Error(ErrorObject),
}

/// A response to one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub version: ProtocolVersion,
    pub id: Option<Value>,
    pub payload: Payload,
}

impl ResponseEnvelope {
    pub fn success(version: ProtocolVersion, id: Option<Value>, result: Value) -> Self {
        Self {
            version,
            id,
            payload: Payload::Result(result),
        }
    }

    pub fn error(version: ProtocolVersion, id: Option<Value>, error: &RpcError) -> Self {
        Self {
            version,
            id,
            payload: Payload::Error(error.to_object(version.includes_trace())),
        }
    }

    pub fn from_outcome(
        version: ProtocolVersion,
        id: Option<Value>,
        outcome: Result<Value, RpcError>,
    ) -> Self {
        match outcome {
            Ok(result) => Self::success(version, id, result),
            Err(error) => Self::error(version, id, &error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Result(result) => Some(result),
            Payload::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&ErrorObject> {
        match &self.payload {
            Payload::Error(error) => Some(error),
            Payload::Result(_) => None,
        }
    }
}

impl Serialize for ResponseEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (marker, version) = self.version.marker();
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry(marker, version)?;
        match &self.payload {
            Payload::Result(result) => map.serialize_entry("result", result)?,
            Payload::Error(error) => map.serialize_entry("error", error)?,
        }
        map.serialize_entry("id", &self.id)?;
        map.end()
    }
}

#[derive(Deserialize)]
struct RawResponse {
    version: Option<String>,
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

/// Distinguishes `"result": null` from a missing result.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl<'de> Deserialize<'de> for ResponseEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawResponse::deserialize(deserializer)?;
        let version = match (raw.jsonrpc.as_deref(), raw.version.as_deref()) {
            (Some("2.0"), _) => ProtocolVersion::V2_0,
            (_, Some("1.0")) => ProtocolVersion::V1_0,
            _ => ProtocolVersion::V1_1,
        };
        // 1.0 error responses carry `"result": null` next to the error
        let result = raw
            .result
            .filter(|result| !(result.is_null() && raw.error.is_some()));
        let payload = match (result, raw.error) {
            (Some(_), Some(_)) => {
                return Err(de::Error::custom("response carries both result and error"));
            }
            (Some(result), None) => Payload::Result(result),
            (None, Some(error)) => Payload::Error(error),
            (None, None) => {
                return Err(de::Error::custom("response carries neither result nor error"));
            }
        };
        Ok(Self {
            version,
            id: raw.id.filter(|id| !id.is_null()),
            payload,
        })
    }
}

/// What goes back over the wire for one request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Single(ResponseEnvelope),
    Batch(Vec<ResponseEnvelope>),
}

impl Reply {
    /// A single error response. Batches always count as delivered.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Single(response) if response.is_error())
    }
}
