//! Count-contigs RPC: protocol types
//!
//! JSON-RPC 1.0/1.1/2.0 envelopes, the error taxonomy, the per-call request
//! context and the authentication types. This crate does no I/O; the
//! transport and server crates build on it.

pub mod auth;
pub mod context;
pub mod envelope;
pub mod error;
pub mod methods;

pub use auth::{AuthError, AuthRequirement, Identity, TokenValidator};
pub use context::{
    CallStackFrame, DebugLevel, LogLevelError, ProvenanceAction, RequestContext, RpcContext,
};
pub use envelope::{Incoming, Params, Payload, ProtocolVersion, Reply, RequestEnvelope, ResponseEnvelope};
pub use error::{ErrorKind, ErrorObject, RpcError};
