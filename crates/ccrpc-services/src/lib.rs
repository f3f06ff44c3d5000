//! Count-contigs RPC: method handlers
//!
//! Each RPC method is backed by a type implementing [`Handler`]. Handlers are
//! registered with the server's method registry, which checks arity and
//! parameter types before calling them. Also home to the clients for the
//! external collaborators handlers and the front door rely on.

pub mod contigs;
pub mod identity;
pub mod workspace;

use ccrpc_protocol::RequestContext;
use serde_json::Value;

/// Trait implemented by every RPC method.
///
/// `args` are the positional parameters, already bound from named parameters
/// where the caller used them. Returning an [`ccrpc_protocol::RpcError`]
/// (through `anyhow`) sends that error as-is; any other error is reported as
/// a server error with its trace.
pub trait Handler: Send + Sync {
    fn call(
        &self,
        ctx: &RequestContext,
        args: Vec<Value>,
    ) -> impl std::future::Future<Output = anyhow::Result<Value>> + Send;
}
