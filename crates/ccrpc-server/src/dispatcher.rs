//! RPC call dispatcher: validates a request against its method spec,
//! invokes the handler and normalizes whatever comes back.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use ccrpc_protocol::{Params, RequestContext, RequestEnvelope, ResponseEnvelope, RpcError};
use futures_util::FutureExt;
use serde_json::Value;

use crate::registry::{MethodRegistry, MethodSpec};

/// Dispatches parsed envelopes to registered handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<MethodRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Validate and run the handler, returning its result or a normalized
    /// error.
    pub async fn invoke(
        &self,
        ctx: &RequestContext,
        envelope: &RequestEnvelope,
    ) -> Result<Value, RpcError> {
        let spec = self.registry.lookup(&envelope.method)?;
        let args = bind_params(spec, envelope)?;

        match AssertUnwindSafe(spec.invoke(ctx, args)).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(normalize_error(err)),
            Err(panic) => Err(RpcError::server_error(panic_message(panic.as_ref()))
                .with_trace(format!("handler for {} panicked", spec.name()))),
        }
    }
}

/// Run a batch in order, one envelope at a time, keeping the responses that
/// are owed. A failing entry never affects its siblings. `None` when every
/// entry was a notification.
pub async fn collect_batch<'a, F, Fut>(
    envelopes: &'a [RequestEnvelope],
    mut handle: F,
) -> Option<Vec<ResponseEnvelope>>
where
    F: FnMut(&'a RequestEnvelope) -> Fut,
    Fut: Future<Output = Option<ResponseEnvelope>>,
{
    let mut responses = Vec::with_capacity(envelopes.len());
    for envelope in envelopes {
        if let Some(response) = handle(envelope).await {
            responses.push(response);
        }
    }
    (!responses.is_empty()).then_some(responses)
}

/// Turn arguments from the envelope into the positional list the handler
/// sees, checking arity and declared types.
fn bind_params(spec: &MethodSpec, envelope: &RequestEnvelope) -> Result<Vec<Value>, RpcError> {
    let args = match &envelope.params {
        Params::None => Vec::new(),
        Params::Positional(values) => values.clone(),
        Params::Named(named) => {
            if !envelope.version.supports_named_params() {
                return Err(RpcError::keyword_not_supported());
            }
            spec.bind_named(named)?
        }
    };
    spec.check_arity(args.len())?;
    spec.check_types(&args)?;
    Ok(args)
}

/// Recognized RPC errors pass through; anything else becomes a server error
/// carrying the handler's message and the full error chain as its trace.
pub fn normalize_error(err: anyhow::Error) -> RpcError {
    match err.downcast::<RpcError>() {
        Ok(rpc) => rpc,
        Err(other) => RpcError::server_error(other.to_string()).with_trace(format!("{other:?}")),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

/// Log a failed outcome and build the response. Notifications get `None`
/// whether or not they succeeded.
pub fn respond(
    ctx: &RequestContext,
    envelope: &RequestEnvelope,
    outcome: Result<Value, RpcError>,
) -> Option<ResponseEnvelope> {
    if let Err(err) = &outcome {
        ctx.error(&err.to_string());
        if let Some(trace) = &err.trace {
            for line in trace.lines() {
                ctx.error(line);
            }
        }
    }
    let id = envelope.id.clone()?;
    Some(ResponseEnvelope::from_outcome(envelope.version, Some(id), outcome))
}
