//! RPC server: the per-request pipeline behind the HTTP front door.
//!
//! For every envelope (and every entry of a batch) the server builds a fresh
//! [`RequestContext`], checks the method's authentication requirement, then
//! routes the call to the async job bridge or the dispatcher.

use std::sync::Arc;

use ccrpc_protocol::methods::PseudoKind;
use ccrpc_protocol::{
    AuthRequirement, Incoming, ProtocolVersion, Reply, RequestContext, RequestEnvelope,
    ResponseEnvelope, RpcError, TokenValidator,
};
use ccrpc_transport::server::{HttpCall, RequestHandler};
use secrecy::ExposeSecret;
use serde_json::Value;

use crate::dispatcher::{self, Dispatcher};
use crate::jobs::{AsyncJobBridge, JobService};
use crate::registry::MethodRegistry;

/// Caller details shared by every envelope of one HTTP request.
struct CallMeta<'a> {
    token: Option<&'a str>,
    client_ip: Option<&'a str>,
    forwarded_for: Option<&'a str>,
}

/// Owns the registry and routes requests.
pub struct RpcServer<V, J> {
    service_name: String,
    dispatcher: Dispatcher,
    bridge: AsyncJobBridge<J>,
    validator: V,
}

impl<V: TokenValidator, J: JobService> RpcServer<V, J> {
    pub fn new(
        service_name: impl Into<String>,
        registry: Arc<MethodRegistry>,
        validator: V,
        jobs: J,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            dispatcher: Dispatcher::new(registry),
            bridge: AsyncJobBridge::new(jobs),
            validator,
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        self.dispatcher.registry()
    }

    /// Parse a request body and handle it. `None` when nothing is owed to
    /// the caller (a notification, or a batch of them).
    pub async fn handle_body(
        &self,
        body: Value,
        token: Option<&str>,
        client_ip: Option<&str>,
        forwarded_for: Option<&str>,
    ) -> Option<Reply> {
        let meta = CallMeta {
            token,
            client_ip,
            forwarded_for,
        };

        let fallback_id = body.get("id").filter(|id| !id.is_null()).cloned();
        let fallback_version = body
            .as_object()
            .and_then(|object| ProtocolVersion::detect(object).ok())
            .unwrap_or(ProtocolVersion::V1_1);

        match Incoming::parse(body) {
            Ok(Incoming::Single(envelope)) => self
                .handle_envelope(&envelope, &meta)
                .await
                .map(Reply::Single),
            Ok(Incoming::Batch(envelopes)) => {
                let meta = &meta;
                dispatcher::collect_batch(&envelopes, move |envelope| {
                    self.handle_envelope(envelope, meta)
                })
                .await
                .map(Reply::Batch)
            }
            Err(err) => {
                let mut ctx = RequestContext::new(self.service_name.as_str());
                ctx.client_ip = meta.client_ip.map(str::to_string);
                ctx.error(&err.to_string());
                Some(Reply::Single(ResponseEnvelope::error(
                    fallback_version,
                    fallback_id,
                    &err,
                )))
            }
        }
    }

    async fn handle_envelope(
        &self,
        envelope: &RequestEnvelope,
        meta: &CallMeta<'_>,
    ) -> Option<ResponseEnvelope> {
        let mut ctx = RequestContext::new(self.service_name.as_str());
        ctx.client_ip = meta.client_ip.map(str::to_string);
        ctx.seed_from(envelope);

        let requirement = {
            let registry = self.registry();
            registry.auth_requirement_for(registry.effective_name(&envelope.method))
        };

        let outcome = match self.authenticate(&mut ctx, requirement, meta.token).await {
            Ok(()) => {
                if let Some(forwarded) = meta.forwarded_for {
                    ctx.info(&format!("X-Forwarded-For: {forwarded}"));
                }
                self.route(&ctx, envelope).await
            }
            Err(err) => Err(err),
        };

        dispatcher::respond(&ctx, envelope, outcome)
    }

    /// Apply the method's authentication requirement. A token is validated
    /// whenever one is sent to a method that looks at authentication; a bad
    /// token is only fatal when authentication is required.
    async fn authenticate(
        &self,
        ctx: &mut RequestContext,
        requirement: AuthRequirement,
        token: Option<&str>,
    ) -> Result<(), RpcError> {
        if requirement == AuthRequirement::None {
            return Ok(());
        }
        let Some(token) = token else {
            if requirement == AuthRequirement::Required {
                return Err(RpcError::authentication_required(format!(
                    "Authentication required for {} but no authentication header was passed",
                    self.service_name
                )));
            }
            return Ok(());
        };

        match self.validator.validate(token).await {
            Ok(identity) => {
                ctx.authenticate(identity.user_id, token);
                Ok(())
            }
            Err(err) if requirement == AuthRequirement::Required => Err(
                RpcError::token_validation_failed(format!("Token validation failed: {err}")),
            ),
            Err(err) => {
                ctx.info(&format!("Ignoring invalid optional token: {err}"));
                Ok(())
            }
        }
    }

    async fn route(
        &self,
        ctx: &RequestContext,
        envelope: &RequestEnvelope,
    ) -> Result<Value, RpcError> {
        match self.registry().resolve_pseudo(&envelope.method) {
            Some((PseudoKind::Submit, target)) => self.bridge.submit(ctx, target, envelope).await,
            Some((PseudoKind::Check, target)) => self.bridge.check(ctx, target, envelope).await,
            None => self.run_sync(ctx, envelope).await,
        }
    }

    async fn run_sync(
        &self,
        ctx: &RequestContext,
        envelope: &RequestEnvelope,
    ) -> Result<Value, RpcError> {
        if let Some(spec) = self.registry().get(&envelope.method) {
            if !spec.is_sync_callable() {
                return Err(RpcError::server_error(format!(
                    "Method {} cannot be run synchronously",
                    envelope.method
                )));
            }
        }
        ctx.info("start method");
        let outcome = self.dispatcher.invoke(ctx, envelope).await;
        ctx.info("end method");
        outcome
    }
}

impl<V, J> RequestHandler for RpcServer<V, J>
where
    V: TokenValidator + 'static,
    J: JobService + 'static,
{
    async fn handle_call(&self, call: HttpCall) -> Option<Reply> {
        let HttpCall {
            body,
            token,
            client_ip,
            forwarded_for,
        } = call;
        self.handle_body(
            body,
            token.as_ref().map(|token| token.expose_secret()),
            client_ip.as_deref(),
            forwarded_for.as_deref(),
        )
        .await
    }
}
