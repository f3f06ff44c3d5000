//! Fakes shared by the server tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use ccrpc_protocol::{AuthError, AuthRequirement, Identity, RequestContext, RpcError, TokenValidator};
use ccrpc_server::{
    JobService, JobStatus, MethodRegistry, MethodSpec, ParamType, RpcServer, RunJobParams,
};
use ccrpc_services::Handler;
use serde_json::{Value, json};

pub const SERVICE: &str = "svc";

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Counts its invocations; answers like the contig counter.
pub struct CountingHandler(pub Arc<AtomicUsize>);

impl Handler for CountingHandler {
    async fn call(&self, _ctx: &RequestContext, _args: Vec<Value>) -> anyhow::Result<Value> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(json!([{"contig_count": 1}]))
    }
}

/// Returns its arguments.
pub struct Echo;

impl Handler for Echo {
    async fn call(&self, _ctx: &RequestContext, args: Vec<Value>) -> anyhow::Result<Value> {
        Ok(Value::Array(args))
    }
}

/// Reports what the context knows about the caller.
pub struct WhoAmI;

impl Handler for WhoAmI {
    async fn call(&self, ctx: &RequestContext, _args: Vec<Value>) -> anyhow::Result<Value> {
        Ok(json!({
            "user": ctx.user_id,
            "authenticated": ctx.authenticated,
            "cli": ctx.cli,
            "call_stack": ctx.rpc_context.as_ref().map(|c| c.call_stack.len()),
            "client_ip": ctx.client_ip,
        }))
    }
}

pub struct Failing;

impl Handler for Failing {
    async fn call(&self, _ctx: &RequestContext, _args: Vec<Value>) -> anyhow::Result<Value> {
        Err(anyhow!("boom"))
    }
}

pub struct RpcFailing;

impl Handler for RpcFailing {
    async fn call(&self, _ctx: &RequestContext, _args: Vec<Value>) -> anyhow::Result<Value> {
        Err(RpcError::invalid_params("custom rejection").into())
    }
}

pub struct Panicking;

impl Handler for Panicking {
    async fn call(&self, _ctx: &RequestContext, args: Vec<Value>) -> anyhow::Result<Value> {
        if args.is_empty() {
            panic!("kaboom");
        }
        Ok(Value::Null)
    }
}

/// A registry exercising every registration option. The returned counter
/// tracks calls to `svc.count`.
pub fn registry() -> (MethodRegistry, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = MethodRegistry::new();

    let specs = [
        MethodSpec::new("svc.count", CountingHandler(calls.clone()))
            .with_arity(2, Some(2))
            .with_param_names(["workspace_name", "contigset_id"])
            .with_param_types([ParamType::String, ParamType::String])
            .with_auth(AuthRequirement::Required)
            .with_async(true),
        MethodSpec::new("svc.echo", Echo),
        MethodSpec::new("svc.typed", Echo)
            .with_arity(1, Some(3))
            .with_param_names(["a", "b", "c"])
            .with_param_types([ParamType::Integer, ParamType::Bool]),
        MethodSpec::new("svc.whoami", WhoAmI).with_auth(AuthRequirement::Optional),
        MethodSpec::new("svc.fail", Failing),
        MethodSpec::new("svc.rpcfail", RpcFailing),
        MethodSpec::new("svc.panic", Panicking),
        MethodSpec::new("svc.weak", Echo)
            .with_auth(AuthRequirement::Optional)
            .with_async(true),
        MethodSpec::new("svc.asynconly", Echo)
            .with_auth(AuthRequirement::Required)
            .with_async(true)
            .sync_callable(false),
    ];
    for spec in specs {
        registry.register(spec).unwrap();
    }
    (registry, calls)
}

// ─────────────────────────────────────────────────────────────────────────────
// Collaborators
// ─────────────────────────────────────────────────────────────────────────────

/// `good` belongs to alice, `bad` is rejected, anything else finds the
/// identity service down.
pub struct FakeValidator;

impl TokenValidator for FakeValidator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        match token {
            "good" => Ok(Identity {
                user_id: "alice".into(),
            }),
            "bad" => Err(AuthError::InvalidToken("expired".into())),
            _ => Err(AuthError::Unavailable("connection refused".into())),
        }
    }
}

/// Job service double: records submissions and polls, answers polls with a
/// fixed status.
#[derive(Clone, Default)]
pub struct FakeJobs {
    pub runs: Arc<Mutex<Vec<(String, RunJobParams)>>>,
    pub checks: Arc<Mutex<Vec<(String, String)>>>,
    pub status: Arc<Mutex<Value>>,
}

impl FakeJobs {
    pub fn with_status(status: Value) -> Self {
        let jobs = Self::default();
        *jobs.status.lock().unwrap() = status;
        jobs
    }

    pub fn calls(&self) -> usize {
        self.runs.lock().unwrap().len() + self.checks.lock().unwrap().len()
    }
}

impl JobService for FakeJobs {
    async fn run_job(&self, token: &str, params: RunJobParams) -> Result<String, RpcError> {
        let mut runs = self.runs.lock().unwrap();
        runs.push((token.to_string(), params));
        Ok(format!("job-{}", runs.len()))
    }

    async fn check_job(&self, token: &str, job_id: &str) -> Result<JobStatus, RpcError> {
        self.checks
            .lock()
            .unwrap()
            .push((token.to_string(), job_id.to_string()));
        let status = self.status.lock().unwrap().clone();
        serde_json::from_value(status).map_err(|e| RpcError::server_error(e.to_string()))
    }
}

pub fn server(jobs: FakeJobs) -> (RpcServer<FakeValidator, FakeJobs>, Arc<AtomicUsize>) {
    let (registry, calls) = registry();
    (
        RpcServer::new(SERVICE, Arc::new(registry), FakeValidator, jobs),
        calls,
    )
}
