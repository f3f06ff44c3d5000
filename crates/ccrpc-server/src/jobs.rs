//! Async job bridge: `<method>_async` submits a job to the external job
//! service, `<method>_check` polls it. No job state is kept here.

use std::time::Duration;

use ccrpc_protocol::methods::{CHECK_JOB, RUN_JOB};
use ccrpc_protocol::{
    AuthRequirement, ErrorObject, Params, RequestContext, RequestEnvelope, RpcContext, RpcError,
};
use ccrpc_transport::JsonRpcClient;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::registry::MethodSpec;

/// Default bound on a job-service call.
pub const DEFAULT_JOB_SERVICE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Parameters of `run_job`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunJobParams {
    pub method: String,
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_context: Option<RpcContext>,
}

/// Status reported by `check_job`, kept exactly as the job service sent it.
pub type JobStatus = Map<String, Value>;

/// `finished` may be a bool, a 0/1 flag or a string flag.
pub fn job_finished(status: &JobStatus) -> bool {
    match status.get("finished") {
        Some(Value::Bool(finished)) => *finished,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !matches!(s.as_str(), "" | "0" | "false"),
        _ => false,
    }
}

/// The error a finished job ended with, if any.
pub fn job_error(status: &JobStatus) -> Option<ErrorObject> {
    if !job_finished(status) {
        return None;
    }
    status
        .get("error")
        .filter(|error| !error.is_null())
        .map(ErrorObject::lenient)
}

/// The external job queue.
pub trait JobService: Send + Sync {
    /// Submit a job on behalf of the token's owner; returns the job id.
    fn run_job(
        &self,
        token: &str,
        params: RunJobParams,
    ) -> impl std::future::Future<Output = Result<String, RpcError>> + Send;

    fn check_job(
        &self,
        token: &str,
        job_id: &str,
    ) -> impl std::future::Future<Output = Result<JobStatus, RpcError>> + Send;
}

/// Job service reached over JSON-RPC. The URL is only checked when a job
/// call is actually made, so a server without one still serves sync calls.
#[derive(Debug, Clone)]
pub struct HttpJobService {
    url: Option<String>,
    timeout: Duration,
    client: OnceCell<JsonRpcClient>,
}

impl HttpJobService {
    pub fn new(url: Option<String>, timeout: Duration) -> Self {
        Self {
            url,
            timeout,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&JsonRpcClient, RpcError> {
        self.client
            .get_or_try_init(|| async {
                let url = self.url.as_deref().ok_or_else(|| {
                    RpcError::server_error(
                        "Neither 'job-service-url' parameter is defined in configuration \
                         nor 'KB_JOB_SERVICE_URL' variable is defined in system",
                    )
                })?;
                JsonRpcClient::new(url, self.timeout)
            })
            .await
    }
}

impl JobService for HttpJobService {
    async fn run_job(&self, token: &str, params: RunJobParams) -> Result<String, RpcError> {
        let client = self.client().await?;
        let params = serde_json::to_value(params)
            .map_err(|e| RpcError::server_error(format!("Failed to encode job params: {e}")))?;
        let result = client.call(RUN_JOB, vec![params], Some(token)).await?;
        match first(result)? {
            Value::String(job_id) => Ok(job_id),
            other => Ok(other.to_string()),
        }
    }

    async fn check_job(&self, token: &str, job_id: &str) -> Result<JobStatus, RpcError> {
        let client = self.client().await?;
        let result = client
            .call(CHECK_JOB, vec![json!(job_id)], Some(token))
            .await?;
        match first(result)? {
            Value::Object(status) => Ok(status),
            other => Err(RpcError::server_error(format!(
                "Malformed job status: {other}"
            ))),
        }
    }
}

fn first(result: Value) -> Result<Value, RpcError> {
    match result {
        Value::Array(mut values) if !values.is_empty() => Ok(values.swap_remove(0)),
        other => Err(RpcError::server_error(format!(
            "Job service returned an unexpected result: {other}"
        ))),
    }
}

/// Routes pseudo-method calls to a [`JobService`].
#[derive(Debug, Clone)]
pub struct AsyncJobBridge<J> {
    jobs: J,
}

impl<J: JobService> AsyncJobBridge<J> {
    pub fn new(jobs: J) -> Self {
        Self { jobs }
    }

    /// Submit `target` as a job. Returns `[job_id]`.
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        target: &MethodSpec,
        envelope: &RequestEnvelope,
    ) -> Result<Value, RpcError> {
        let token = authorized_token(ctx, target)?;
        let params = RunJobParams {
            method: target.name().to_string(),
            params: envelope.params.to_value(),
            rpc_context: ctx.rpc_context.clone(),
        };
        let job_id = self.jobs.run_job(token, params).await?;
        ctx.info(&format!("Submitted job {job_id} for {}", target.name()));
        Ok(json!([job_id]))
    }

    /// Poll a job. A finished job that failed is reported as this call's
    /// error; otherwise the status is returned as `[status]`.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        target: &MethodSpec,
        envelope: &RequestEnvelope,
    ) -> Result<Value, RpcError> {
        let token = authorized_token(ctx, target)?;
        let job_id = job_id_param(&envelope.params)?;
        let status = self.jobs.check_job(token, job_id).await?;
        debug!("Job {job_id} finished: {}", job_finished(&status));

        if let Some(error) = job_error(&status) {
            return Err(RpcError::upstream(error));
        }
        Ok(Value::Array(vec![Value::Object(status)]))
    }
}

/// Jobs only run for methods that require authentication, and always with
/// the caller's validated token.
fn authorized_token<'a>(ctx: &'a RequestContext, target: &MethodSpec) -> Result<&'a str, RpcError> {
    if target.auth() != AuthRequirement::Required {
        return Err(RpcError::server_error(format!(
            "Async method {} should require authentication, but it has authentication level: {}",
            target.name(),
            target.auth()
        )));
    }
    ctx.token().ok_or_else(|| {
        RpcError::authentication_required("Authentication is required for async methods")
    })
}

fn job_id_param(params: &Params) -> Result<&str, RpcError> {
    match params {
        Params::Positional(values) if values.len() == 1 => values[0]
            .as_str()
            .ok_or_else(|| RpcError::invalid_params("job id must be a string")),
        _ => Err(RpcError::invalid_params(
            "expected a single positional parameter: the job id",
        )),
    }
}
