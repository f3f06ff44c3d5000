//! Count-contigs RPC: server core
//!
//! The method registry, the dispatcher, the async job bridge, the
//! per-request pipeline behind the HTTP front door and the CLI batch runner.
//! The server owns the registry and provides the `RequestHandler`
//! implementation for the transport layer.

pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod jobs;
pub mod registry;
pub mod router;

pub use batch::{BatchRunner, ERROR_EXIT_CODE};
pub use config::{ConfigError, DEFAULT_SERVICE_NAME, ServiceConfig};
pub use dispatcher::Dispatcher;
pub use jobs::{
    AsyncJobBridge, HttpJobService, JobService, JobStatus, RunJobParams, job_error, job_finished,
};
pub use registry::{Arity, MethodRegistry, MethodSpec, ParamType, RegistryError};
pub use router::RpcServer;
