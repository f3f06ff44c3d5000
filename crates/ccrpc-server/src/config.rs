//! Deployment configuration.
//!
//! A JSON file, either flat or with one section per service. The file path
//! comes from the command line or `KB_DEPLOYMENT_CONFIG`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::jobs::DEFAULT_JOB_SERVICE_TIMEOUT;

pub const DEFAULT_SERVICE_NAME: &str = "wjr_count_contigs";

/// Environment variables consulted while loading.
pub const DEPLOYMENT_CONFIG_ENV: &str = "KB_DEPLOYMENT_CONFIG";
pub const SERVICE_NAME_ENV: &str = "KB_SERVICE_NAME";
pub const JOB_SERVICE_URL_ENV: &str = "KB_JOB_SERVICE_URL";

const DEFAULT_AUTH_SERVICE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "job-service-url", default)]
    pub job_service_url: Option<String>,
    #[serde(rename = "auth-service-url", default)]
    pub auth_service_url: Option<String>,
    #[serde(rename = "workspace-url", default)]
    pub workspace_url: Option<String>,
    /// Bool-like string; `"true"` stops the front door from trusting
    /// `X-Forwarded-For` and `X-Real-IP`.
    #[serde(rename = "dont_trust_x_ip_headers", default)]
    pub dont_trust_x_ip_headers: Option<String>,
    #[serde(rename = "job-service-timeout-secs", default)]
    pub job_service_timeout_secs: Option<u64>,
    #[serde(rename = "auth-service-timeout-secs", default)]
    pub auth_service_timeout_secs: Option<u64>,
    #[serde(rename = "workspace-timeout-secs", default)]
    pub workspace_timeout_secs: Option<u64>,
}

impl ServiceConfig {
    /// Load from `path`, or from `KB_DEPLOYMENT_CONFIG` when no path is
    /// given, then apply environment overrides. No file at all yields the
    /// defaults.
    pub fn load(path: Option<&Path>, service_name: &str) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(DEPLOYMENT_CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                Self::from_json(&text, service_name)?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a config document. A top-level object named after the service
    /// is used as the section; otherwise the document itself is.
    pub fn from_json(text: &str, service_name: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_json::from_str(text)?;
        let section = match document {
            Value::Object(mut sections)
                if sections.get(service_name).is_some_and(Value::is_object) =>
            {
                sections.remove(service_name).unwrap_or_default()
            }
            other => other,
        };
        Ok(serde_json::from_value(section)?)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(JOB_SERVICE_URL_ENV) {
            if !url.trim().is_empty() {
                self.job_service_url = Some(url);
            }
        }
    }

    pub fn trust_x_ip_headers(&self) -> bool {
        !self
            .dont_trust_x_ip_headers
            .as_deref()
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }

    pub fn job_service_timeout(&self) -> Duration {
        self.job_service_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_JOB_SERVICE_TIMEOUT)
    }

    /// Workspace fetches share the job-service bound unless set.
    pub fn workspace_timeout(&self) -> Duration {
        self.workspace_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.job_service_timeout())
    }

    pub fn auth_service_timeout(&self) -> Duration {
        Duration::from_secs(
            self.auth_service_timeout_secs
                .unwrap_or(DEFAULT_AUTH_SERVICE_TIMEOUT_SECS),
        )
    }
}

/// Service name from `KB_SERVICE_NAME`, or the default.
pub fn service_name_from_env() -> String {
    std::env::var(SERVICE_NAME_ENV)
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string())
}
