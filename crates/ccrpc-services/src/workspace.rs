//! Workspace store: where contig sets live.

use std::time::Duration;

use anyhow::{Context, anyhow};
use ccrpc_transport::JsonRpcClient;
use serde_json::{Value, json};

/// Read access to workspace objects.
pub trait WorkspaceStore: Send + Sync {
    /// Fetch the data of object `name` in `workspace`.
    fn get_object(
        &self,
        workspace: &str,
        name: &str,
        token: Option<&str>,
    ) -> impl std::future::Future<Output = anyhow::Result<Value>> + Send;
}

/// Workspace service reached over JSON-RPC. Without a URL every fetch
/// fails, so a misconfigured server still starts and reports the problem
/// per call.
#[derive(Debug, Clone)]
pub struct HttpWorkspaceStore {
    client: Option<JsonRpcClient>,
}

impl HttpWorkspaceStore {
    pub fn new(url: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let client = url.map(|url| JsonRpcClient::new(url, timeout)).transpose()?;
        Ok(Self { client })
    }
}

impl WorkspaceStore for HttpWorkspaceStore {
    async fn get_object(
        &self,
        workspace: &str,
        name: &str,
        token: Option<&str>,
    ) -> anyhow::Result<Value> {
        let client = self
            .client
            .as_ref()
            .context("'workspace-url' is not defined in configuration")?;
        let reference = format!("{workspace}/{name}");
        let mut result = client
            .call(
                "Workspace.get_objects",
                vec![json!([{ "ref": reference }])],
                token,
            )
            .await
            .with_context(|| format!("Failed to fetch {reference}"))?;

        result
            .get_mut(0)
            .and_then(|objects| objects.get_mut(0))
            .and_then(|object| object.get_mut("data"))
            .map(Value::take)
            .ok_or_else(|| anyhow!("Workspace returned no data for {reference}"))
    }
}
