//! Count contigs: the one domain method this service exposes.

use anyhow::{Context, anyhow};
use ccrpc_protocol::RequestContext;
use serde_json::{Value, json};

use crate::Handler;
use crate::workspace::WorkspaceStore;

pub const MODULE: &str = "wjr_count_contigs";
pub const COUNT_CONTIGS: &str = "wjr_count_contigs.count_contigs";

/// Counts the contigs of a ContigSet object.
pub struct CountContigs<S> {
    store: S,
}

impl<S: WorkspaceStore> CountContigs<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: WorkspaceStore> Handler for CountContigs<S> {
    async fn call(&self, ctx: &RequestContext, args: Vec<Value>) -> anyhow::Result<Value> {
        let workspace = string_arg(&args, 0, "workspace_name")?;
        let contigset_id = string_arg(&args, 1, "contigset_id")?;

        ctx.debug(&format!("Fetching {workspace}/{contigset_id}"));
        let contig_set = self
            .store
            .get_object(workspace, contigset_id, ctx.token())
            .await?;

        let count = contig_set
            .get("contigs")
            .and_then(Value::as_array)
            .map(Vec::len)
            .ok_or_else(|| anyhow!("{workspace}/{contigset_id} is not a ContigSet: no contigs list"))?;

        ctx.info(&format!("{workspace}/{contigset_id} has {count} contigs"));
        Ok(json!([{ "contig_count": count }]))
    }
}

fn string_arg<'a>(args: &'a [Value], index: usize, name: &str) -> anyhow::Result<&'a str> {
    args.get(index)
        .and_then(Value::as_str)
        .with_context(|| format!("{name} must be a string"))
}
