//! Metadata command

use anyhow::{bail, Context as _, Result};
use clap::Args;
use reclog_common::Metadata;
use serde_json::Value;

use super::Context;
use crate::output::print_success;

#[derive(Args)]
pub struct MetadataArgs {
    /// Recording ID
    pub id: String,

    /// JSON object merged into the recording's metadata
    pub json: String,
}

fn parse_metadata(json: &str) -> Result<Metadata> {
    let value: Value = serde_json::from_str(json).context("metadata is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("metadata must be a JSON object"),
    }
}

pub async fn execute(args: MetadataArgs, ctx: &Context) -> Result<()> {
    let metadata = parse_metadata(&args.json)?;
    ctx.registry.add_metadata(&args.id, metadata).await?;
    print_success(&format!("Metadata added to '{}'", args.id));
    Ok(())
}
