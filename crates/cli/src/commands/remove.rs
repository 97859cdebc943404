//! Recording removal

use anyhow::Result;
use clap::Args;
use reclog_common::{remove_all_recordings, remove_recording};

use super::Context;
use crate::output::print_success;

#[derive(Args)]
pub struct RemoveArgs {
    /// Recording ID
    pub id: String,
}

pub async fn execute(args: RemoveArgs, ctx: &Context) -> Result<()> {
    let stats = remove_recording(&ctx.registry, &args.id).await?;
    print_success(&format!(
        "Recording '{}' removed ({} files deleted, {} shared files kept)",
        args.id, stats.removed_files, stats.shared_files_kept
    ));
    Ok(())
}

pub async fn execute_all(ctx: &Context) -> Result<()> {
    let stats = remove_all_recordings(&ctx.registry).await?;
    print_success(&format!("All recordings removed ({} files deleted)", stats.removed_files));
    Ok(())
}
