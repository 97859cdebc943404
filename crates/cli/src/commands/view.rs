//! View command

use anyhow::{bail, Result};
use clap::Args;
use reclog_common::{SystemOpener, Viewer};

use super::Context;
use crate::output::print_success;

#[derive(Args)]
pub struct ViewArgs {
    /// Recording ID
    pub id: String,
}

pub async fn execute(args: ViewArgs, ctx: &Context) -> Result<()> {
    let viewer = Viewer::new(ctx.uploader(), ctx.config.view_server.clone(), SystemOpener);
    if !viewer.view_recording(&args.id).await? {
        bail!("Recording {} cannot be viewed", args.id);
    }
    print_success(&format!("Opened {}", args.id));
    Ok(())
}
