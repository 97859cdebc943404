//! Upload commands

use anyhow::{bail, Result};
use clap::Args;
use reclog_common::upload::MAX_BATCH_CONCURRENCY;
use reclog_common::{ListOptions, RecordingPredicate, UploadOptions, UploadOutcome};

use super::Context;
use crate::output::{print_error, print_message, print_success, print_warning, OutputFormat};

#[derive(Args)]
pub struct UploadArgs {
    /// Recording ID
    pub id: String,
}

#[derive(Args)]
pub struct UploadAllArgs {
    /// Filter expression selecting which recordings to upload
    #[arg(long)]
    pub filter: Option<String>,

    /// Also send crash reports for crashed recordings
    #[arg(long)]
    pub include_crashes: bool,

    /// Recordings uploaded at once
    #[arg(long)]
    pub batch_size: Option<usize>,
}

/// Describe an outcome for the user. Returns false when nothing was uploaded.
fn report_outcome(id: &str, outcome: &UploadOutcome, format: OutputFormat) -> bool {
    match outcome {
        UploadOutcome::Uploaded { remote_id } => {
            print_success(&format!("Uploaded {} as {}", id, remote_id));
            true
        }
        UploadOutcome::AlreadyUploaded { remote_id } => {
            print_message(&format!("{} was already uploaded as {}", id, remote_id), format);
            true
        }
        UploadOutcome::CrashReported => {
            print_success(&format!("Sent crash report for {}", id));
            true
        }
        UploadOutcome::Skipped(reason) => {
            print_warning(&format!("Skipped {}: {}", id, reason));
            false
        }
    }
}

pub async fn execute(args: UploadArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let outcome = ctx.uploader().upload_by_id(&args.id).await?;
    if !report_outcome(&args.id, &outcome, format) {
        bail!("Nothing uploaded for {}", args.id);
    }
    Ok(())
}

pub async fn execute_all(args: UploadAllArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let mut options = UploadOptions::from_config(&ctx.config);
    if let Some(batch_size) = args.batch_size {
        if batch_size > MAX_BATCH_CONCURRENCY {
            print_warning(&format!(
                "Batch size {} exceeds the limit, using {}",
                batch_size, MAX_BATCH_CONCURRENCY
            ));
        }
        options.concurrency = batch_size;
    }

    let list_options = ListOptions {
        predicate: RecordingPredicate::parse(args.filter.as_deref())?,
        include_crashes: args.include_crashes,
        ..Default::default()
    };

    let report = ctx.uploader_with(options).upload_matching(&list_options).await?;
    if report.items.is_empty() {
        print_message("No recordings to upload.", format);
        return Ok(());
    }

    for item in &report.items {
        match &item.result {
            Ok(outcome) => {
                report_outcome(&item.recording_id, outcome, format);
            }
            Err(e) => print_error(&format!("Failed to upload {}: {}", item.recording_id, e)),
        }
    }

    if !report.success() {
        let failed = report.failures().count();
        bail!("{} of {} uploads failed", failed, report.items.len());
    }
    Ok(())
}
