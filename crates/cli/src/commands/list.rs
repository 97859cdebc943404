//! Recording listing

use anyhow::Result;
use clap::Args;
use reclog_common::{ListOptions, Recording, RecordingPredicate};
use serde::Serialize;

use super::Context;
use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct ListArgs {
    /// Include uploaded, unusable and other ineligible recordings
    #[arg(short, long)]
    pub all: bool,

    /// Filter expression, e.g. `runtime=chromium && status!=uploaded`
    #[arg(long)]
    pub filter: Option<String>,

    /// Keep crashed recordings even when the filter rejects them
    #[arg(long)]
    pub include_crashes: bool,

    /// Show recordings from processes that captured nothing
    #[arg(long)]
    pub include_hidden: bool,
}

/// Recording display wrapper for serialization
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingDisplay {
    pub id: String,
    pub status: String,
    pub title: String,
    pub runtime: String,
    pub created: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unusable_reason: Option<String>,
}

impl From<&Recording> for RecordingDisplay {
    fn from(recording: &Recording) -> Self {
        Self {
            id: recording.id.clone(),
            status: recording.status.to_string(),
            title: recording.title().unwrap_or_default().to_string(),
            runtime: recording.runtime.clone(),
            created: recording.create_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            remote_id: recording.remote_id.clone(),
            unusable_reason: recording.unusable_reason.clone(),
        }
    }
}

impl TableDisplay for RecordingDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Status", "Title", "Runtime", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.status.clone(),
            self.title.clone(),
            self.runtime.clone(),
            self.created.clone(),
        ]
    }
}

/// Order recordings for display: problems first, then by title.
pub fn sort_for_display(recordings: &mut [Recording]) {
    recordings.sort_by(|a, b| {
        a.status
            .severity()
            .cmp(&b.status.severity())
            .then_with(|| a.title().unwrap_or_default().cmp(b.title().unwrap_or_default()))
    });
}

pub async fn execute(args: ListArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let options = ListOptions {
        predicate: RecordingPredicate::parse(args.filter.as_deref())?,
        include_crashes: args.include_crashes,
        include_hidden: args.include_hidden,
        all: args.all,
    };

    let mut recordings = ctx.registry.list(&options).await?;
    sort_for_display(&mut recordings);

    let displays: Vec<RecordingDisplay> = recordings.iter().map(RecordingDisplay::from).collect();
    print_list(&displays, format);
    Ok(())
}
