//! Asset reference tracking and recording removal
//!
//! Source maps are deduplicated on disk, so several recordings can point at
//! the same file. An asset is only deleted once no other local recording
//! that still needs it remains.

use crate::log::raw_owner_id;
use crate::registry::Registry;
use crate::types::{Recording, RecordingStatus};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Outcome of cleaning up one or more recordings
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupStats {
    pub removed_files: usize,
    pub shared_files_kept: usize,
}

/// Count how many recordings reference each asset path.
///
/// Every source map, its lookup file, and each original source count once per
/// referencing recording.
pub fn compute_usage<'a>(recordings: impl IntoIterator<Item = &'a Recording>) -> HashMap<PathBuf, usize> {
    let mut usage = HashMap::new();
    for recording in recordings {
        let distinct: HashSet<PathBuf> = recording.asset_paths().into_iter().collect();
        for path in distinct {
            *usage.entry(path).or_insert(0) += 1;
        }
    }
    usage
}

/// Recordings already on the server no longer need local assets.
fn still_needs_assets(recording: &Recording) -> bool {
    !matches!(
        recording.status,
        RecordingStatus::Uploaded | RecordingStatus::CrashUploaded
    )
}

/// Delete the files owned exclusively by `recording`, plus its data file.
pub async fn cleanup(recording: &Recording, all: &[Recording]) -> Result<CleanupStats> {
    let owners = all
        .iter()
        .filter(|r| r.id != recording.id && still_needs_assets(r))
        .chain(std::iter::once(recording));
    let usage = compute_usage(owners);

    let mut stats = CleanupStats::default();
    let assets: HashSet<PathBuf> = recording.asset_paths().into_iter().collect();

    for path in assets {
        let references = usage.get(&path).copied().unwrap_or(0);
        if references <= 1 {
            if remove_if_present(&path).await? {
                stats.removed_files += 1;
            }
        } else {
            debug!("Keeping {:?}, still used by {} recordings", path, references - 1);
            stats.shared_files_kept += 1;
        }
    }

    if let Some(path) = &recording.path {
        if remove_if_present(path).await? {
            stats.removed_files += 1;
        }
    }

    debug!(
        "Cleaned up {}: removed {} files, kept {} shared",
        recording.id, stats.removed_files, stats.shared_files_kept
    );
    Ok(stats)
}

async fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => {
            warn!("Failed to remove {:?}: {}", path, e);
            Err(e.into())
        }
    }
}

/// Remove a recording's local files and compact it out of the log.
pub async fn remove_recording(registry: &Registry, id: &str) -> Result<CleanupStats> {
    let all = registry.recordings().await?;
    let recording = all
        .iter()
        .find(|r| r.id == id)
        .ok_or_else(|| Error::recording_not_found(id))?;

    let stats = cleanup(recording, &all).await?;

    let log = registry.log();
    let kept: Vec<_> = log
        .read_all()
        .await?
        .into_iter()
        .filter(|raw| raw_owner_id(raw) != Some(id))
        .collect();
    log.rewrite(&kept).await?;

    info!("Removed recording {}", id);
    Ok(stats)
}

/// Remove every recording and its files, leaving an empty log.
pub async fn remove_all_recordings(registry: &Registry) -> Result<CleanupStats> {
    let all = registry.recordings().await?;
    let mut stats = CleanupStats::default();

    let mut files: HashSet<PathBuf> = HashSet::new();
    for recording in &all {
        files.extend(recording.asset_paths());
        files.extend(recording.path.clone());
    }
    for path in files {
        if remove_if_present(&path).await? {
            stats.removed_files += 1;
        }
    }

    registry.log().rewrite(&[]).await?;

    info!("Removed {} recordings ({} files)", all.len(), stats.removed_files);
    Ok(stats)
}
