use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::emit::ValidatedTrack;

/// One accepted media file, as seen by a file-sync collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncEntry {
    pub destination_path: String,
    /// Path below both the source and the destination root, `/`-separated
    pub relative_path: String,
    pub source_path: PathBuf,
    pub exists_locally: bool,
}

/// Deduplicate accepted tracks by their resolved local file
pub fn plan(accepted: &[ValidatedTrack]) -> Vec<SyncEntry> {
    let mut seen = HashSet::new();
    accepted
        .iter()
        .filter(|entry| seen.insert(entry.path.resolved.clone()))
        .map(|entry| SyncEntry {
            destination_path: entry.path.destination.clone(),
            relative_path: entry.path.relative.clone(),
            source_path: entry.path.resolved.clone(),
            exists_locally: entry.path.exists_locally,
        })
        .collect()
}

/// The library copy on the playback host
#[cfg_attr(test, mockall::automock)]
pub trait SyncTarget {
    fn exists(&self, relative_path: &str) -> io::Result<bool>;

    fn upload(&self, source: &Path, relative_path: &str) -> io::Result<()>;
}

/// A playback host library mounted into the local filesystem
#[derive(Debug, Clone)]
pub struct MountedShare {
    root: PathBuf,
}

impl MountedShare {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target_path(&self, relative_path: &str) -> PathBuf {
        relative_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

impl SyncTarget for MountedShare {
    fn exists(&self, relative_path: &str) -> io::Result<bool> {
        self.target_path(relative_path).try_exists()
    }

    fn upload(&self, source: &Path, relative_path: &str) -> io::Result<()> {
        let target = self.target_path(relative_path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, &target)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub checked: usize,
    pub missing: usize,
    pub synced: usize,
    pub failed: usize,
    /// Referenced by a playlist but absent on this machine too
    pub missing_locally: usize,
}

/// Copy every planned file the target does not have yet. Per-file failures
/// are logged and counted, never fatal.
pub fn sync_missing<T: SyncTarget + ?Sized>(
    plan: &[SyncEntry],
    target: &T,
    check_only: bool,
) -> SyncSummary {
    let mut summary = SyncSummary::default();
    let mut missing = Vec::new();

    for entry in plan {
        summary.checked += 1;
        match target.exists(&entry.relative_path) {
            Ok(true) => {}
            Ok(false) => missing.push(entry),
            Err(e) => {
                log::warn!(
                    "Could not check {} on sync target: {}",
                    entry.relative_path,
                    e
                );
                missing.push(entry);
            }
        }
    }
    summary.missing = missing.len();
    log::info!("Found {} missing files on sync target", summary.missing);

    if check_only {
        for entry in &missing {
            log::info!("Missing: {}", entry.destination_path);
        }
        return summary;
    }

    for entry in missing {
        if !entry.exists_locally {
            log::warn!(
                "Cannot sync {}: source file does not exist locally",
                entry.source_path.display()
            );
            summary.missing_locally += 1;
            continue;
        }
        match target.upload(&entry.source_path, &entry.relative_path) {
            Ok(()) => {
                log::info!(
                    "Synced file: {} -> {}",
                    entry.source_path.display(),
                    entry.relative_path
                );
                summary.synced += 1;
            }
            Err(e) => {
                log::error!("Failed to sync file {}: {}", entry.source_path.display(), e);
                summary.failed += 1;
            }
        }
    }
    summary
}
