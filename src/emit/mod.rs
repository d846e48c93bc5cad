mod m3u;
mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::library::{NodeId, PlaylistForest, Track};
use crate::naming::{NamingError, ScopeId, UniqueNameResolver};
use crate::path_validator::{PathPolicy, PathValidator, RejectReason, ValidatedPath};
use crate::sync::SyncEntry;

pub use sink::{DryRunSink, FilesystemSink, OutputSink};

#[cfg(test)]
pub use sink::MockOutputSink;

pub const DEFAULT_FLAT_SEPARATOR: &str = " - ";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// One directory per playlist, mirroring the hierarchy
    #[default]
    Nested,
    /// Every playlist file directly in the output directory
    Flat,
}

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error("Write failure during {operation} on {path}: {error_message}")]
    WriteFailure {
        operation: String,
        path: String,
        error_message: String,
    },

    #[error("Refusing to clean output directory {path}: {reason}")]
    UnsafeOutputDirectory { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTrack {
    pub track: Arc<Track>,
    pub path: ValidatedPath,
}

impl ValidatedTrack {
    pub fn destination_path(&self) -> &str {
        &self.path.destination
    }
}

/// A track left out of the output because its path failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub path: String,
    pub reason: RejectReason,
    pub detail: String,
    pub playlist: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPlaylist {
    /// Raw ancestry, e.g. `House / Deep`
    pub playlist: String,
    pub file: PathBuf,
    pub tracks: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EmitReport {
    pub playlists: Vec<WrittenPlaylist>,
    pub directories: Vec<PathBuf>,
    pub rejections: Vec<Rejection>,
    pub accepted: Vec<ValidatedTrack>,
    /// Raw names that sanitized to nothing and got the fallback name
    pub fallback_names: Vec<String>,
}

impl EmitReport {
    pub fn track_count(&self) -> usize {
        self.playlists.iter().map(|playlist| playlist.tracks).sum()
    }

    /// Accepted tracks, once per local file, in first-seen order
    pub fn sync_plan(&self) -> Vec<SyncEntry> {
        crate::sync::plan(&self.accepted)
    }
}

#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub layout: Layout,
    pub output_dir: PathBuf,
    pub flat_separator: String,
}

impl EmitOptions {
    pub fn new(layout: Layout, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout,
            output_dir: output_dir.into(),
            flat_separator: DEFAULT_FLAT_SEPARATOR.to_string(),
        }
    }
}

enum Visit {
    Enter {
        node: NodeId,
        scope: ScopeId,
        parent_dir: PathBuf,
    },
    Leave(ScopeId),
}

/// Walks a playlist forest depth-first and writes one `.m3u` file per
/// playlist that still has tracks after path validation.
pub struct PlaylistEmitter<'a, P: PathPolicy> {
    validator: &'a PathValidator<P>,
    resolver: UniqueNameResolver,
    options: EmitOptions,
}

impl<'a, P: PathPolicy> PlaylistEmitter<'a, P> {
    pub fn new(
        validator: &'a PathValidator<P>,
        resolver: UniqueNameResolver,
        options: EmitOptions,
    ) -> Self {
        Self {
            validator,
            resolver,
            options,
        }
    }

    pub fn emit<S: OutputSink + ?Sized>(
        mut self,
        forest: &PlaylistForest,
        sink: &mut S,
    ) -> Result<EmitReport, EmitError> {
        let mut report = EmitReport::default();
        let order = forest.depth_first();

        let mut valid: Vec<Vec<ValidatedTrack>> = vec![Vec::new(); forest.len()];
        for &id in &order {
            valid[id.index()] = self.validate_tracks(forest, id, &mut report);
        }

        let mut has_output = vec![false; forest.len()];
        for &id in order.iter().rev() {
            let node = forest.node(id);
            has_output[id.index()] = !valid[id.index()].is_empty()
                || node.children.iter().any(|child| has_output[child.index()]);
        }

        match self.options.layout {
            Layout::Nested => self.emit_nested(forest, &valid, &has_output, sink, &mut report)?,
            Layout::Flat => self.emit_flat(forest, &order, &valid, sink, &mut report)?,
        }

        for tracks in valid {
            report.accepted.extend(tracks);
        }
        Ok(report)
    }

    fn validate_tracks(
        &self,
        forest: &PlaylistForest,
        id: NodeId,
        report: &mut EmitReport,
    ) -> Vec<ValidatedTrack> {
        let node = forest.node(id);
        let mut accepted = Vec::with_capacity(node.tracks.len());
        for track in &node.tracks {
            match self.validator.validate(&track.source_path) {
                Ok(path) => accepted.push(ValidatedTrack {
                    track: Arc::clone(track),
                    path,
                }),
                Err(rejection) => {
                    log::debug!("{}", rejection);
                    report.rejections.push(Rejection {
                        path: rejection.path,
                        reason: rejection.reason,
                        detail: rejection.detail,
                        playlist: forest.ancestry(id).join(" / "),
                    });
                }
            }
        }
        if accepted.is_empty() && !node.tracks.is_empty() {
            log::warn!("Playlist '{}' has no valid tracks", node.name);
        }
        accepted
    }

    fn emit_nested<S: OutputSink + ?Sized>(
        &mut self,
        forest: &PlaylistForest,
        valid: &[Vec<ValidatedTrack>],
        has_output: &[bool],
        sink: &mut S,
        report: &mut EmitReport,
    ) -> Result<(), EmitError> {
        let mut stack: Vec<Visit> = forest
            .roots()
            .iter()
            .rev()
            .map(|&node| Visit::Enter {
                node,
                scope: ScopeId::Root,
                parent_dir: self.options.output_dir.clone(),
            })
            .collect();

        while let Some(visit) = stack.pop() {
            let (node_id, scope, parent_dir) = match visit {
                Visit::Leave(scope) => {
                    self.resolver.reset(scope);
                    continue;
                }
                Visit::Enter {
                    node,
                    scope,
                    parent_dir,
                } => (node, scope, parent_dir),
            };
            if !has_output[node_id.index()] {
                continue;
            }

            let node = forest.node(node_id);
            let dir_name = self.claim(scope, &node.name, None, report)?;
            let dir = parent_dir.join(&dir_name);
            sink.create_dir(&dir).map_err(|e| EmitError::WriteFailure {
                operation: "create directory".to_string(),
                path: dir.display().to_string(),
                error_message: e.to_string(),
            })?;
            log::debug!("Created directory {}", dir.display());
            report.directories.push(dir.clone());

            let own_scope = ScopeId::Node(node_id);
            let tracks = &valid[node_id.index()];
            if !tracks.is_empty() {
                let file_name = self.claim(own_scope, &dir_name, Some(m3u::EXTENSION), report)?;
                self.write_playlist(forest, node_id, &dir.join(file_name), tracks, sink, report)?;
            }

            stack.push(Visit::Leave(own_scope));
            stack.extend(node.children.iter().rev().map(|&child| Visit::Enter {
                node: child,
                scope: own_scope,
                parent_dir: dir.clone(),
            }));
        }
        Ok(())
    }

    fn emit_flat<S: OutputSink + ?Sized>(
        &mut self,
        forest: &PlaylistForest,
        order: &[NodeId],
        valid: &[Vec<ValidatedTrack>],
        sink: &mut S,
        report: &mut EmitReport,
    ) -> Result<(), EmitError> {
        if valid.iter().any(|tracks| !tracks.is_empty()) {
            let dir = &self.options.output_dir;
            sink.create_dir(dir).map_err(|e| EmitError::WriteFailure {
                operation: "create directory".to_string(),
                path: dir.display().to_string(),
                error_message: e.to_string(),
            })?;
        }

        for &id in order {
            let tracks = &valid[id.index()];
            if tracks.is_empty() {
                continue;
            }
            let joined = forest.ancestry(id).join(&self.options.flat_separator);
            let file_name = self.claim(ScopeId::Root, &joined, Some(m3u::EXTENSION), report)?;
            let path = self.options.output_dir.join(file_name);
            self.write_playlist(forest, id, &path, tracks, sink, report)?;
        }
        self.resolver.reset(ScopeId::Root);
        Ok(())
    }

    /// Directories are claimed with `extension: None`, playlist files with
    /// their extension. `raw` is what gets reported on fallback or failure.
    fn claim(
        &mut self,
        scope: ScopeId,
        raw: &str,
        extension: Option<&str>,
        report: &mut EmitReport,
    ) -> Result<String, EmitError> {
        let resolved = match extension {
            Some(extension) => self.resolver.resolve_file(scope, raw, extension),
            None => self.resolver.resolve(scope, raw, true),
        };
        let resolved = resolved.map_err(|e| {
            log::error!("Naming failed for '{}' in {}: {}", raw, scope, e);
            e
        })?;
        if resolved.used_fallback {
            report.fallback_names.push(raw.to_string());
        }
        Ok(resolved.name)
    }

    fn write_playlist<S: OutputSink + ?Sized>(
        &self,
        forest: &PlaylistForest,
        id: NodeId,
        path: &Path,
        tracks: &[ValidatedTrack],
        sink: &mut S,
        report: &mut EmitReport,
    ) -> Result<(), EmitError> {
        sink.write_file(path, &m3u::render(tracks))
            .map_err(|e| EmitError::WriteFailure {
                operation: "write playlist".to_string(),
                path: path.display().to_string(),
                error_message: e.to_string(),
            })?;
        log::info!(
            "Created playlist: {} with {} tracks",
            path.display(),
            tracks.len()
        );
        report.playlists.push(WrittenPlaylist {
            playlist: forest.ancestry(id).join(" / "),
            file: path.to_path_buf(),
            tracks: tracks.len(),
        });
        Ok(())
    }
}

/// Remove `dir` if it exists and recreate it empty. Refuses the filesystem
/// root, the home directory and any directory holding one of `protected`.
pub fn clean_output_directory(dir: &Path, protected: &[&Path]) -> Result<(), EmitError> {
    let unsafe_dir = |reason: &str| EmitError::UnsafeOutputDirectory {
        path: dir.display().to_string(),
        reason: reason.to_string(),
    };

    if dir.exists() {
        let canonical = std::fs::canonicalize(dir).map_err(|e| EmitError::WriteFailure {
            operation: "resolve output directory".to_string(),
            path: dir.display().to_string(),
            error_message: e.to_string(),
        })?;
        if canonical.parent().is_none() {
            return Err(unsafe_dir("it is the filesystem root"));
        }
        if dirs::home_dir()
            .and_then(|home| std::fs::canonicalize(home).ok())
            .is_some_and(|home| home == canonical)
        {
            return Err(unsafe_dir("it is the home directory"));
        }
        for path in protected {
            let inside = std::fs::canonicalize(path)
                .map(|p| p.starts_with(&canonical))
                .unwrap_or(false);
            if inside {
                return Err(unsafe_dir(&format!("it contains {}", path.display())));
            }
        }

        log::info!("Cleaning output directory: {}", dir.display());
        std::fs::remove_dir_all(dir).map_err(|e| EmitError::WriteFailure {
            operation: "remove output directory".to_string(),
            path: dir.display().to_string(),
            error_message: e.to_string(),
        })?;
    }

    std::fs::create_dir_all(dir).map_err(|e| EmitError::WriteFailure {
        operation: "create output directory".to_string(),
        path: dir.display().to_string(),
        error_message: e.to_string(),
    })?;
    log::info!("Created clean output directory: {}", dir.display());
    Ok(())
}

/// Every `.m3u` file under `dir`, sorted
pub fn list_playlist_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == m3u::EXTENSION))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests;
