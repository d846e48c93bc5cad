use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    OutsideRoot,
    Unresolvable,
    NotAFile,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RejectReason::OutsideRoot => "outside-root",
            RejectReason::Unresolvable => "unresolvable",
            RejectReason::NotAFile => "not-a-file",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Rejected {path} ({reason}): {detail}")]
pub struct PathRejection {
    pub path: String,
    pub reason: RejectReason,
    pub detail: String,
}

impl PathRejection {
    fn new(path: &Path, reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            path: path.display().to_string(),
            reason,
            detail: detail.into(),
        }
    }
}

/// A media path that passed containment validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath {
    /// Fully resolved path on the local machine
    pub resolved: PathBuf,
    /// `resolved` relative to the source root, `/`-joined
    pub relative: String,
    /// `relative` re-rooted under the destination root
    pub destination: String,
    pub exists_locally: bool,
}

/// How paths are canonicalized and compared on the source filesystem.
pub trait PathPolicy {
    /// Canonicalize an existing path, resolving every symlink
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    fn is_file(&self, path: &Path) -> bool;

    fn exists(&self, path: &Path) -> bool;

    fn is_symlink(&self, path: &Path) -> bool;

    fn same_component(&self, a: &OsStr, b: &OsStr) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem {
    pub case_insensitive: bool,
}

impl PathPolicy for LocalFilesystem {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_symlink(&self, path: &Path) -> bool {
        path.is_symlink()
    }

    fn same_component(&self, a: &OsStr, b: &OsStr) -> bool {
        if !self.case_insensitive {
            return a == b;
        }
        match (a.to_str(), b.to_str()) {
            (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => a == b,
        }
    }
}

pub struct PathValidator<P: PathPolicy = LocalFilesystem> {
    source_root: PathBuf,
    destination_root: String,
    policy: P,
}

impl PathValidator<LocalFilesystem> {
    pub fn local(source_root: &Path, destination_root: &str, case_insensitive: bool) -> io::Result<Self> {
        Self::new(source_root, destination_root, LocalFilesystem { case_insensitive })
    }
}

impl<P: PathPolicy> PathValidator<P> {
    /// The source root must exist; it is canonicalized once up front.
    pub fn new(source_root: &Path, destination_root: &str, policy: P) -> io::Result<Self> {
        let source_root = policy.canonicalize(source_root)?;
        Ok(Self {
            source_root,
            destination_root: destination_root.trim_end_matches('/').to_string(),
            policy,
        })
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn destination_root(&self) -> &str {
        if self.destination_root.is_empty() {
            "/"
        } else {
            &self.destination_root
        }
    }

    pub fn validate(&self, candidate: &Path) -> Result<ValidatedPath, PathRejection> {
        check_well_formed(candidate)?;

        let resolved = self.resolve(candidate)?;

        let relative = self.strip_root(&resolved).ok_or_else(|| {
            PathRejection::new(
                candidate,
                RejectReason::OutsideRoot,
                format!(
                    "resolves to {} which is not inside {}",
                    resolved.display(),
                    self.source_root.display()
                ),
            )
        })?;

        let exists_locally = self.policy.exists(&resolved);
        if exists_locally && !self.policy.is_file(&resolved) {
            return Err(PathRejection::new(
                candidate,
                RejectReason::NotAFile,
                "path exists but is not a regular file",
            ));
        }

        let mut segments = Vec::with_capacity(relative.len());
        for segment in &relative {
            let segment = segment.to_str().ok_or_else(|| {
                PathRejection::new(candidate, RejectReason::Unresolvable, "segment is not valid UTF-8")
            })?;
            segments.push(segment);
        }
        let relative = segments.join("/");
        let destination = format!("{}/{}", self.destination_root, relative);

        Ok(ValidatedPath {
            resolved,
            relative,
            destination,
            exists_locally,
        })
    }

    /// Canonicalize the longest existing ancestor, then walk the missing
    /// tail one component at a time, re-canonicalizing whenever the path
    /// exists again so a symlink reached through `..` is still resolved.
    fn resolve(&self, candidate: &Path) -> Result<PathBuf, PathRejection> {
        let unresolvable =
            |detail: String| PathRejection::new(candidate, RejectReason::Unresolvable, detail);

        let mut existing = candidate.to_path_buf();
        let mut pending: Vec<Option<OsString>> = Vec::new();

        let mut resolved = loop {
            match self.policy.canonicalize(&existing) {
                Ok(canonical) => break canonical,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if self.policy.is_symlink(&existing) {
                        return Err(unresolvable(format!(
                            "{} is a dangling symlink",
                            existing.display()
                        )));
                    }
                    let tail = match existing.components().next_back() {
                        Some(Component::Normal(name)) => Some(name.to_os_string()),
                        Some(Component::ParentDir) => None,
                        _ => return Err(unresolvable("no existing ancestor".to_string())),
                    };
                    let Some(parent) = existing.parent() else {
                        return Err(unresolvable("no existing ancestor".to_string()));
                    };
                    pending.push(tail);
                    existing = parent.to_path_buf();
                }
                Err(e) => return Err(unresolvable(e.to_string())),
            }
        };

        for part in pending.into_iter().rev() {
            let Some(name) = part else {
                resolved.pop();
                continue;
            };
            resolved.push(name);
            match self.policy.canonicalize(&resolved) {
                Ok(canonical) => resolved = canonical,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if self.policy.is_symlink(&resolved) {
                        return Err(unresolvable(format!(
                            "{} is a dangling symlink",
                            resolved.display()
                        )));
                    }
                }
                Err(e) => return Err(unresolvable(e.to_string())),
            }
        }
        Ok(resolved)
    }

    fn strip_root<'a>(&self, resolved: &'a Path) -> Option<Vec<&'a OsStr>> {
        let mut candidate = resolved.components();
        for root_component in self.source_root.components() {
            let next = candidate.next()?;
            let matches = match (root_component, next) {
                (Component::Normal(a), Component::Normal(b)) => self.policy.same_component(a, b),
                (a, b) => a == b,
            };
            if !matches {
                return None;
            }
        }
        candidate
            .map(|component| match component {
                Component::Normal(name) => Some(name),
                _ => None,
            })
            .collect()
    }
}

fn check_well_formed(candidate: &Path) -> Result<(), PathRejection> {
    let reject = |detail: &str| Err(PathRejection::new(candidate, RejectReason::Unresolvable, detail));

    if candidate.as_os_str().is_empty() {
        return reject("empty path");
    }
    if !candidate.is_absolute() {
        return reject("path is not absolute");
    }
    let Some(text) = candidate.to_str() else {
        return reject("path is not valid UTF-8");
    };
    if text.contains(['\0', '\n', '\r']) {
        return reject("path contains NUL or line break characters");
    }
    Ok(())
}
