use std::collections::{HashMap, HashSet};
use std::fmt;

use unicode_normalization::UnicodeNormalization;

use crate::library::NodeId;
use crate::naming::sanitize::{NameSanitizer, SanitizedName};

pub const DEFAULT_COLLISION_BOUND: u32 = 10_000;

/// One sibling group: the children of a playlist node, or the top level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeId {
    Root,
    Node(NodeId),
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeId::Root => f.write_str("root"),
            ScopeId::Node(id) => write!(f, "playlist #{}", id.index()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("Gave up finding a unique name for '{raw}' in {scope} after {bound} suffixes")]
    CollisionBoundExceeded {
        raw: String,
        scope: ScopeId,
        bound: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub name: String,
    pub used_fallback: bool,
}

/// Names already handed out in one scope, plus the next suffix to try for
/// each base name.
#[derive(Debug, Default)]
pub struct NameRegistry {
    counters: HashMap<String, u32>,
    taken: HashSet<String>,
    fold_case: bool,
}

impl NameRegistry {
    pub fn new(fold_case: bool) -> Self {
        Self {
            fold_case,
            ..Default::default()
        }
    }

    /// Canonically equivalent spellings (`"Café"` precomposed or with a
    /// combining accent) share one key, as on APFS and HFS+.
    fn key(&self, name: &str) -> String {
        let composed: String = name.nfc().collect();
        if self.fold_case {
            composed.to_lowercase()
        } else {
            composed
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.taken.len()
    }

    /// Claim `base` or its first free `"<stem> (<n>)<ext>"` variant.
    /// Returns `None` once `n` would pass `bound`.
    fn claim(&mut self, base: &SanitizedName, sanitizer: &NameSanitizer, bound: u32) -> Option<String> {
        let value = base.value();
        let base_key = self.key(&value);

        if !self.taken.contains(&base_key) {
            self.taken.insert(base_key.clone());
            self.counters.entry(base_key).or_insert(0);
            return Some(value);
        }

        let mut n = self.counters.get(&base_key).copied().unwrap_or(0);
        loop {
            n += 1;
            if n > bound {
                return None;
            }
            let candidate = sanitizer.fit(&base.stem, &format!(" ({n})"), &base.extension);
            let candidate_key = self.key(&candidate);
            if self.taken.insert(candidate_key) {
                self.counters.insert(base_key, n);
                return Some(candidate);
            }
        }
    }
}

/// Hands out sanitized, collision-free names per scope. Resolution order is
/// the caller's traversal order: the first request for a base name keeps it
/// unsuffixed.
#[derive(Debug)]
pub struct UniqueNameResolver {
    sanitizer: NameSanitizer,
    fold_case: bool,
    bound: u32,
    scopes: HashMap<ScopeId, NameRegistry>,
}

impl UniqueNameResolver {
    pub fn new(sanitizer: NameSanitizer, fold_case: bool, bound: u32) -> Self {
        Self {
            sanitizer,
            fold_case,
            bound,
            scopes: HashMap::new(),
        }
    }

    pub fn resolve(
        &mut self,
        scope: ScopeId,
        raw: &str,
        is_directory: bool,
    ) -> Result<ResolvedName, NamingError> {
        let base = self.sanitizer.sanitize(raw, is_directory);
        self.claim(scope, raw, base)
    }

    /// Resolve a file named after `raw` with a fixed `extension`. Warnings
    /// and errors carry `raw` itself, not the file name.
    pub fn resolve_file(
        &mut self,
        scope: ScopeId,
        raw: &str,
        extension: &str,
    ) -> Result<ResolvedName, NamingError> {
        let base = self.sanitizer.sanitize_file(raw, extension);
        self.claim(scope, raw, base)
    }

    fn claim(
        &mut self,
        scope: ScopeId,
        raw: &str,
        base: SanitizedName,
    ) -> Result<ResolvedName, NamingError> {
        if base.used_fallback {
            log::warn!(
                "Name '{}' in {} sanitized to nothing, using fallback '{}'",
                raw,
                scope,
                base.value()
            );
        }

        let fold_case = self.fold_case;
        let registry = self
            .scopes
            .entry(scope)
            .or_insert_with(|| NameRegistry::new(fold_case));

        let name = registry
            .claim(&base, &self.sanitizer, self.bound)
            .ok_or_else(|| NamingError::CollisionBoundExceeded {
                raw: raw.to_string(),
                scope,
                bound: self.bound,
            })?;

        if name != raw {
            log::debug!("Resolved '{}' in {} to '{}'", raw, scope, name);
        }

        Ok(ResolvedName {
            name,
            used_fallback: base.used_fallback,
        })
    }

    /// Forget every name handed out in `scope`
    pub fn reset(&mut self, scope: ScopeId) {
        self.scopes.remove(&scope);
    }

    #[cfg(test)]
    fn registry(&self, scope: ScopeId) -> Option<&NameRegistry> {
        self.scopes.get(&scope)
    }
}

impl Default for UniqueNameResolver {
    fn default() -> Self {
        Self::new(NameSanitizer::default(), true, DEFAULT_COLLISION_BOUND)
    }
}
