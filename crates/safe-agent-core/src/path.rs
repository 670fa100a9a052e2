//! Working-directory path safety
//!
//! Every path proposed by a planner or read from a diff is untrusted. The
//! resolver accepts a path only if it names something strictly underneath
//! the working root after `..` components and symlinks are resolved.

use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// A path that resolved inside the working root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Canonical absolute path
    pub absolute: PathBuf,

    /// Path relative to the working root, `/`-separated
    pub relative: String,
}

/// Resolves untrusted relative paths against a canonical working root
#[derive(Debug, Clone)]
pub struct PathSafetyResolver {
    root: PathBuf,
}

impl PathSafetyResolver {
    /// Create a resolver for `working_root`, which must exist.
    pub fn new(working_root: impl AsRef<Path>) -> Result<Self> {
        let root = working_root.as_ref().canonicalize().map_err(|e| {
            Error::config(format!(
                "working directory {} is not accessible: {}",
                working_root.as_ref().display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    /// Canonical working root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `raw` under the working root, or `None` if it is unsafe.
    pub fn resolve(&self, raw: &str) -> Option<ResolvedPath> {
        let raw = raw.trim();
        if Self::is_rejected_syntax(raw) {
            debug!(path = %raw, "Rejected path syntax");
            return None;
        }

        let candidate = Path::new(raw);
        if candidate.is_absolute() {
            return None;
        }

        let resolved = self.resolve_components(candidate)?;
        self.within_root(resolved)
    }

    /// Resolve a configuration file path (e.g. a policy file).
    ///
    /// Unlike [`resolve`](Self::resolve), absolute paths are accepted when they
    /// canonicalize underneath the working root.
    pub fn resolve_config_path(&self, raw: &str) -> Result<ResolvedPath> {
        let trimmed = raw.trim();
        let candidate = Path::new(trimmed);

        if candidate.is_absolute() {
            let canonical = candidate.canonicalize().map_err(|e| {
                Error::config(format!("cannot read {}: {}", candidate.display(), e))
            })?;
            return self.within_root(canonical).ok_or_else(|| {
                Error::unsafe_path(format!(
                    "{} must be within the working directory",
                    trimmed
                ))
            });
        }

        self.resolve(trimmed).ok_or_else(|| {
            Error::unsafe_path(format!(
                "{} resolves outside the working directory",
                trimmed
            ))
        })
    }

    fn is_rejected_syntax(raw: &str) -> bool {
        if raw.is_empty() || raw == "." || raw == "./" {
            return true;
        }
        if raw.starts_with('~') || raw.contains('\0') {
            return true;
        }

        // Windows drive letters and UNC shares, rejected on every platform
        let bytes = raw.as_bytes();
        if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
            return true;
        }
        raw.starts_with("\\\\")
    }

    /// Walk `relative` from the root, following symlinks as they appear.
    fn resolve_components(&self, relative: &Path) -> Option<PathBuf> {
        let mut resolved = self.root.clone();

        for component in relative.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::Normal(name) => {
                    resolved.push(name);
                    let is_symlink = fs::symlink_metadata(&resolved)
                        .map(|meta| meta.file_type().is_symlink())
                        .unwrap_or(false);
                    if is_symlink {
                        // Dangling links cannot be proven safe
                        resolved = fs::canonicalize(&resolved).ok()?;
                    }
                }
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }

        Some(resolved)
    }

    fn within_root(&self, resolved: PathBuf) -> Option<ResolvedPath> {
        let relative = resolved.strip_prefix(&self.root).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }

        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        Some(ResolvedPath {
            absolute: resolved,
            relative,
        })
    }
}
