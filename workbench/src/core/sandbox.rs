//! Sandbox guard: maps untrusted project ids and relative paths onto a
//! per-project root.
//!
//! Resolution is pure path algebra. Nothing here touches the filesystem, so a
//! rejected path never causes a side effect.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, WorkbenchError};

/// Project used when a caller supplies no id.
pub const DEFAULT_PROJECT: &str = "default";

/// Replacement for characters outside `[A-Za-z0-9_.-]`.
pub const SUBSTITUTE: char = '_';

/// Sanitize a caller-supplied project id into a directory name.
///
/// Names made only of dots are rewritten as well, otherwise `..` would name
/// the parent of the projects directory.
pub fn sanitize_project_id(id: Option<&str>) -> String {
    let raw = id.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return DEFAULT_PROJECT.to_string();
    }
    let sanitized: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                SUBSTITUTE
            }
        })
        .collect();
    if sanitized.chars().all(|ch| ch == '.') {
        return sanitized.chars().map(|_| SUBSTITUTE).collect();
    }
    sanitized
}

/// Reduce an uploaded file name to its base name.
pub fn sanitize_upload_name(original: &str) -> Result<String> {
    // Browsers on Windows may send `C:\fakepath\name.txt`.
    let last = original.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if last.is_empty() || last == "." || last == ".." {
        return Err(WorkbenchError::path_escape(original));
    }
    Ok(last.to_string())
}

/// A sanitized project and its root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub root: PathBuf,
}

impl Project {
    /// Resolve `relative` beneath this project's root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let joined = normalize(&self.root.join(relative));
        if joined == self.root || joined.starts_with(&self.root) {
            return Ok(joined);
        }
        Err(WorkbenchError::path_escape(relative))
    }
}

/// The single security boundary between callers and the filesystem.
#[derive(Debug, Clone)]
pub struct SandboxGuard {
    projects_dir: PathBuf,
}

impl SandboxGuard {
    /// `projects_dir` should be absolute; it is normalized lexically.
    pub fn new(projects_dir: impl AsRef<Path>) -> Self {
        Self {
            projects_dir: normalize(projects_dir.as_ref()),
        }
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    pub fn project(&self, id: Option<&str>) -> Project {
        let name = sanitize_project_id(id);
        let root = self.projects_dir.join(&name);
        Project { name, root }
    }

    pub fn resolve(&self, id: Option<&str>, relative: &str) -> Result<PathBuf> {
        self.project(id).resolve(relative)
    }
}

/// Lexically normalize a path: drop `.`, let `..` pop the previous segment.
///
/// `..` at the filesystem root stays at the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(segment) => out.push(segment),
        }
    }
    out
}
