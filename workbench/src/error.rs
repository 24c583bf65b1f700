//! Error taxonomy surfaced by the workbench facade.

use std::io;
use std::path::{Path, PathBuf};

/// Failures a collaborator can observe from a workbench operation.
#[derive(Debug, thiserror::Error)]
pub enum WorkbenchError {
    /// A caller-supplied path would resolve outside its project root.
    #[error("path escapes project root: {path}")]
    PathEscape { path: String },

    #[error("not found: {}", .path.display())]
    NotFound { path: PathBuf },

    /// No interpreter is mapped for the file's extension.
    #[error("unsupported file kind: {extension:?}")]
    UnsupportedKind { extension: String },

    #[error("{context}: {message}")]
    Io { context: String, message: String },

    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    /// The remote repository could not be created; the backup stops here.
    #[error("remote repository creation failed ({}): {payload}", format_status(.status))]
    RemoteCreate { status: Option<u16>, payload: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, WorkbenchError>;

impl WorkbenchError {
    /// Map an I/O error on `path`, turning `ENOENT` into [`WorkbenchError::NotFound`].
    pub fn from_io(err: io::Error, op: &str, path: &Path) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            return WorkbenchError::NotFound {
                path: path.to_path_buf(),
            };
        }
        WorkbenchError::Io {
            context: format!("{op} {}", path.display()),
            message: err.to_string(),
        }
    }

    pub fn path_escape(path: impl Into<String>) -> Self {
        WorkbenchError::PathEscape { path: path.into() }
    }
}

impl From<anyhow::Error> for WorkbenchError {
    fn from(err: anyhow::Error) -> Self {
        WorkbenchError::Io {
            context: "internal".to_string(),
            message: format!("{err:#}"),
        }
    }
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {code}"),
        None => "no response".to_string(),
    }
}
