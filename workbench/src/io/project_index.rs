//! Persistent index of known projects (`<data_dir>/projects.json`).
//!
//! Loaded once when the workbench opens and rewritten atomically whenever a
//! new project is recorded. Owned by the facade; nothing reads it ambiently.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    projects: BTreeMap<String, ProjectRecord>,
}

#[derive(Debug)]
pub struct ProjectIndex {
    path: PathBuf,
    file: IndexFile,
}

impl ProjectIndex {
    /// Load the index at `path`. A missing file yields an empty index.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!(path = %path.display(), "no project index yet");
            return Ok(Self {
                path,
                file: IndexFile::default(),
            });
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let file: IndexFile =
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn get(&self, name: &str) -> Option<&ProjectRecord> {
        self.file.projects.get(name)
    }

    /// All projects, ordered by name.
    pub fn records(&self) -> Vec<ProjectRecord> {
        self.file.projects.values().cloned().collect()
    }

    /// Record `name` if it is new, flushing the index to disk.
    ///
    /// Returns the existing record unchanged for known projects.
    pub fn record(&mut self, name: &str) -> Result<ProjectRecord> {
        if let Some(existing) = self.file.projects.get(name) {
            return Ok(existing.clone());
        }
        let record = ProjectRecord {
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.file
            .projects
            .insert(name.to_string(), record.clone());
        if let Err(err) = self.flush() {
            self.file.projects.remove(name);
            return Err(err);
        }
        info!(project = name, "project recorded");
        Ok(record)
    }

    fn flush(&self) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(&self.file).context("serialize project index")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("index path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp index {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace index {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let index = ProjectIndex::load(temp.path().join("projects.json")).expect("load");
        assert!(index.records().is_empty());
    }

    #[test]
    fn records_persist_and_keep_first_timestamp() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state/projects.json");

        let mut index = ProjectIndex::load(&path).expect("load");
        let first = index.record("beta").expect("record");
        index.record("alpha").expect("record");
        let again = index.record("beta").expect("record again");
        assert_eq!(first, again);

        let reloaded = ProjectIndex::load(&path).expect("reload");
        let names: Vec<String> = reloaded.records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(reloaded.get("beta"), Some(&first));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("projects.json");
        fs::write(&path, "not json").expect("write");
        let err = ProjectIndex::load(&path).unwrap_err();
        assert!(err.to_string().contains("parse"));
    }
}
