//! Workbench configuration (`workbench.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::interpreter::{InterpreterTable, default_interpreters};

/// Top-level configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkbenchConfig {
    /// Root for all workbench state; projects live in `<data_dir>/projects`.
    pub data_dir: PathBuf,

    /// Capacity of the shared run event channel. Slow subscribers beyond this lag.
    pub event_capacity: usize,

    pub runs: RunsConfig,

    /// Extension (no dot) to interpreter command line.
    pub interpreters: InterpreterTable,

    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunsConfig {
    /// Maximum bytes read from a child pipe per output event.
    pub read_chunk_bytes: usize,

    /// How long to keep draining pipes after the child exits.
    pub drain_grace_ms: u64,

    /// Buffer size for archive chunks sent to a download.
    pub archive_chunk_bytes: usize,

    /// Shell used for free-form terminal commands; the command is appended.
    pub shell: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackupConfig {
    /// Base URL of the repository-hosting API.
    pub api_base: String,
    pub user_agent: String,
    pub commit_message: String,
    pub author_name: String,
    pub author_email: String,
    /// Wall-clock limit for each git command (push in particular).
    pub git_timeout_secs: u64,
    /// Truncate captured git output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("workbench-data"),
            event_capacity: 1024,
            runs: RunsConfig::default(),
            interpreters: default_interpreters(),
            backup: BackupConfig::default(),
        }
    }
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            read_chunk_bytes: 8192,
            drain_grace_ms: 2000,
            archive_chunk_bytes: 64 * 1024,
            shell: vec!["sh".to_string(), "-c".to_string()],
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            user_agent: "workbench".to_string(),
            commit_message: "Backup from workbench".to_string(),
            author_name: "Workbench".to_string(),
            author_email: "workbench@localhost".to_string(),
            git_timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

impl WorkbenchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(anyhow!("data_dir must not be empty"));
        }
        if self.event_capacity == 0 {
            return Err(anyhow!("event_capacity must be > 0"));
        }
        if self.runs.read_chunk_bytes == 0 {
            return Err(anyhow!("runs.read_chunk_bytes must be > 0"));
        }
        if self.runs.archive_chunk_bytes == 0 {
            return Err(anyhow!("runs.archive_chunk_bytes must be > 0"));
        }
        if self.runs.shell.is_empty() || self.runs.shell[0].trim().is_empty() {
            return Err(anyhow!("runs.shell must be a non-empty array"));
        }
        for (ext, command) in &self.interpreters {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(anyhow!("interpreters.{ext} must be a non-empty array"));
            }
            if ext.starts_with('.') || ext.chars().any(|ch| ch.is_ascii_uppercase()) {
                return Err(anyhow!(
                    "interpreters.{ext}: extensions are lowercase without a leading dot"
                ));
            }
        }
        if self.backup.git_timeout_secs == 0 {
            return Err(anyhow!("backup.git_timeout_secs must be > 0"));
        }
        if self.backup.commit_message.trim().is_empty() {
            return Err(anyhow!("backup.commit_message must not be empty"));
        }
        Ok(())
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.data_dir.join("projects")
    }

    pub fn project_index_path(&self) -> PathBuf {
        self.data_dir.join("projects.json")
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WorkbenchConfig::default()`.
pub fn load_config(path: &Path) -> Result<WorkbenchConfig> {
    if !path.exists() {
        let cfg = WorkbenchConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WorkbenchConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WorkbenchConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, WorkbenchConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("workbench.toml");
        let mut cfg = WorkbenchConfig::default();
        cfg.data_dir = temp.path().join("data");
        cfg.interpreters
            .insert("rb".to_string(), vec!["ruby".to_string()]);
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("workbench.toml");
        fs::write(&path, "[backup]\ncommit_message = \"nightly\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.backup.commit_message, "nightly");
        assert_eq!(cfg.backup.api_base, BackupConfig::default().api_base);
        assert_eq!(cfg.interpreters, default_interpreters());
    }

    #[test]
    fn rejects_dotted_interpreter_extension() {
        let mut cfg = WorkbenchConfig::default();
        cfg.interpreters
            .insert(".py".to_string(), vec!["python3".to_string()]);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("leading dot"));
    }

    #[test]
    fn rejects_empty_shell() {
        let mut cfg = WorkbenchConfig::default();
        cfg.runs.shell.clear();
        assert!(cfg.validate().is_err());
    }
}
