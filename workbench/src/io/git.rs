//! Git adapter for project backups.
//!
//! A small, explicit wrapper around `git` subprocess calls. Every command goes
//! through [`run_command_with_timeout`] so a stuck push cannot hang a worker.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Identity used for backup commits, passed with `git -c`.
#[derive(Debug, Clone)]
pub struct Author {
    pub name: String,
    pub email: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }

    /// True if the workdir itself holds a repository.
    ///
    /// A project nested inside some other checkout still gets its own repo.
    pub fn is_repo(&self) -> bool {
        self.workdir.join(".git").exists()
    }

    /// `git init` unless already initialized. Returns whether it ran.
    #[instrument(skip_all)]
    pub fn init_if_needed(&self) -> Result<bool> {
        if self.is_repo() {
            debug!("repository already initialized");
            return Ok(false);
        }
        self.run_checked(&["init"])?;
        Ok(true)
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        if !out.success() {
            // No HEAD yet: everything in the index is new.
            let out = self.run_checked(&["ls-files", "--cached"])?;
            return Ok(!out.stdout_lossy().trim().is_empty());
        }
        Ok(!out.stdout_lossy().trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str, author: &Author) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        let name = format!("user.name={}", author.name);
        let email = format!("user.email={}", author.email);
        self.run_checked(&[
            "-c",
            &name,
            "-c",
            &email,
            "-c",
            "commit.gpgsign=false",
            "commit",
            "-m",
            message,
        ])?;
        Ok(true)
    }

    /// Point `name` at `url`, adding the remote or replacing its URL.
    #[instrument(skip_all, fields(remote = name))]
    pub fn set_remote(&self, name: &str, url: &str) -> Result<()> {
        let existing = self.run(&["remote", "get-url", name])?;
        if existing.success() {
            debug!("replacing remote url");
            self.run_checked(&["remote", "set-url", name, url])?;
        } else {
            self.run_checked(&["remote", "add", name, url])?;
        }
        Ok(())
    }

    /// Push the current branch and set its upstream.
    #[instrument(skip_all, fields(remote = name))]
    pub fn push_upstream(&self, name: &str) -> Result<()> {
        self.run_checked(&["push", "-u", name, "HEAD"])?;
        Ok(())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if output.timed_out {
            return Err(anyhow!(
                "git {} timed out after {}s",
                describe(args),
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                describe(args),
                output.stderr_lossy().trim()
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0");
        run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
    }
}

/// Subcommand name for messages; the remaining args may carry URLs.
fn describe<'a>(args: &[&'a str]) -> &'a str {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "-c" {
            iter.next();
            continue;
        }
        return arg;
    }
    ""
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    fn git(dir: &Path) -> Git {
        Git::new(dir, Duration::from_secs(30), 100_000)
    }

    fn author() -> Author {
        Author {
            name: "Test".to_string(),
            email: "test@example.com".to_string(),
        }
    }

    #[test]
    fn describe_skips_config_pairs() {
        assert_eq!(describe(&["-c", "user.name=x", "commit", "-m", "m"]), "commit");
        assert_eq!(describe(&["remote", "add", "origin", "https://t@h/r"]), "remote");
    }

    #[test]
    fn init_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = git(temp.path());
        assert!(git.init_if_needed().expect("init"));
        assert!(!git.init_if_needed().expect("second init"));
        assert!(git.is_repo());
    }

    #[test]
    fn commit_reports_whether_anything_changed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = git(temp.path());
        git.init_if_needed().expect("init");
        fs::write(temp.path().join("a.txt"), "a").expect("write");

        git.add_all().expect("add");
        assert!(git.commit_staged("first", &author()).expect("commit"));

        git.add_all().expect("add again");
        assert!(!git.commit_staged("second", &author()).expect("no-op commit"));
    }

    #[test]
    fn set_remote_adds_then_replaces() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = git(temp.path());
        git.init_if_needed().expect("init");
        git.set_remote("origin", "https://example.com/a.git").expect("add");
        git.set_remote("origin", "https://example.com/b.git").expect("replace");

        let out = git.run_checked(&["remote", "get-url", "origin"]).expect("get-url");
        assert_eq!(out.stdout_lossy().trim(), "https://example.com/b.git");
    }

    #[test]
    fn push_to_missing_remote_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = git(temp.path());
        git.init_if_needed().expect("init");
        fs::write(temp.path().join("a.txt"), "a").expect("write");
        git.add_all().expect("add");
        git.commit_staged("first", &author()).expect("commit");
        let missing = temp.path().join("nowhere.git");
        git.set_remote("origin", &missing.to_string_lossy()).expect("remote");

        let err = git.push_upstream("origin").unwrap_err();
        assert!(err.to_string().contains("git push failed"));
    }
}
