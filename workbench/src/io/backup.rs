//! Best-effort backup of a project to a freshly created remote repository.
//!
//! Remote creation is the only fatal step. Every later step is attempted in
//! order regardless of earlier failures, and its outcome is recorded in the
//! report instead of being raised.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::sandbox::Project;
use crate::error::{Result, WorkbenchError};
use crate::io::config::BackupConfig;
use crate::io::git::{Author, Git};
use crate::io::remote::{RemoteHost, authenticated_url, redact};
use crate::io::store;

const REMOTE_NAME: &str = "origin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStep {
    RemoteCreate,
    Init,
    Add,
    Commit,
    RemoteAdd,
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    /// Nothing to do, e.g. no changes to commit.
    Skipped(String),
    /// The step failed; the pipeline went on.
    Warning(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub step: BackupStep,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Outcome of a backup whose remote was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub remote_url: String,
    pub steps: Vec<StepResult>,
}

impl BackupReport {
    pub fn outcome(&self, step: BackupStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|result| result.step == step)
            .map(|result| &result.outcome)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &StepResult> {
        self.steps
            .iter()
            .filter(|result| matches!(result.outcome, StepOutcome::Warning(_)))
    }
}

pub struct BackupOrchestrator {
    host: Arc<dyn RemoteHost>,
    config: BackupConfig,
}

impl BackupOrchestrator {
    pub fn new(host: Arc<dyn RemoteHost>, config: BackupConfig) -> Self {
        Self { host, config }
    }

    /// Back up `project` using `token` for both the API and the push.
    ///
    /// Returns `RemoteCreate` without touching the project when the remote
    /// cannot be created. Otherwise always returns a report.
    #[instrument(skip_all, fields(project = %project.name))]
    pub async fn run(&self, project: &Project, token: &str) -> Result<BackupReport> {
        let repo = self
            .host
            .create_repo(&project.name, token)
            .await
            .map_err(|err| match err {
                WorkbenchError::RemoteCreate { status, payload } => WorkbenchError::RemoteCreate {
                    status,
                    payload: redact(&payload, token),
                },
                other => other,
            })?;
        info!(remote = %repo.html_url, "remote ready, committing project");

        store::ensure_root(&project.root)?;
        let git = Git::new(
            &project.root,
            Duration::from_secs(self.config.git_timeout_secs),
            self.config.output_limit_bytes,
        );
        let author = Author {
            name: self.config.author_name.clone(),
            email: self.config.author_email.clone(),
        };
        let message = self.config.commit_message.clone();
        let push_url = authenticated_url(&repo.clone_url, token);
        let token = token.to_string();

        let local = tokio::task::spawn_blocking(move || {
            local_steps(&git, &author, &message, &push_url, &token)
        })
        .await
        .map_err(|e| WorkbenchError::Io {
            context: "backup worker".to_string(),
            message: e.to_string(),
        })?;

        let mut steps = vec![StepResult {
            step: BackupStep::RemoteCreate,
            outcome: StepOutcome::Ok,
        }];
        steps.extend(local);
        Ok(BackupReport {
            remote_url: repo.html_url,
            steps,
        })
    }
}

fn local_steps(
    git: &Git,
    author: &Author,
    message: &str,
    push_url: &str,
    token: &str,
) -> Vec<StepResult> {
    let record = |step: BackupStep, result: anyhow::Result<StepOutcome>| {
        let outcome = result.unwrap_or_else(|err| {
            let msg = redact(&format!("{err:#}"), token);
            warn!(?step, err = %msg, "backup step failed, continuing");
            StepOutcome::Warning(msg)
        });
        StepResult { step, outcome }
    };

    vec![
        record(
            BackupStep::Init,
            git.init_if_needed().map(|ran| {
                if ran {
                    StepOutcome::Ok
                } else {
                    StepOutcome::Skipped("already initialized".to_string())
                }
            }),
        ),
        record(BackupStep::Add, git.add_all().map(|()| StepOutcome::Ok)),
        record(
            BackupStep::Commit,
            git.commit_staged(message, author).map(|committed| {
                if committed {
                    StepOutcome::Ok
                } else {
                    StepOutcome::Skipped("nothing to commit".to_string())
                }
            }),
        ),
        record(
            BackupStep::RemoteAdd,
            git.set_remote(REMOTE_NAME, push_url).map(|()| StepOutcome::Ok),
        ),
        record(
            BackupStep::Push,
            git.push_upstream(REMOTE_NAME).map(|()| StepOutcome::Ok),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::process::Command;

    use super::*;
    use crate::test_support::ScriptedHost;

    fn project(root: &std::path::Path) -> Project {
        Project {
            name: "demo".to_string(),
            root: root.to_path_buf(),
        }
    }

    fn orchestrator(host: ScriptedHost) -> BackupOrchestrator {
        let config = BackupConfig {
            git_timeout_secs: 30,
            ..BackupConfig::default()
        };
        BackupOrchestrator::new(Arc::new(host), config)
    }

    #[tokio::test]
    async fn remote_failure_leaves_project_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("demo");
        store::write(&root.join("a.txt"), b"a").expect("write");
        let host = ScriptedHost::failing(401, "Bad credentials for s3cr3t");
        let calls = host.calls();

        let err = orchestrator(host)
            .run(&project(&root), "s3cr3t")
            .await
            .unwrap_err();

        match err {
            WorkbenchError::RemoteCreate { status, payload } => {
                assert_eq!(status, Some(401));
                assert_eq!(payload, "Bad credentials for ***");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.lock().expect("calls").as_slice(), ["demo"]);
        assert!(!root.join(".git").exists());
    }

    #[tokio::test]
    async fn failed_push_still_reports_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("demo");
        store::write(&root.join("main.py"), b"print(1)").expect("write");
        // The push target is missing, and its path contains the token.
        let missing = temp.path().join("s3cr3t-missing.git");
        let host = ScriptedHost::succeeding(
            &missing.to_string_lossy(),
            "https://example.invalid/me/demo",
        );

        let report = orchestrator(host)
            .run(&project(&root), "s3cr3t")
            .await
            .expect("backup");

        assert_eq!(report.remote_url, "https://example.invalid/me/demo");
        assert_eq!(report.outcome(BackupStep::RemoteCreate), Some(&StepOutcome::Ok));
        assert_eq!(report.outcome(BackupStep::Init), Some(&StepOutcome::Ok));
        assert_eq!(report.outcome(BackupStep::Commit), Some(&StepOutcome::Ok));
        assert_eq!(report.outcome(BackupStep::RemoteAdd), Some(&StepOutcome::Ok));
        assert!(matches!(
            report.outcome(BackupStep::Push),
            Some(StepOutcome::Warning(_))
        ));
        for warning in report.warnings() {
            let StepOutcome::Warning(msg) = &warning.outcome else {
                unreachable!()
            };
            assert!(!msg.contains("s3cr3t"), "token leaked: {msg}");
        }
        assert!(root.join(".git").exists());
    }

    #[tokio::test]
    async fn pushes_to_a_local_bare_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("demo");
        store::write(&root.join("app.js"), b"console.log(1)").expect("write");
        let bare = temp.path().join("remote.git");
        let status = Command::new("git")
            .args(["init", "--bare"])
            .arg(&bare)
            .output()
            .expect("git init --bare")
            .status;
        assert!(status.success());
        let host = ScriptedHost::succeeding(&bare.to_string_lossy(), "https://example.invalid/demo");
        let orchestrator = orchestrator(host);

        let report = orchestrator.run(&project(&root), "tok").await.expect("backup");
        assert_eq!(report.warnings().count(), 0, "{report:?}");
        assert_eq!(report.outcome(BackupStep::Push), Some(&StepOutcome::Ok));

        // A second backup with no changes skips the commit but still succeeds.
        let again = orchestrator.run(&project(&root), "tok").await.expect("backup");
        assert!(matches!(
            again.outcome(BackupStep::Init),
            Some(StepOutcome::Skipped(_))
        ));
        assert!(matches!(
            again.outcome(BackupStep::Commit),
            Some(StepOutcome::Skipped(_))
        ));
        assert_eq!(again.outcome(BackupStep::RemoteAdd), Some(&StepOutcome::Ok));
        assert!(fs::read_dir(&bare).expect("bare repo").next().is_some());
    }
}
