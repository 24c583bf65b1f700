//! The `Workbench` facade: the operations transports call into.
//!
//! Every operation that takes a caller-supplied project id or relative path
//! resolves it through the [`SandboxGuard`] before any I/O happens.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::core::interpreter::{InterpreterTable, LaunchSpec, interpreter_for};
use crate::core::run::{RunEvent, RunId, RunStatus};
use crate::core::sandbox::{Project, SandboxGuard, sanitize_upload_name};
use crate::error::{Result, WorkbenchError};
use crate::io::archive::{self, ArchiveStream};
use crate::io::backup::{BackupOrchestrator, BackupReport};
use crate::io::config::WorkbenchConfig;
use crate::io::exec::{EngineOptions, ExecutionEngine, RunEvents};
use crate::io::project_index::{ProjectIndex, ProjectRecord};
use crate::io::remote::{GitHubHost, RemoteHost};
use crate::io::store;

pub struct Workbench {
    guard: SandboxGuard,
    engine: ExecutionEngine,
    backup: BackupOrchestrator,
    index: Mutex<ProjectIndex>,
    interpreters: InterpreterTable,
    shell: Vec<String>,
    archive_chunk_bytes: usize,
}

impl Workbench {
    /// Open a workbench backed by the GitHub API from `config.backup`.
    pub fn open(config: WorkbenchConfig) -> Result<Self> {
        let host = GitHubHost::new(&config.backup.api_base, &config.backup.user_agent)?;
        Self::with_remote_host(config, Arc::new(host))
    }

    pub fn with_remote_host(config: WorkbenchConfig, host: Arc<dyn RemoteHost>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| WorkbenchError::Config(format!("{e:#}")))?;
        let config = WorkbenchConfig {
            data_dir: absolute(&config.data_dir)?,
            ..config
        };
        let projects_dir = config.projects_dir();
        store::ensure_root(&projects_dir)?;
        let index = ProjectIndex::load(config.project_index_path())?;
        info!(projects_dir = %projects_dir.display(), "workbench opened");

        let engine = ExecutionEngine::new(EngineOptions {
            event_capacity: config.event_capacity,
            read_chunk_bytes: config.runs.read_chunk_bytes,
            drain_grace: Duration::from_millis(config.runs.drain_grace_ms),
        });
        Ok(Self {
            guard: SandboxGuard::new(projects_dir),
            engine,
            backup: BackupOrchestrator::new(host, config.backup.clone()),
            index: Mutex::new(index),
            interpreters: config.interpreters,
            shell: config.runs.shell,
            archive_chunk_bytes: config.runs.archive_chunk_bytes,
        })
    }

    pub fn guard(&self) -> &SandboxGuard {
        &self.guard
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Create (or touch) a project and return its root.
    pub fn create_project(&self, name: &str) -> Result<PathBuf> {
        let project = self.guard.project(Some(name));
        self.touch(&project)?;
        Ok(project.root)
    }

    pub fn projects(&self) -> Vec<ProjectRecord> {
        self.index().records()
    }

    /// Files under the project root; empty if the project was never touched.
    pub fn list_files(&self, project: Option<&str>) -> Result<Vec<String>> {
        store::list(&self.guard.project(project).root)
    }

    pub fn read_file(&self, project: Option<&str>, relative: &str) -> Result<Vec<u8>> {
        let path = self.guard.resolve(project, relative)?;
        store::read(&path)
    }

    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub fn save_file(&self, project: Option<&str>, relative: &str, content: &[u8]) -> Result<()> {
        let project = self.guard.project(project);
        let path = project.resolve(relative)?;
        self.touch(&project)?;
        store::write(&path, content)
    }

    pub fn delete_file(&self, project: Option<&str>, relative: &str) -> Result<()> {
        let path = self.guard.resolve(project, relative)?;
        store::delete(&path)?;
        debug!(path = %path.display(), "file deleted");
        Ok(())
    }

    /// Move a received upload into the project root under its base name.
    pub fn upload_file(
        &self,
        project: Option<&str>,
        temp_file: &Path,
        original_name: &str,
    ) -> Result<PathBuf> {
        let project = self.guard.project(project);
        let filename = sanitize_upload_name(original_name)?;
        // Base names cannot climb out, but route through the guard anyway.
        project.resolve(&filename)?;
        self.touch(&project)?;
        let dest = store::place_upload(&project.root, &filename, temp_file)?;
        info!(project = %project.name, file = %filename, "upload placed");
        Ok(dest)
    }

    /// Stream the project as a zip. Must be called within a Tokio runtime.
    pub fn download_archive(&self, project: Option<&str>) -> Result<ArchiveStream> {
        archive::stream(&self.guard.project(project).root, self.archive_chunk_bytes)
    }

    /// Run a file with the interpreter mapped to its extension.
    ///
    /// The working directory is the project root.
    #[instrument(skip(self))]
    pub fn run_file(&self, project: Option<&str>, relative: &str) -> Result<RunId> {
        let (project, path) = self.runnable(project, relative)?;
        let interpreter = interpreter_for(&path, &self.interpreters)?;
        self.engine.start_file(&interpreter, &path, &project.root)
    }

    /// Like [`Workbench::run_file`], also returning the run's own event stream.
    pub fn watch_file(&self, project: Option<&str>, relative: &str) -> Result<(RunId, RunEvents)> {
        let (project, path) = self.runnable(project, relative)?;
        let interpreter = interpreter_for(&path, &self.interpreters)?;
        self.engine
            .start_watched(LaunchSpec::for_file(&interpreter, &path, &project.root))
    }

    /// Run a free-form command line through the configured shell.
    ///
    /// `cwd` (default: the root) is resolved inside the project, which falls
    /// back to the default project like every other operation.
    #[instrument(skip(self, command))]
    pub fn run_command(
        &self,
        command: &str,
        project: Option<&str>,
        cwd: Option<&str>,
    ) -> Result<RunId> {
        let project = self.guard.project(project);
        let dir = project.resolve(cwd.unwrap_or(""))?;
        self.touch(&project)?;
        if !dir.is_dir() {
            return Err(WorkbenchError::NotFound { path: dir });
        }
        self.engine
            .start(LaunchSpec::for_command(&self.shell, command, dir))
    }

    /// Idempotent; unknown or finished runs are ignored.
    pub fn kill_run(&self, run_id: RunId) {
        self.engine.kill(run_id);
    }

    pub fn run_status(&self, run_id: RunId) -> Option<RunStatus> {
        self.engine.status(run_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.engine.subscribe()
    }

    pub async fn backup_to_remote(&self, project: Option<&str>, token: &str) -> Result<BackupReport> {
        let project = self.guard.project(project);
        let report = self.backup.run(&project, token).await?;
        // The remote exists now; an index failure must not turn that into an error.
        if let Err(err) = self.index().record(&project.name) {
            warn!(project = %project.name, err = %format!("{err:#}"), "failed to record backed-up project");
        }
        Ok(report)
    }

    fn runnable(&self, project: Option<&str>, relative: &str) -> Result<(Project, PathBuf)> {
        let project = self.guard.project(project);
        let path = project.resolve(relative)?;
        if !path.is_file() {
            return Err(WorkbenchError::NotFound { path });
        }
        Ok((project, path))
    }

    fn touch(&self, project: &Project) -> Result<()> {
        store::ensure_root(&project.root)?;
        self.index().record(&project.name)?;
        Ok(())
    }

    fn index(&self) -> MutexGuard<'_, ProjectIndex> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| WorkbenchError::from_io(e, "resolve current directory", path))?;
    Ok(cwd.join(path))
}
