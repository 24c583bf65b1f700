//! Test-only helpers: a temp-dir workbench, event collection, a scripted host.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tempfile::TempDir;
use tokio::sync::broadcast;

use crate::core::run::{RunEvent, RunId};
use crate::error::{Result, WorkbenchError};
use crate::io::config::WorkbenchConfig;
use crate::io::remote::{RemoteHost, RemoteRepo};
use crate::service::Workbench;

/// A workbench rooted in a temporary directory, removed on drop.
pub struct TestWorkbench {
    pub workbench: Workbench,
    pub calls: Arc<Mutex<Vec<String>>>,
    temp: TempDir,
}

impl TestWorkbench {
    /// Workbench whose remote host succeeds with a missing local push target.
    pub fn new() -> anyhow::Result<Self> {
        let temp = tempfile::tempdir()?;
        let missing = temp.path().join("remote-missing.git");
        let host = ScriptedHost::succeeding(&missing.to_string_lossy(), "https://example.invalid/repo");
        Self::with_host(temp, host)
    }

    pub fn with_host(temp: TempDir, host: ScriptedHost) -> anyhow::Result<Self> {
        let config = WorkbenchConfig {
            data_dir: temp.path().join("data"),
            ..WorkbenchConfig::default()
        };
        let calls = host.calls();
        let workbench = Workbench::with_remote_host(config, Arc::new(host))?;
        Ok(Self {
            workbench,
            calls,
            temp,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        self.temp.path()
    }
}

/// Collect events for `run_id` until its terminal event, failing after `timeout`.
pub async fn collect_run(
    rx: &mut broadcast::Receiver<RunEvent>,
    run_id: RunId,
    timeout: Duration,
) -> anyhow::Result<Vec<RunEvent>> {
    let collect = async {
        let mut events = Vec::new();
        loop {
            match rx.recv().await {
                Ok(event) if event.run_id() == run_id => {
                    let terminal = event.is_terminal();
                    events.push(event);
                    if terminal {
                        return Ok(events);
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(anyhow::anyhow!("event channel closed"));
                }
            }
        }
    };
    tokio::time::timeout(timeout, collect)
        .await
        .map_err(|_| anyhow::anyhow!("run {run_id} did not finish in {timeout:?}"))?
}

/// Concatenate a run's output bytes for one stream kind.
pub fn output_text(events: &[RunEvent], kind: crate::core::run::StreamKind) -> String {
    let bytes: Vec<u8> = events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Output { stream, data, .. } if *stream == kind => Some(data.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Remote host that returns a predetermined result and records repo names.
pub struct ScriptedHost {
    result: std::result::Result<RemoteRepo, (u16, String)>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedHost {
    pub fn succeeding(clone_url: &str, html_url: &str) -> Self {
        Self {
            result: Ok(RemoteRepo {
                clone_url: clone_url.to_string(),
                html_url: html_url.to_string(),
            }),
            calls: Arc::default(),
        }
    }

    pub fn failing(status: u16, payload: &str) -> Self {
        Self {
            result: Err((status, payload.to_string())),
            calls: Arc::default(),
        }
    }

    /// Names passed to `create_repo`, in call order.
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

impl RemoteHost for ScriptedHost {
    fn create_repo<'a>(&'a self, name: &'a str, _token: &'a str) -> BoxFuture<'a, Result<RemoteRepo>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(name.to_string());
            self.result
                .clone()
                .map_err(|(status, payload)| WorkbenchError::RemoteCreate {
                    status: Some(status),
                    payload,
                })
        })
    }
}
