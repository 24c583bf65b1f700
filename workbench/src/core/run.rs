//! Run identity, lifecycle states, and the events published per run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier for one execution. Monotonic within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(RunId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Lifecycle of a run. `Exited`, `Failed` and `Killed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Spawned,
    Running,
    Exited { code: Option<i32> },
    Failed { reason: String },
    Killed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Exited { .. } | RunStatus::Failed { .. } | RunStatus::Killed
        )
    }
}

/// Event published on the shared run channel.
///
/// Output chunk boundaries are arbitrary byte ranges, not lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Output {
        run_id: RunId,
        stream: StreamKind,
        data: Vec<u8>,
    },
    /// `code` is `None` when the process ended by a signal it did not get from us.
    Exited { run_id: RunId, code: Option<i32> },
    Killed { run_id: RunId },
    Failed { run_id: RunId, reason: String },
}

impl RunEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::Output { run_id, .. }
            | RunEvent::Exited { run_id, .. }
            | RunEvent::Killed { run_id }
            | RunEvent::Failed { run_id, .. } => *run_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunEvent::Output { .. })
    }

    /// Terminal status carried by this event, if any.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            RunEvent::Output { .. } => None,
            RunEvent::Exited { code, .. } => Some(RunStatus::Exited { code: *code }),
            RunEvent::Killed { .. } => Some(RunStatus::Killed),
            RunEvent::Failed { reason, .. } => Some(RunStatus::Failed {
                reason: reason.clone(),
            }),
        }
    }
}
