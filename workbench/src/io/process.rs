//! Blocking runner for short-lived helper processes (git).
//!
//! Unlike user runs, these are awaited to completion: output is captured up
//! to a byte limit and the child is killed once its deadline passes.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one pipe, plus how many were read and thrown away.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        self.stdout.lossy()
    }

    pub fn stderr_lossy(&self) -> String {
        self.stderr.lossy()
    }
}

/// Run `cmd` to completion, killing it after `timeout`.
///
/// Both pipes are drained on their own threads while the child runs, so a
/// chatty child cannot fill a pipe and stall. At most `limit` bytes per pipe
/// are kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), limit))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    limit: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = capture(&mut child, |c| c.stdout.take().map(|p| Box::new(p) as Pipe), limit)?;
    let stderr = capture(&mut child, |c| c.stderr.take().map(|p| Box::new(p) as Pipe), limit)?;

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let output = CommandOutput {
        status,
        stdout: join(stdout).context("collect stdout")?,
        stderr: join(stderr).context("collect stderr")?,
        timed_out,
    };
    if output.stdout.dropped > 0 || output.stderr.dropped > 0 {
        debug!(
            stdout_dropped = output.stdout.dropped,
            stderr_dropped = output.stderr.dropped,
            "output beyond limit discarded"
        );
    }
    debug!(exit_code = ?output.status.code(), timed_out, "command finished");
    Ok(output)
}

type Pipe = Box<dyn Read + Send>;

fn capture(
    child: &mut Child,
    take: impl FnOnce(&mut Child) -> Option<Pipe>,
    limit: usize,
) -> Result<JoinHandle<Result<Captured>>> {
    let pipe = take(child).ok_or_else(|| anyhow!("pipe was not captured"))?;
    Ok(thread::spawn(move || read_limited(pipe, limit)))
}

fn join(handle: JoinHandle<Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow!("output reader thread panicked")))
}

fn read_limited(mut reader: impl Read, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[test]
    fn captures_both_streams() {
        let out = run_command_with_timeout(
            sh("printf out; printf err >&2; exit 3"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert_eq!(out.stdout.bytes, b"out");
        assert_eq!(out.stderr_lossy(), "err");
        assert_eq!(out.status.code(), Some(3));
        assert!(!out.success());
    }

    #[test]
    fn keeps_only_the_limit() {
        let out = run_command_with_timeout(sh("printf 0123456789"), Duration::from_secs(10), 4)
            .expect("run");
        assert_eq!(out.stdout.bytes, b"0123");
        assert_eq!(out.stdout.dropped, 6);
    }

    #[test]
    fn kills_on_timeout() {
        let out = run_command_with_timeout(sh("exec sleep 30"), Duration::from_millis(200), 1024)
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run_command_with_timeout(
            Command::new("no-such-binary-for-workbench"),
            Duration::from_secs(1),
            16,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }
}
