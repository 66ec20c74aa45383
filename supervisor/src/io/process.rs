//! Blocking child-process execution with a wall-clock limit and bounded capture.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one output pipe.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Bytes read past the capture limit and discarded.
    pub dropped: usize,
}

impl Captured {
    /// Keep up to `limit` bytes of `reader`, then count and discard the rest
    /// so the writer never blocks on a full pipe.
    fn drain<R: Read>(mut reader: R, limit: usize) -> io::Result<Self> {
        let mut bytes = Vec::new();
        reader
            .by_ref()
            .take(u64::try_from(limit).unwrap_or(u64::MAX))
            .read_to_end(&mut bytes)?;
        let dropped = io::copy(&mut reader, &mut io::sink())?;
        Ok(Self {
            bytes,
            dropped: usize::try_from(dropped).unwrap_or(usize::MAX),
        })
    }

    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Outcome of a finished (or killed) child process.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

/// Run `cmd` with stdin closed, killing it once `timeout` elapses.
///
/// Both pipes are drained on scoped reader threads while the child runs.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_captured(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CapturedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(%program, "spawning child process");
    let mut child = cmd.spawn().with_context(|| format!("spawn {program}"))?;
    let stdout = child.stdout.take().context("stdout was not piped")?;
    let stderr = child.stderr.take().context("stderr was not piped")?;

    let output = thread::scope(|scope| -> Result<CapturedOutput> {
        let stdout = scope.spawn(move || Captured::drain(stdout, output_limit_bytes));
        let stderr = scope.spawn(move || Captured::drain(stderr, output_limit_bytes));
        let (status, timed_out) = wait_or_kill(&mut child, timeout)?;
        Ok(CapturedOutput {
            status,
            stdout: collect(stdout).context("read stdout")?,
            stderr: collect(stderr).context("read stderr")?,
            timed_out,
        })
    })?;

    if output.stdout.dropped > 0 || output.stderr.dropped > 0 {
        warn!(
            stdout_dropped = output.stdout.dropped,
            stderr_dropped = output.stderr.dropped,
            "child output exceeded capture limit"
        );
    }
    debug!(exit_code = ?output.status.code(), timed_out = output.timed_out, "child finished");
    Ok(output)
}

/// Wait for `child`; on timeout (or a failed wait) kill and reap it.
fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    match child.wait_timeout(timeout) {
        Ok(Some(status)) => Ok((status, false)),
        Ok(None) => {
            warn!(timeout_secs = timeout.as_secs(), "child timed out, killing");
            child.kill().context("kill child")?;
            let status = child.wait().context("reap killed child")?;
            Ok((status, true))
        }
        Err(err) => {
            let _ = child.kill();
            Err(err).context("wait for child")
        }
    }
}

fn collect(handle: ScopedJoinHandle<'_, io::Result<Captured>>) -> Result<Captured> {
    let captured = handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))??;
    Ok(captured)
}
