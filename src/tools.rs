//! Blocking execution of external programs.

use crate::errors::{DockingError, Result};
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run `command` to completion, returning its captured stderr on success.
///
/// A non-zero exit becomes [`DockingError::ToolFailed`]. With a `timeout`,
/// the child is killed once the limit passes and
/// [`DockingError::ToolTimeout`] is returned.
pub fn run_tool(tool: &str, mut command: Command, timeout: Option<Duration>) -> Result<String> {
    trace!("Running {tool}: {command:?}");
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| DockingError::tool_failed(tool, "could not start", e.to_string()))?;

    // Drain stderr on a side thread so a chatty tool cannot block on a full pipe
    let stderr = child.stderr.take();
    let reader = thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    });

    let status = match timeout {
        None => child.wait()?,
        Some(limit) => match wait_with_deadline(&mut child, limit)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DockingError::ToolTimeout {
                    tool: tool.to_string(),
                    timeout: limit,
                });
            }
        },
    };

    let stderr = reader.join().unwrap_or_default();
    if status.success() {
        debug!("{tool} finished");
        Ok(stderr)
    } else {
        Err(DockingError::tool_failed(tool, status, stderr.trim()))
    }
}

fn wait_with_deadline(
    child: &mut std::process::Child,
    limit: Duration,
) -> Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= limit {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(limit));
    }
}
