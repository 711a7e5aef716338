//! Child process execution with a timeout and bounded output capture.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Output captured from a finished (or killed) child process.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes dropped from stdout and stderr combined once the limit was reached.
    pub dropped_bytes: usize,
    pub timed_out: bool,
}

impl CapturedOutput {
    /// True when the process exited successfully within its timeout.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Render stdout and stderr as a log document, capped at `limit` bytes.
    pub fn render_log(&self, label: &str, limit: usize) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.dropped_bytes > 0 {
            buf.push_str(&format!(
                "\n[{label} output truncated {} bytes]\n",
                self.dropped_bytes
            ));
        }
        if self.timed_out {
            buf.push_str(&format!("\n[{label} timed out]\n"));
        }
        truncate_to(buf, limit)
    }
}

/// Cap `text` at `limit` bytes (on a char boundary), noting how much was cut.
pub fn truncate_to(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let dropped = text.len() - cut;
    text.truncate(cut);
    text.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    text
}

/// Keep the last `limit` bytes of `text` (on a char boundary).
pub fn tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Run `cmd` to completion or until `timeout`, killing it on expiry.
///
/// stdin, stdout and stderr are serviced on their own threads so a chatty child
/// can never block on a full pipe. At most `limit` bytes of each stream are kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), limit))]
pub fn run_captured(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    limit: usize,
) -> Result<CapturedOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(program = %program, "spawning child process");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {program}"))?;

    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_vec();
            Some(thread::spawn(move || -> Result<()> {
                pipe.write_all(&input).context("write stdin")?;
                Ok(())
            }))
        }
        (Some(_), None) => return Err(anyhow!("stdin was not piped")),
        (None, _) => None,
    };
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || drain_bounded(stdout, limit));
    let stderr_reader = thread::spawn(move || drain_bounded(stderr, limit));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!(program = %program, timeout_secs = timeout.as_secs(), "child timed out, killing");
            child.kill().context("kill child")?;
            (child.wait().context("wait for killed child")?, true)
        }
    };

    if let Some(writer) = writer {
        // A child that exits without reading its input closes the pipe early.
        if let Err(err) = join(writer) {
            debug!(err = %err, "stdin writer ended early");
        }
    }
    let (stdout, stdout_dropped) = join(stdout_reader).context("collect stdout")?;
    let (stderr, stderr_dropped) = join(stderr_reader).context("collect stderr")?;
    let dropped_bytes = stdout_dropped + stderr_dropped;
    if dropped_bytes > 0 {
        warn!(dropped_bytes, "child output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
        dropped_bytes,
        timed_out,
    })
}

fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("pipe thread panicked"))?
}

fn drain_bounded<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        let keep = n.min(room);
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
    Ok((kept, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_feeds_stdin() {
        let cmd = Command::new("cat");
        let out = run_captured(cmd, Some(b"hello"), Duration::from_secs(5), 1024).expect("run");
        assert!(out.succeeded());
        assert_eq!(out.stdout_lossy(), "hello");
    }

    #[test]
    fn bounds_captured_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'abcdefghij'"]);
        let out = run_captured(cmd, None, Duration::from_secs(5), 4).expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.dropped_bytes, 6);
        assert!(out.render_log("test", 1000).contains("truncated 6 bytes"));
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let out = run_captured(cmd, None, Duration::from_millis(100), 1024).expect("run");
        assert!(out.timed_out);
        assert!(!out.succeeded());
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let cmd = Command::new("definitely-not-a-real-binary-tdd");
        let err = run_captured(cmd, None, Duration::from_secs(1), 10).unwrap_err();
        assert!(err.to_string().contains("spawn definitely-not-a-real-binary-tdd"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo".to_string();
        let cut = truncate_to(text, 2);
        assert!(cut.starts_with('h'));
        assert!(cut.contains("[truncated"));
        assert_eq!(tail("héllo", 4), "llo");
    }
}
