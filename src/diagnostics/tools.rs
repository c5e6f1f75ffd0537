use crate::diagnostics::ProbeError;
use std::io::{ErrorKind, Read, Write};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Exit status and captured streams of an external tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    /// First stderr line, or the exit code when stderr is empty.
    pub fn failure_reason(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim();
        match (stderr.lines().next(), self.code) {
            (Some(line), _) => line.to_string(),
            (None, Some(code)) => format!("exited with status {code}"),
            (None, None) => "terminated by signal".to_string(),
        }
    }
}

/// Runs the external programs hardware checks depend on.
pub trait ToolRunner: Send + Sync {
    /// Runs `program` to completion or until `limit` passes, whichever is
    /// first. A program still running at the limit is killed.
    fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
        limit: Duration,
    ) -> Result<ToolOutput, ProbeError>;
}

/// Looks programs up on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTools;

impl ToolRunner for SystemTools {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
        limit: Duration,
    ) -> Result<ToolOutput, ProbeError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    ProbeError::command(program, "command not found")
                } else {
                    ProbeError::io(format!("starting {program}"), err)
                }
            })?;

        // Streams are drained on their own threads so a chatty child never
        // blocks on a full pipe while we poll for its exit.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let feeder = match (stdin, child.stdin.take()) {
            (Some(data), Some(mut pipe)) => {
                let data = data.to_vec();
                let name = program.to_string();
                Some(thread::spawn(move || {
                    // A child that exits early closes the pipe; its exit
                    // status says why.
                    if let Err(err) = pipe.write_all(&data) {
                        debug!(program = %name, error = %err, "writing to child stdin failed");
                    }
                }))
            }
            _ => None,
        };

        let deadline = Instant::now().checked_add(limit);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if deadline.is_some_and(|d| Instant::now() >= d) => {
                    warn!(program, ?limit, "external tool overran its deadline, killing it");
                    let _ = child.kill();
                    let _ = child.wait();
                    break None;
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProbeError::io(format!("waiting for {program}"), err));
                }
            }
        };

        if let Some(feeder) = feeder {
            let _ = feeder.join();
        }
        let stdout = collect(stdout);
        let stderr = collect(stderr);

        match status {
            Some(status) => Ok(ToolOutput {
                success: status.success(),
                code: status.code(),
                stdout,
                stderr,
            }),
            None => Err(ProbeError::command(
                program,
                format!("timed out after {}", humantime::format_duration(limit)),
            )),
        }
    }
}

fn drain<R: Read + Send + 'static>(mut stream: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
