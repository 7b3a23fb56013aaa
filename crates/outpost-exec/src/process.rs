//! External process execution
//!
//! Two modes: [`stream`] yields stdout one newline-delimited record at a
//! time while the tool is still running, [`run`] waits for completion and
//! hands back the whole output.

use outpost_core::{Error, Result};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Longest stdout record accepted in streaming mode; longer records are skipped
pub const MAX_RECORD_BYTES: usize = 4 * 1024 * 1024;

/// Program and arguments, for logs and errors
pub fn command_line(cmd: &Command) -> String {
    let std = cmd.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lazy sequence of stdout records from a running process
pub struct Lines {
    command: String,
    child: Child,
    reader: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    limit: usize,
}

/// Start `cmd` and read its stdout record by record. Stderr is collected in
/// the background and reported by [`Lines::finish`] on failure.
pub fn stream(mut cmd: Command) -> Result<Lines> {
    let command = command_line(&cmd);
    debug!(command = %command, "starting");

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| {
            error!(command = %command, error = %source, "failed to start");
            Error::CommandSpawn {
                command: command.clone(),
                source,
            }
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Other(format!("{}: stdout not captured", command)))?;
    let stderr = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });

    Ok(Lines {
        command,
        child,
        reader: BufReader::new(stdout),
        stderr,
        limit: MAX_RECORD_BYTES,
    })
}

impl Lines {
    /// Next record without its line terminator, `None` at end of output
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            match self.read_record().await? {
                None => return Ok(None),
                Some(Record::Line(bytes)) => {
                    let mut line = String::from_utf8_lossy(&bytes).into_owned();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                    return Ok(Some(line));
                }
                Some(Record::Oversized(len)) => {
                    warn!(command = %self.command, bytes = len, "skipping oversized record");
                }
            }
        }
    }

    /// Wait for the process to exit; a non-zero exit is logged with stderr and returned
    pub async fn finish(mut self) -> Result<()> {
        let status = self.child.wait().await?;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };
        check_status(&self.command, status, &stderr)
    }

    async fn read_record(&mut self) -> Result<Option<Record>> {
        let mut record = Vec::new();
        let mut len = 0usize;
        let mut any = false;
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                if !any {
                    return Ok(None);
                }
                break;
            }
            any = true;
            let (chunk, newline) = match buf.iter().position(|b| *b == b'\n') {
                Some(i) => (i, true),
                None => (buf.len(), false),
            };
            len += chunk;
            if len <= self.limit {
                record.extend_from_slice(&buf[..chunk]);
            } else {
                record.clear();
            }
            self.reader.consume(if newline { chunk + 1 } else { chunk });
            if newline {
                break;
            }
        }
        if len > self.limit {
            Ok(Some(Record::Oversized(len)))
        } else {
            Ok(Some(Record::Line(record)))
        }
    }
}

enum Record {
    Line(Vec<u8>),
    Oversized(usize),
}

/// Run `cmd` to completion and return stdout followed by stderr
pub async fn run(cmd: Command) -> Result<String> {
    let (stdout, stderr) = output(cmd).await?;
    let mut combined = String::from_utf8_lossy(&stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&stderr));
    Ok(combined)
}

/// Run `cmd` to completion and return stdout only, for tools whose stdout is a
/// single document and whose stderr is chatter
pub async fn run_stdout(cmd: Command) -> Result<String> {
    let (stdout, _) = output(cmd).await?;
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

/// Run `cmd` with `input` on stdin and return stdout
pub async fn run_with_input(mut cmd: Command, input: &[u8]) -> Result<String> {
    let command = command_line(&cmd);
    debug!(command = %command, bytes = input.len(), "running with input");

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| {
            error!(command = %command, error = %source, "failed to start");
            Error::CommandSpawn {
                command: command.clone(),
                source,
            }
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        let input = input.to_vec();
        tokio::spawn(async move {
            let _ = stdin.write_all(&input).await;
        });
    }

    let output = child.wait_with_output().await?;
    check_status(&command, output.status, &output.stderr)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn output(mut cmd: Command) -> Result<(Vec<u8>, Vec<u8>)> {
    let command = command_line(&cmd);
    debug!(command = %command, "running");

    let output = cmd
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| {
            error!(command = %command, error = %source, "failed to start");
            Error::CommandSpawn {
                command: command.clone(),
                source,
            }
        })?;

    check_status(&command, output.status, &output.stderr)?;
    Ok((output.stdout, output.stderr))
}

fn check_status(command: &str, status: ExitStatus, stderr: &[u8]) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(stderr).into_owned();
    error!(command = %command, status = %status, stderr = %stderr, "failed to execute");
    Err(Error::CommandFailed {
        command: command.to_string(),
        status: status.to_string(),
        stderr,
    })
}
