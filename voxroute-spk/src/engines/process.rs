//! External process helpers shared by command-line backends

use crate::error::SpeechError;
use std::path::{Path, PathBuf};
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Locate an executable on PATH
pub(crate) fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Explicit path if configured (must exist), otherwise a PATH lookup
pub(crate) fn resolve_binary(configured: Option<&Path>, program: &str) -> Result<PathBuf, SpeechError> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(SpeechError::Initialization(format!(
            "{} executable not found at {}",
            program,
            path.display()
        ))),
        None => find_in_path(program).ok_or_else(|| {
            SpeechError::Initialization(format!("'{}' was not found on PATH", program))
        }),
    }
}

/// Run a command to completion, feeding `stdin` if given.
///
/// Stdin is written from a separate task while the output is drained, so a
/// child that stops reading cannot outlive `timeout`. Timeout and non-zero
/// exit both become synthesis errors naming the program; the child is killed
/// if the timeout fires.
pub(crate) async fn run(
    mut cmd: Command,
    program: &str,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<Vec<u8>, SpeechError> {
    cmd.kill_on_drop(true)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| SpeechError::Synthesis(format!("Failed to run '{}': {}", program, e)))?;

    let writer = match (stdin, child.stdin.take()) {
        (Some(text), Some(mut pipe)) => {
            let text = text.to_string();
            Some(tokio::spawn(async move {
                // Pipe is dropped on return so the child sees EOF
                pipe.write_all(text.as_bytes()).await
            }))
        }
        _ => None,
    };

    let waited = tokio::time::timeout(timeout, child.wait_with_output()).await;
    let output = match waited {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            abort_writer(writer);
            return Err(SpeechError::Synthesis(format!("Failed to wait for '{}': {}", program, e)));
        }
        Err(_) => {
            abort_writer(writer);
            error!("'{}' timed out after {}s", program, timeout.as_secs());
            return Err(SpeechError::Synthesis(format!(
                "'{}' timed out after {} seconds. Text may be too long.",
                program,
                timeout.as_secs()
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!("'{}' failed with {}: {}", program, output.status, stderr);
        return Err(SpeechError::Synthesis(format!(
            "'{}' failed ({}): {}",
            program,
            output.status,
            if stderr.is_empty() { "Unknown error" } else { stderr.as_str() }
        )));
    }

    if let Some(writer) = writer {
        match writer.await {
            Ok(Ok(())) => {}
            // The child may legitimately exit before consuming all of stdin
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("'{}' closed stdin early", program);
            }
            Ok(Err(e)) => {
                return Err(SpeechError::Synthesis(format!("Failed to write to '{}': {}", program, e)));
            }
            Err(e) => {
                return Err(SpeechError::Synthesis(format!("Stdin writer for '{}' failed: {}", program, e)));
            }
        }
    }

    debug!("'{}' completed", program);
    Ok(output.stdout)
}

fn abort_writer(writer: Option<JoinHandle<std::io::Result<()>>>) {
    if let Some(writer) = writer {
        writer.abort();
    }
}
