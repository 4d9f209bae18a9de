//! Child process helpers shared by the build engine, git and workers.

use std::process::Stdio;
use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("command line {0:?} could not be parsed")]
    Parse(String),
    #[error("empty command line")]
    Empty,
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout and stderr joined, trimmed; used as diagnostic text.
    pub fn diagnostics(&self) -> String {
        let mut text = self.stdout.trim_end().to_string();
        let err = self.stderr.trim_end();
        if !err.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(err);
        }
        text
    }
}

/// Splits a command line with POSIX shell quoting rules.
pub fn split_command_line(line: &str) -> Result<Vec<String>, ProcessError> {
    let parts = shlex::split(line).ok_or_else(|| ProcessError::Parse(line.to_string()))?;
    if parts.is_empty() {
        return Err(ProcessError::Empty);
    }
    Ok(parts)
}

/// Runs `argv` in `cwd` to completion, capturing its output.
///
/// The child is killed when `timeout` elapses or `cancel` fires.
pub async fn run_captured(
    argv: &[String],
    cwd: &Utf8Path,
    timeout: Option<Duration>,
    cancel: Option<&CancellationToken>,
) -> Result<CommandOutput, ProcessError> {
    let (program, args) = argv.split_first().ok_or(ProcessError::Empty)?;
    tracing::debug!("running {:?} {:?} in {}", program, args, cwd);

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

    let wait = child.wait_with_output();
    let never = CancellationToken::new();
    let cancel = cancel.unwrap_or(&never);

    let waited = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(res) => res.map_err(ProcessError::from),
                Err(_) => Err(ProcessError::TimedOut(limit)),
            },
            None => wait.await.map_err(ProcessError::from),
        }
    };

    // Dropping `waited` drops the child, which kills it.
    let output = tokio::select! {
        _ = cancel.cancelled() => return Err(ProcessError::Cancelled),
        res = waited => res?,
    };

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
