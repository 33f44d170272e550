//! Subprocess execution for the awg/wg tools.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Output marker that turns a non-zero exit into a tolerated warning
const WARNING_MARKER: &str = "Warning";

/// Runs one external command per call, argument vector only, under a deadline
#[derive(Debug, Clone)]
pub(crate) struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `program args...` and return combined stdout/stderr
    pub(crate) async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        self.run_with_stdin(program, args, None).await
    }

    /// Run `program args...`, optionally feeding `stdin`, and return combined stdout/stderr
    pub(crate) async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<String> {
        let command_line = display_command(program, args);
        tracing::debug!("Executing: {}", command_line);

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::InterfaceCommand(format!("failed to start {}: {}", command_line, e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| Error::InterfaceCommand(format!("failed to write stdin of {}: {}", command_line, e)))?;
            // Close stdin so the child sees EOF
            drop(pipe);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result
                .map_err(|e| Error::InterfaceCommand(format!("failed to wait for {}: {}", command_line, e)))?,
            Err(_) => {
                tracing::error!("Command timed out after {:?}: {}", self.timeout, command_line);
                return Err(Error::InterfaceCommand(format!(
                    "{} timed out after {}s",
                    command_line,
                    self.timeout.as_secs()
                )));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        check_exit(&command_line, output.status.code(), output.status.success(), combined)
    }
}

/// Apply the exit policy: success, or a non-zero exit whose output carries
/// the warning marker, is accepted; anything else fails.
fn check_exit(command_line: &str, code: Option<i32>, success: bool, output: String) -> Result<String> {
    if success {
        return Ok(output);
    }
    if output.contains(WARNING_MARKER) {
        tracing::warn!(
            "{} exited with {:?} but reported a warning: {}",
            command_line,
            code,
            warning_lines(&output)
        );
        return Ok(output);
    }
    Err(Error::InterfaceCommand(format!(
        "{} failed with exit code {}: {}",
        command_line,
        code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
        output.trim()
    )))
}

/// Only the lines carrying the warning marker. Key generation prints key
/// material on its own lines, which must stay out of the log.
fn warning_lines(output: &str) -> String {
    output
        .lines()
        .filter(|line| line.contains(WARNING_MARKER))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("; ")
}

fn display_command(program: &str, args: &[&str]) -> String {
    let mut command_line = program.to_string();
    for arg in args {
        command_line.push(' ');
        command_line.push_str(arg);
    }
    command_line
}
