//! Helpers for running external tools (`git`, `docker`).

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Output, Stdio};
use std::sync::mpsc;

use crate::error::{Result, ShipwrightError};

#[derive(Debug, Clone)]
struct CommandOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }

    fn diagnostic(&self) -> String {
        last_line(&self.stderr)
            .or_else(|| last_line(&self.stdout))
            .unwrap_or_else(|| format!("exit status {}", self.status))
    }
}

/// Render a command for error messages and logs.
pub(crate) fn describe(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(
        command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned()),
    );
    parts.join(" ")
}

/// Run a command to completion and return its stdout.
pub(crate) fn capture(command: &mut Command) -> Result<String> {
    let description = describe(command);
    log::debug!("running {description}");
    let output = CommandOutput::from(command.output()?);
    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(ShipwrightError::Command {
            command: description,
            message: output.diagnostic(),
        })
    }
}

/// Run a command and report whether it exited successfully, discarding output.
pub(crate) fn succeeds(command: &mut Command) -> Result<bool> {
    log::debug!("running {}", describe(command));
    let status = command
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    Ok(status.success())
}

/// Run a command, forwarding every stdout and stderr line as it arrives.
pub(crate) fn stream(command: &mut Command, output: &mut dyn FnMut(String)) -> Result<()> {
    let description = describe(command);
    log::debug!("running {description}");
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ShipwrightError::Other(format!("{description}: stdout unavailable")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ShipwrightError::Other(format!("{description}: stderr unavailable")))?;

    let (sender, receiver) = mpsc::channel::<(bool, String)>();
    let last_error = std::thread::scope(|scope| {
        let stdout_sender = sender.clone();
        scope.spawn(move || forward_lines(stdout, false, stdout_sender));
        scope.spawn(move || forward_lines(stderr, true, sender));

        let mut last_error = None;
        for (is_stderr, line) in receiver {
            if is_stderr && !line.trim().is_empty() {
                last_error = Some(line.trim().to_string());
            }
            output(line);
        }
        last_error
    });

    let status = child.wait()?;
    if status.success() {
        Ok(())
    } else {
        Err(ShipwrightError::Command {
            command: description,
            message: last_error.unwrap_or_else(|| format!("exit status {status}")),
        })
    }
}

fn forward_lines<R: Read>(reader: R, is_stderr: bool, sender: mpsc::Sender<(bool, String)>) {
    for line in BufReader::new(reader).lines().map_while(std::io::Result::ok) {
        if sender.send((is_stderr, line)).is_err() {
            break;
        }
    }
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}
