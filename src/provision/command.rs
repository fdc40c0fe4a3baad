//! Package manager process execution

use crate::error::{DepcacheError, DepcacheResult};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

/// Max number of output lines to include in install error messages.
const INSTALL_ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of installer output for error diagnostics.
pub(crate) fn install_error_output(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(INSTALL_ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Run an ecosystem's installer in `cwd`, streaming each output line to
/// `on_output`.
///
/// A non-zero exit becomes [`DepcacheError::InstallFailed`] carrying the tail
/// of the combined output.
pub async fn run_install(
    ecosystem: &str,
    argv: &[String],
    cwd: &Path,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> DepcacheResult<()> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        DepcacheError::User(format!("No install command configured for {}", ecosystem))
    })?;
    let command_line = argv.join(" ");
    debug!("Running {} in {}", command_line, cwd.display());

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DepcacheError::command_failed(command_line.clone(), e))?;

    let output = stream_child_output(&mut child, on_output).await;
    let status = child
        .wait()
        .await
        .map_err(|e| DepcacheError::command_failed(command_line, e))?;

    if status.success() {
        Ok(())
    } else {
        Err(DepcacheError::InstallFailed {
            ecosystem: ecosystem.to_string(),
            code: status.code().unwrap_or(-1),
            output: install_error_output(&output),
        })
    }
}

/// Run a smoke check in `cwd`. Anything but a clean exit counts as failure.
pub async fn run_check(argv: &[String], cwd: &Path) -> bool {
    let Some((program, args)) = argv.split_first() else {
        return false;
    };

    let result = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            debug!(
                "{} exited with {:?}: {}",
                argv.join(" "),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Err(e) => {
            debug!("Failed to run {}: {}", argv.join(" "), e);
            false
        }
    }
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns all collected output lines for error reporting.
async fn stream_child_output(
    child: &mut Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Vec::new();
    };

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut all_output = Vec::new();
    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    all_output
}
