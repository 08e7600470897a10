//! Running external command-line collaborators.

use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::debug;

/// Run `command` to completion with stdout and stderr captured into `log`.
///
/// Fails if the tool cannot be started or exits unsuccessfully; the error
/// names the tool and points at the log.
pub fn run_logged(mut command: Command, tool: &str, log: &Path) -> Result<()> {
    if let Some(parent) = log.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let stdout = File::create(log).with_context(|| format!("Failed to create log {}", log.display()))?;
    let stderr = stdout
        .try_clone()
        .with_context(|| format!("Failed to share log {}", log.display()))?;

    debug!("Running {:?}", command);
    let status = command
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .status()
        .with_context(|| format!("Failed to start {tool}"))?;

    if !status.success() {
        bail!("{tool} exited with {status}, see {}", log.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_tool_fails_to_start() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("logs/tool.log");
        let err = run_logged(Command::new("/non/existent/brainprep-tool"), "brainprep-tool", &log)
            .unwrap_err();
        assert!(err.to_string().contains("Failed to start brainprep-tool"));
        assert!(log.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_output_is_captured() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("echo.log");
        let mut command = Command::new("sh");
        command.args(["-c", "echo registered; echo warning >&2"]);
        run_logged(command, "sh", &log).unwrap();

        let captured = fs::read_to_string(&log).unwrap();
        assert!(captured.contains("registered"));
        assert!(captured.contains("warning"));
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_status_is_reported() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("fail.log");
        let mut command = Command::new("sh");
        command.args(["-c", "exit 3"]);
        let err = run_logged(command, "sh", &log).unwrap_err();
        assert!(err.to_string().contains("sh exited with"));
    }
}
