//! Dispatch of tool commands.

use crate::command::ToolCommand;
use crate::error::{CactusError, CactusResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

/// Captured output of a finished tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a [`ToolCommand`] to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand) -> CactusResult<ToolOutput>;
}

/// Spawns tools as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    bin_dir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve tools inside `bin_dir` instead of via `PATH`
    pub fn with_bin_dir(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: Some(bin_dir.into()),
        }
    }

    fn program_path(&self, program: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(program),
            None => PathBuf::from(program),
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand) -> CactusResult<ToolOutput> {
        tracing::debug!("Running: {}", command);

        let output = tokio::process::Command::new(self.program_path(&command.program))
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CactusError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            return Err(CactusError::ToolFailed {
                program: command.program.clone(),
                // Killed by a signal when there is no exit code
                status: output.status.code().unwrap_or(-1),
                stderr: result.stderr.trim().to_string(),
            });
        }

        tracing::info!("Ran {} okay", command.program);
        Ok(result)
    }
}

/// Records commands instead of running them
#[derive(Debug, Default)]
pub struct DryRunRunner {
    commands: Mutex<Vec<ToolCommand>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands seen so far, in dispatch order
    pub fn commands(&self) -> Vec<ToolCommand> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, command: &ToolCommand) -> CactusResult<ToolOutput> {
        tracing::info!("[dry-run] {}", command);
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.clone());
        }
        Ok(ToolOutput::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_process_runner_captures_stdout() {
        let runner = ProcessRunner::new();
        let output = runner
            .run(&ToolCommand::new("echo").arg("hello"))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_process_runner_reports_exit_status() {
        let runner = ProcessRunner::new();
        let err = runner
            .run(&ToolCommand::new("sh").args(["-c", "echo broken >&2; exit 3"]))
            .await
            .unwrap_err();

        match err {
            CactusError::ToolFailed {
                program,
                status,
                stderr,
            } => {
                assert_eq!(program, "sh");
                assert_eq!(status, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runner = ProcessRunner::with_bin_dir("/nonexistent/cactus/bin");
        let err = runner
            .run(&ToolCommand::new("cactus_setup"))
            .await
            .unwrap_err();
        assert!(matches!(err, CactusError::Spawn { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_dry_run_records_commands() {
        let runner = DryRunRunner::new();
        runner.run(&ToolCommand::new("a")).await.unwrap();
        runner.run(&ToolCommand::new("b").arg("x")).await.unwrap();

        let programs: Vec<String> = runner.commands().into_iter().map(|c| c.program).collect();
        assert_eq!(programs, vec!["a", "b"]);
    }
}
