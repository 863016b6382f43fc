use crate::error::CactusError;
use crate::events::{Event, EventLog, EventType};
use crate::runner::{CommandRunner, ToolOutput};
use crate::types::{RunId, StepSpec, StepStatus};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Longest wait between two attempts of a step
const MAX_BACKOFF_SECS: u64 = 3600;

/// Exponential backoff before the attempt after `attempt`, capped at
/// [`MAX_BACKOFF_SECS`]
fn backoff_delay(backoff_secs: u64, attempt: u32) -> Duration {
    let factor = 2_u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_secs(backoff_secs.saturating_mul(factor).min(MAX_BACKOFF_SECS))
}

/// Result of executing a step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub status: StepStatus,
    pub error: Option<String>,
    pub attempts: u32,
    pub output: Option<ToolOutput>,
}

/// Runs one tool invocation with retry and timeout logic
pub struct StepExecutor {
    event_log: Arc<dyn EventLog>,
    runner: Arc<dyn CommandRunner>,
}

impl StepExecutor {
    pub fn new(event_log: Arc<dyn EventLog>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { event_log, runner }
    }

    /// Execute a step, retrying per its policy
    pub async fn execute(
        &self,
        run_id: RunId,
        step: &StepSpec,
        attempt: u32,
    ) -> Result<StepResult> {
        tracing::info!(
            "Executing step {} (attempt {}) for run {}",
            step.id,
            attempt,
            run_id
        );

        self.event_log
            .append(Event::new(
                run_id,
                EventType::StepStarted {
                    step_id: step.id.clone(),
                    attempt,
                },
            ))
            .await?;

        let start = std::time::Instant::now();

        let result = if let Some(timeout_secs) = step.timeout_secs {
            match timeout(Duration::from_secs(timeout_secs), self.runner.run(&step.command)).await {
                Ok(result) => result.map_err(anyhow::Error::from),
                Err(_) => {
                    tracing::warn!("Step {} timed out", step.id);
                    Err(anyhow!("Step timed out after {} seconds", timeout_secs))
                }
            }
        } else {
            self.runner.run(&step.command).await.map_err(anyhow::Error::from)
        };

        let duration = start.elapsed();

        match result {
            Ok(output) => {
                self.event_log
                    .append(Event::new(
                        run_id,
                        EventType::StepCompleted {
                            step_id: step.id.clone(),
                            duration_secs: duration.as_secs(),
                        },
                    ))
                    .await?;

                if !output.stdout.is_empty() || !output.stderr.is_empty() {
                    self.event_log
                        .append(Event::new(
                            run_id,
                            EventType::ToolOutputRecorded {
                                step_id: step.id.clone(),
                                stdout: output.stdout.clone(),
                                stderr: output.stderr.clone(),
                            },
                        ))
                        .await?;
                }

                Ok(StepResult {
                    status: StepStatus::Completed,
                    error: None,
                    attempts: attempt,
                    output: Some(output),
                })
            }
            Err(e) => {
                let error_msg = e.to_string();
                let will_retry = self.should_retry(step, attempt, &e);

                self.event_log
                    .append(Event::new(
                        run_id,
                        EventType::StepFailed {
                            step_id: step.id.clone(),
                            error: error_msg.clone(),
                            attempt,
                            will_retry,
                        },
                    ))
                    .await?;

                if will_retry {
                    let backoff = step
                        .retry_policy
                        .as_ref()
                        .map(|p| p.backoff_secs)
                        .unwrap_or(1);
                    let backoff_duration = backoff_delay(backoff, attempt);

                    tracing::warn!(
                        "Retrying step {} after {:?} (attempt {})",
                        step.id,
                        backoff_duration,
                        attempt + 1
                    );

                    tokio::time::sleep(backoff_duration).await;

                    // Boxed to keep the recursive future sized
                    return Box::pin(self.execute(run_id, step, attempt + 1)).await;
                }

                Ok(StepResult {
                    status: StepStatus::Failed,
                    error: Some(error_msg),
                    attempts: attempt,
                    output: None,
                })
            }
        }
    }

    /// Tool failures and timeouts are retried while attempts remain
    fn should_retry(&self, step: &StepSpec, attempt: u32, error: &anyhow::Error) -> bool {
        let retryable = error
            .downcast_ref::<CactusError>()
            .map(CactusError::is_retryable)
            .unwrap_or(true);

        match &step.retry_policy {
            Some(retry_policy) => retryable && attempt < retry_policy.max_attempts,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ToolCommand;
    use crate::error::CactusResult;
    use crate::storage::JsonlEventLog;
    use crate::types::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Fails a fixed number of times before succeeding
    struct FlakyRunner {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CommandRunner for FlakyRunner {
        async fn run(&self, command: &ToolCommand) -> CactusResult<ToolOutput> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CactusError::ToolFailed {
                    program: command.program.clone(),
                    status: 1,
                    stderr: "transient".to_string(),
                });
            }
            Ok(ToolOutput {
                stdout: "done".to_string(),
                stderr: String::new(),
            })
        }
    }

    fn setup(failures: u32) -> (TempDir, Arc<JsonlEventLog>, Arc<FlakyRunner>, StepExecutor) {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(JsonlEventLog::new(dir.path().to_path_buf()).unwrap());
        let runner = Arc::new(FlakyRunner {
            failures,
            calls: AtomicU32::new(0),
        });
        let executor = StepExecutor::new(log.clone(), runner.clone());
        (dir, log, runner, executor)
    }

    fn step(max_attempts: Option<u32>) -> StepSpec {
        let mut step = StepSpec::new("core", "cactus_core", ToolCommand::new("cactus_core"));
        step.retry_policy = max_attempts.map(|max_attempts| RetryPolicy {
            max_attempts,
            backoff_secs: 0,
        });
        step
    }

    #[tokio::test]
    async fn test_step_succeeds_after_retries() {
        let (_dir, log, runner, executor) = setup(2);
        let run_id = RunId::new();

        let result = executor.execute(run_id, &step(Some(3)), 1).await.unwrap();
        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.attempts, 3);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);

        let events = log.get_run_events(run_id).await.unwrap();
        let failures = events
            .iter()
            .filter(|e| matches!(e.event_type, EventType::StepFailed { will_retry: true, .. }))
            .count();
        assert_eq!(failures, 2);
        assert!(events.iter().any(|e| matches!(
            &e.event_type,
            EventType::ToolOutputRecorded { stdout, .. } if stdout == "done"
        )));
    }

    #[tokio::test]
    async fn test_step_without_policy_fails_once() {
        let (_dir, _log, runner, executor) = setup(1);

        let result = executor.execute(RunId::new(), &step(None), 1).await.unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.unwrap().contains("transient"));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay(2, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(0, 70), Duration::ZERO);
        assert_eq!(backoff_delay(1, 70), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(backoff_delay(u64::MAX, 2), Duration::from_secs(MAX_BACKOFF_SECS));
    }

    #[tokio::test]
    async fn test_long_retry_budget_does_not_overflow() {
        let (_dir, _log, runner, executor) = setup(u32::MAX);

        let result = executor.execute(RunId::new(), &step(Some(70)), 1).await.unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.attempts, 70);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 70);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (_dir, _log, runner, executor) = setup(10);

        let result = executor.execute(RunId::new(), &step(Some(2)), 1).await.unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.attempts, 2);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }
}
