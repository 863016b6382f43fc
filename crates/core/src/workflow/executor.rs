use super::dag::WorkflowDag;
use super::step_executor::StepExecutor;
use crate::events::{Event, EventLog, EventType};
use crate::runner::CommandRunner;
use crate::types::{Run, RunId, RunStatus, StepExecution, StepId, StepStatus, WorkflowSpec};
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Workflow executor that sequences tool invocations along the DAG
pub struct WorkflowExecutor {
    event_log: Arc<dyn EventLog>,
    step_executor: StepExecutor,
}

impl WorkflowExecutor {
    pub fn new(event_log: Arc<dyn EventLog>, runner: Arc<dyn CommandRunner>) -> Self {
        let step_executor = StepExecutor::new(event_log.clone(), runner);

        Self {
            event_log,
            step_executor,
        }
    }

    /// Execute a workflow and return the run.
    ///
    /// Step failures do not abort the run: independent branches keep going and
    /// everything downstream of a failure is skipped. The run is `Failed` if any
    /// step failed.
    pub async fn execute(&self, workflow: &WorkflowSpec) -> Result<Run> {
        let run_id = RunId::new();
        let started_at = chrono::Utc::now();

        tracing::info!("Starting workflow {}: run_id={}", workflow.name, run_id);

        let dag = WorkflowDag::from_workflow(workflow).context("Failed to build DAG")?;

        self.event_log
            .append(Event::new(
                run_id,
                EventType::RunStarted {
                    workflow: workflow.name.clone(),
                    step_count: workflow.steps.len(),
                },
            ))
            .await?;

        let steps = self.execute_dag(run_id, &dag, workflow).await?;

        let completed_at = chrono::Utc::now();
        let duration = (completed_at - started_at).num_seconds().max(0) as u64;

        let failed: Vec<&StepExecution> = steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .collect();

        let status = if failed.is_empty() {
            self.event_log
                .append(Event::new(
                    run_id,
                    EventType::RunCompleted {
                        duration_secs: duration,
                    },
                ))
                .await?;

            tracing::info!("Workflow completed: run_id={}", run_id);
            RunStatus::Completed
        } else {
            let error = failed
                .iter()
                .map(|s| {
                    format!(
                        "step {} failed: {}",
                        s.id,
                        s.error.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");

            self.event_log
                .append(Event::new(
                    run_id,
                    EventType::RunFailed {
                        error: error.clone(),
                        duration_secs: duration,
                    },
                ))
                .await?;

            tracing::error!("Workflow failed: run_id={}, error={}", run_id, error);
            RunStatus::Failed
        };

        Ok(Run {
            id: run_id,
            workflow: workflow.name.clone(),
            status,
            started_at,
            completed_at: Some(completed_at),
            steps,
        })
    }

    async fn execute_dag(
        &self,
        run_id: RunId,
        dag: &WorkflowDag,
        workflow: &WorkflowSpec,
    ) -> Result<Vec<StepExecution>> {
        // Steps that failed or were skipped; their dependents cannot run
        let mut blocked: HashSet<StepId> = HashSet::new();
        let mut step_executions: HashMap<StepId, StepExecution> = HashMap::new();

        for step in &workflow.steps {
            self.event_log
                .append(Event::new(
                    run_id,
                    EventType::StepScheduled {
                        step_id: step.id.clone(),
                        command: step.command.clone(),
                    },
                ))
                .await?;

            step_executions.insert(step.id.clone(), StepExecution::pending(step.id.clone()));
        }

        for step in dag.topological_order() {
            let deps = dag.dependencies(&step.id)?;
            if let Some(dep) = deps.iter().find(|d| blocked.contains(*d)) {
                tracing::info!("Skipping step {} because {} did not complete", step.id, dep);

                self.event_log
                    .append(Event::new(
                        run_id,
                        EventType::StepSkipped {
                            step_id: step.id.clone(),
                            reason: format!("Dependency {} did not complete", dep),
                        },
                    ))
                    .await?;

                if let Some(exec) = step_executions.get_mut(&step.id) {
                    exec.status = StepStatus::Skipped;
                }
                blocked.insert(step.id.clone());
                continue;
            }

            let started_at = chrono::Utc::now();
            let result = self.step_executor.execute(run_id, &step, 1).await?;
            let completed_at = chrono::Utc::now();

            if let Some(exec) = step_executions.get_mut(&step.id) {
                exec.status = result.status;
                exec.started_at = Some(started_at);
                exec.completed_at = Some(completed_at);
                exec.attempt = result.attempts;
                exec.error = result.error.clone();
            }

            if result.status != StepStatus::Completed {
                blocked.insert(step.id.clone());
            }
        }

        // Report in declaration order
        Ok(workflow
            .steps
            .iter()
            .filter_map(|s| step_executions.remove(&s.id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ToolCommand;
    use crate::error::{CactusError, CactusResult};
    use crate::runner::{DryRunRunner, ToolOutput};
    use crate::storage::JsonlEventLog;
    use crate::types::StepSpec;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Fails every command whose program is listed
    struct FailingRunner {
        fail: Vec<&'static str>,
    }

    #[async_trait]
    impl CommandRunner for FailingRunner {
        async fn run(&self, command: &ToolCommand) -> CactusResult<ToolOutput> {
            if self.fail.contains(&command.program.as_str()) {
                return Err(CactusError::ToolFailed {
                    program: command.program.clone(),
                    status: 2,
                    stderr: "boom".to_string(),
                });
            }
            Ok(ToolOutput::default())
        }
    }

    fn workflow() -> WorkflowSpec {
        let mut wf = WorkflowSpec::new("test");
        wf.push(StepSpec::new("setup", "setup", ToolCommand::new("setup")), &[]);
        wf.push(
            StepSpec::new("core", "core", ToolCommand::new("core")),
            &[StepId::new("setup")],
        );
        wf.push(
            StepSpec::new("maf", "maf", ToolCommand::new("maf")),
            &[StepId::new("core")],
        );
        wf.push(
            StepSpec::new("stats", "stats", ToolCommand::new("stats")),
            &[StepId::new("setup")],
        );
        wf
    }

    fn event_log(dir: &TempDir) -> Arc<JsonlEventLog> {
        Arc::new(JsonlEventLog::new(dir.path().to_path_buf()).unwrap())
    }

    #[tokio::test]
    async fn test_runs_steps_in_dependency_order() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(DryRunRunner::new());
        let executor = WorkflowExecutor::new(event_log(&dir), runner.clone());

        let run = executor.execute(&workflow()).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.steps.iter().all(|s| s.status == StepStatus::Completed));

        let order: Vec<String> = runner.commands().into_iter().map(|c| c.program).collect();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], "setup");
        let core = order.iter().position(|p| p == "core").unwrap();
        let maf = order.iter().position(|p| p == "maf").unwrap();
        assert!(core < maf);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let dir = TempDir::new().unwrap();
        let log = event_log(&dir);
        let runner = Arc::new(FailingRunner { fail: vec!["core"] });
        let executor = WorkflowExecutor::new(log.clone(), runner);

        let run = executor.execute(&workflow()).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);

        let status: HashMap<String, StepStatus> =
            run.steps.iter().map(|s| (s.id.0.clone(), s.status)).collect();
        assert_eq!(status["setup"], StepStatus::Completed);
        assert_eq!(status["core"], StepStatus::Failed);
        assert_eq!(status["maf"], StepStatus::Skipped);
        assert_eq!(status["stats"], StepStatus::Completed);

        let events = log.get_run_events(run.id).await.unwrap();
        match &events.last().unwrap().event_type {
            EventType::RunFailed { error, .. } => assert!(error.contains("step core failed")),
            other => panic!("unexpected final event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_workflow_is_rejected_before_running() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(DryRunRunner::new());
        let executor = WorkflowExecutor::new(event_log(&dir), runner.clone());

        let mut wf = workflow();
        wf.dependencies
            .insert(StepId::new("setup"), vec![StepId::new("maf")]);

        assert!(executor.execute(&wf).await.is_err());
        assert!(runner.commands().is_empty());
    }
}
