//! Directory-backed workflow runs.
//!
//! A job tree directory holds the event log of every run started in it. The
//! status of the most recent run is rebuilt from those events, so a later
//! process can check whether a pipeline finished.

use super::executor::WorkflowExecutor;
use crate::error::{CactusError, CactusResult};
use crate::events::{EventLog, EventType};
use crate::runner::CommandRunner;
use crate::storage::JsonlEventLog;
use crate::types::{Run, RunId, RunStatus, StepId, WorkflowSpec};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Summary of a run rebuilt from its events
#[derive(Debug, Clone, PartialEq)]
pub struct JobTreeStatus {
    pub run_id: RunId,
    pub workflow: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub total_steps: usize,
    pub completed: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    pub skipped: BTreeSet<String>,
    pub error: Option<String>,
}

impl JobTreeStatus {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Job tree rooted at a directory
pub struct JobTree {
    dir: PathBuf,
    event_log: Arc<JsonlEventLog>,
    executor: WorkflowExecutor,
}

impl JobTree {
    pub fn open(dir: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let dir = dir.into();
        let event_log = Arc::new(
            JsonlEventLog::new(dir.clone()).context("Failed to open job tree event log")?,
        );
        let executor = WorkflowExecutor::new(event_log.clone(), runner);

        Ok(Self {
            dir,
            event_log,
            executor,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run a workflow, recording its events in this job tree
    pub async fn run(&self, workflow: &WorkflowSpec) -> Result<Run> {
        tracing::info!("Running {} in job tree {}", workflow.name, self.dir.display());
        let run = self.executor.execute(workflow).await?;
        self.event_log.flush(&run.id).await?;
        Ok(run)
    }

    /// Status of the most recently started run, if any
    pub async fn status(&self) -> Result<Option<JobTreeStatus>> {
        let mut latest: Option<JobTreeStatus> = None;
        for run_id in self.event_log.list_runs().await? {
            if let Some(status) = self.run_status(run_id).await? {
                if latest
                    .as_ref()
                    .map_or(true, |l| status.started_at > l.started_at)
                {
                    latest = Some(status);
                }
            }
        }
        Ok(latest)
    }

    /// Rebuild a run's status from its events
    pub async fn run_status(&self, run_id: RunId) -> Result<Option<JobTreeStatus>> {
        let events = self.event_log.get_run_events(run_id).await?;
        let Some(first) = events.first() else {
            return Ok(None);
        };

        let mut status = JobTreeStatus {
            run_id,
            workflow: String::new(),
            status: RunStatus::Running,
            started_at: first.timestamp,
            total_steps: 0,
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            skipped: BTreeSet::new(),
            error: None,
        };

        let name = |id: &StepId| id.0.clone();
        for event in &events {
            match &event.event_type {
                EventType::RunStarted {
                    workflow,
                    step_count,
                } => {
                    status.workflow = workflow.clone();
                    status.total_steps = *step_count;
                    status.started_at = event.timestamp;
                }
                EventType::StepCompleted { step_id, .. } => {
                    status.failed.remove(&name(step_id));
                    status.completed.insert(name(step_id));
                }
                EventType::StepFailed {
                    step_id,
                    will_retry: false,
                    ..
                } => {
                    status.failed.insert(name(step_id));
                }
                EventType::StepSkipped { step_id, .. } => {
                    status.skipped.insert(name(step_id));
                }
                EventType::RunCompleted { .. } => status.status = RunStatus::Completed,
                EventType::RunFailed { error, .. } => {
                    status.status = RunStatus::Failed;
                    status.error = Some(error.clone());
                }
                _ => {}
            }
        }

        Ok(Some(status))
    }

    /// Fail unless the latest run finished every step
    pub async fn ensure_complete(&self) -> CactusResult<JobTreeStatus> {
        let incomplete = |reason: String| CactusError::JobTreeIncomplete {
            path: self.dir.clone(),
            reason,
        };

        let status = self
            .status()
            .await
            .map_err(|e| incomplete(format!("{:#}", e)))?
            .ok_or_else(|| incomplete("no runs recorded".to_string()))?;

        match status.status {
            RunStatus::Completed if status.completed.len() == status.total_steps => Ok(status),
            RunStatus::Completed => Err(incomplete(format!(
                "{} of {} steps completed",
                status.completed.len(),
                status.total_steps
            ))),
            RunStatus::Failed => Err(incomplete(
                status.error.unwrap_or_else(|| "run failed".to_string()),
            )),
            _ => Err(incomplete("run did not finish".to_string())),
        }
    }
}
