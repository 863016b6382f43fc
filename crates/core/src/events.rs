use crate::command::ToolCommand;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event in a job tree's event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(run_id: RunId, event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id,
            timestamp: Utc::now(),
            event_type,
        }
    }
}

/// Types of events recorded while driving the tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    RunStarted {
        workflow: String,
        step_count: usize,
    },
    RunCompleted {
        duration_secs: u64,
    },
    RunFailed {
        error: String,
        duration_secs: u64,
    },

    StepScheduled {
        step_id: StepId,
        command: ToolCommand,
    },
    StepStarted {
        step_id: StepId,
        attempt: u32,
    },
    StepCompleted {
        step_id: StepId,
        duration_secs: u64,
    },
    StepFailed {
        step_id: StepId,
        error: String,
        attempt: u32,
        will_retry: bool,
    },
    StepSkipped {
        step_id: StepId,
        reason: String,
    },

    // Captured once the tool exits successfully
    ToolOutputRecorded {
        step_id: StepId,
        stdout: String,
        stderr: String,
    },
}

impl EventType {
    /// Whether this event ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted { .. } | Self::RunFailed { .. })
    }

    /// Whether this event changes what a later status check would report.
    ///
    /// These are written through immediately so a crashed run is still seen
    /// as started, along with every step it finished.
    pub fn is_checkpoint(&self) -> bool {
        self.is_terminal()
            || matches!(
                self,
                Self::RunStarted { .. }
                    | Self::StepCompleted { .. }
                    | Self::StepFailed { .. }
                    | Self::StepSkipped { .. }
            )
    }
}

/// Append-only store of job tree events
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Record one event
    async fn append(&self, event: Event) -> anyhow::Result<()>;

    /// Events of one run in the order they were appended
    async fn get_run_events(&self, run_id: RunId) -> anyhow::Result<Vec<Event>>;

    /// Ids of every run the log knows about
    async fn list_runs(&self) -> anyhow::Result<Vec<RunId>>;
}
