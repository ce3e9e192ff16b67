use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::classify::AnalysisResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    pub(crate) fn can_become(&self, next: TaskState) -> bool {
        match (self, next) {
            (TaskState::Pending, TaskState::Running) => true,
            (TaskState::Pending, TaskState::Failed) => true,
            (TaskState::Running, TaskState::Running) => true,
            (TaskState::Running, TaskState::Completed | TaskState::Failed) => true,
            _ => false,
        }
    }
}

/// Fixed progress points of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Checkpoint {
    FetchStarted,
    FetchDone,
    ClassifyDone,
    ExportDone,
    Finalized,
}

impl Checkpoint {
    pub fn progress(&self) -> f64 {
        match self {
            Checkpoint::FetchStarted => 0.1,
            Checkpoint::FetchDone => 0.6,
            Checkpoint::ClassifyDone => 0.8,
            Checkpoint::ExportDone => 0.9,
            Checkpoint::Finalized => 1.0,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Checkpoint::FetchStarted => "fetching transactions",
            Checkpoint::FetchDone => "classifying wallets",
            Checkpoint::ClassifyDone => "exporting results",
            Checkpoint::ExportDone => "finalizing",
            Checkpoint::Finalized => "analysis complete",
        }
    }
}

/// Point-in-time view of a task. Published whole, never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub state: TaskState,
    pub progress: f64,
    pub message: String,
    pub result: Option<Arc<AnalysisResult>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub(crate) fn pending(id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: TaskState::Pending,
            progress: 0.0,
            message: "queued".to_string(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Task {0} already finished")]
    AlreadyTerminal(TaskId),

    #[error("Task {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("Task {0} is still running")]
    StillRunning(TaskId),
}
