use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info};
use lru::LruCache;
use tokio::sync::RwLock;
use tokio::task::JoinError;

use super::types::{Checkpoint, TaskError, TaskId, TaskSnapshot, TaskState};
use crate::classify::AnalysisResult;

pub const DEFAULT_TASK_HISTORY: usize = 256;

#[derive(Debug)]
struct TaskTable {
    active: HashMap<TaskId, Arc<TaskSnapshot>>,
    // terminal tasks; the least recently finished is evicted first
    finished: LruCache<TaskId, Arc<TaskSnapshot>>,
}

/// Shared task table. Each entry is an immutable snapshot swapped whole
/// under the write lock, so readers never see a half-applied update.
/// Pending and running tasks are never evicted.
#[derive(Debug, Clone)]
struct TaskRegistry {
    tasks: Arc<RwLock<TaskTable>>,
}

impl TaskRegistry {
    fn new(history: NonZeroUsize) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(TaskTable {
                active: HashMap::new(),
                finished: LruCache::new(history),
            })),
        }
    }

    async fn insert(&self, snapshot: TaskSnapshot) {
        self.tasks.write().await.active.insert(snapshot.id, Arc::new(snapshot));
    }

    async fn get(&self, id: TaskId) -> Option<Arc<TaskSnapshot>> {
        let tasks = self.tasks.read().await;
        tasks.active.get(&id).or_else(|| tasks.finished.peek(&id)).cloned()
    }

    async fn remove(&self, id: TaskId) -> Result<Arc<TaskSnapshot>, TaskError> {
        let mut tasks = self.tasks.write().await;
        if tasks.active.contains_key(&id) {
            return Err(TaskError::StillRunning(id));
        }
        tasks.finished.pop(&id).ok_or(TaskError::NotFound(id))
    }

    async fn len(&self) -> usize {
        let tasks = self.tasks.read().await;
        tasks.active.len() + tasks.finished.len()
    }

    async fn transition(
        &self,
        id: TaskId,
        state: TaskState,
        progress: Option<f64>,
        message: String,
        result: Option<Arc<AnalysisResult>>,
    ) -> Result<Arc<TaskSnapshot>, TaskError> {
        let mut tasks = self.tasks.write().await;
        let Some(current) = tasks.active.get(&id) else {
            return Err(if tasks.finished.contains(&id) {
                TaskError::AlreadyTerminal(id)
            } else {
                TaskError::NotFound(id)
            });
        };

        if !current.state.can_become(state) {
            return Err(TaskError::InvalidTransition {
                id,
                from: current.state,
                to: state,
            });
        }

        let progress = progress.map_or(current.progress, |p| p.clamp(0.0, 1.0).max(current.progress));
        let next = Arc::new(TaskSnapshot {
            id,
            state,
            progress,
            message,
            result,
            created_at: current.created_at,
            updated_at: Utc::now(),
        });

        if state.is_terminal() {
            tasks.active.remove(&id);
            if let Some((evicted, _)) = tasks.finished.push(id, next.clone()) {
                debug!("{} evicted from task history", evicted);
            }
        } else {
            tasks.active.insert(id, next.clone());
        }
        Ok(next)
    }
}

/// Handle given to a running job for publishing progress.
#[derive(Debug, Clone)]
pub struct TaskReporter {
    id: TaskId,
    registry: TaskRegistry,
}

impl TaskReporter {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub async fn checkpoint(&self, checkpoint: Checkpoint) -> Result<(), TaskError> {
        self.progress(checkpoint.progress(), checkpoint.message()).await
    }

    /// Progress never moves backwards; a lower value keeps the current one.
    pub async fn progress(&self, progress: f64, message: impl Into<String>) -> Result<(), TaskError> {
        self.registry
            .transition(self.id, TaskState::Running, Some(progress), message.into(), None)
            .await
            .map(|_| ())
    }

    pub async fn snapshot(&self) -> Option<Arc<TaskSnapshot>> {
        self.registry.get(self.id).await
    }
}

/// Runs analysis jobs as background tokio tasks and tracks their state.
#[derive(Debug)]
pub struct TaskManager {
    registry: TaskRegistry,
    next_id: AtomicU64,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_TASK_HISTORY)
    }

    /// Keeps at most `history` finished tasks for polling.
    pub fn with_history_capacity(history: usize) -> Self {
        let history = NonZeroUsize::new(history).unwrap_or(NonZeroUsize::MIN);
        Self {
            registry: TaskRegistry::new(history),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a pending task and schedules `job` on the runtime. The job
    /// owns the task until it returns; a panic inside it fails the task.
    pub async fn submit<F, Fut, E>(&self, job: F) -> TaskId
    where
        F: FnOnce(TaskReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<AnalysisResult, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.registry.insert(TaskSnapshot::pending(id)).await;
        info!("{} submitted", id);

        let registry = self.registry.clone();
        tokio::spawn(async move {
            let started = registry
                .transition(id, TaskState::Running, Some(0.0), "starting".to_string(), None)
                .await;
            if let Err(e) = started {
                if let Err(e) = fail(&registry, id, format!("could not start: {}", e)).await {
                    error!("{} could not be finalized: {}", id, e);
                }
                return;
            }

            let reporter = TaskReporter {
                id,
                registry: registry.clone(),
            };
            let outcome = tokio::spawn(async move { job(reporter).await }).await;

            let finished = match outcome {
                Ok(Ok(result)) => {
                    registry
                        .transition(
                            id,
                            TaskState::Completed,
                            Some(Checkpoint::Finalized.progress()),
                            Checkpoint::Finalized.message().to_string(),
                            Some(Arc::new(result)),
                        )
                        .await
                }
                Ok(Err(e)) => fail(&registry, id, e.to_string()).await,
                Err(join_error) => fail(&registry, id, describe_join_error(join_error)).await,
            };

            match finished {
                Ok(snapshot) if snapshot.state == TaskState::Completed => info!("{} completed", id),
                Ok(_) => {}
                Err(e) => error!("{} could not be finalized: {}", id, e),
            }
        });

        id
    }

    pub async fn poll(&self, id: TaskId) -> Result<Arc<TaskSnapshot>, TaskError> {
        self.registry.get(id).await.ok_or(TaskError::NotFound(id))
    }

    /// Drops a finished task from the history.
    pub async fn remove(&self, id: TaskId) -> Result<Arc<TaskSnapshot>, TaskError> {
        self.registry.remove(id).await
    }

    pub async fn len(&self) -> usize {
        self.registry.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn fail(registry: &TaskRegistry, id: TaskId, message: String) -> Result<Arc<TaskSnapshot>, TaskError> {
    error!("{} failed: {}", id, message);
    registry.transition(id, TaskState::Failed, None, message, None).await
}

fn describe_join_error(error: JoinError) -> String {
    if error.is_panic() {
        format!("worker panicked: {}", panic_message(error.into_panic()))
    } else {
        "worker was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic payload".to_string(),
        },
    }
}
