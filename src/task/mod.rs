mod manager;
mod types;

pub use manager::{TaskManager, TaskReporter, DEFAULT_TASK_HISTORY};
pub use types::{Checkpoint, TaskError, TaskId, TaskSnapshot, TaskState};
