//! Tasks: ids, states and the handles callers keep.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::access::AccessSet;
use crate::error::{CoreError, CoreResult};

/// Identifier of a submitted task. Increases with submission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Creates an id from its raw value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a task.
///
/// ```text
/// Pending ──> Ready ──> Running ──> Done | Failed
///    └──────────┴──> Cancelled (shutdown)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting on unfinished dependencies.
    Pending,
    /// Dependencies finished; queued for a worker.
    Ready,
    /// Claimed by a worker.
    Running,
    /// Work item returned success.
    Done,
    /// Work item returned an error or panicked.
    Failed,
    /// Discarded by shutdown before it ran.
    Cancelled,
}

impl TaskState {
    /// Returns `true` for states a task never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// Failure reported by a work item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskFailure {
    reason: String,
}

impl TaskFailure {
    /// Creates a failure with a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Reason given by the work item.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for TaskFailure {}

impl From<&str> for TaskFailure {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

impl From<String> for TaskFailure {
    fn from(reason: String) -> Self {
        Self::new(reason)
    }
}

impl From<CoreError> for TaskFailure {
    fn from(error: CoreError) -> Self {
        Self::new(error.to_string())
    }
}

/// Outcome of a work item.
pub type TaskResult = Result<(), TaskFailure>;

/// A unit of work. Runs exactly once, on a worker thread.
pub(crate) type Work = Box<dyn FnOnce() -> TaskResult + Send + 'static>;

struct TaskStatus {
    state: TaskState,
    failure: Option<TaskFailure>,
}

/// State shared between the scheduler and every handle of one task.
pub(crate) struct TaskShared {
    id: TaskId,
    access: AccessSet,
    dependencies: Vec<TaskId>,
    status: Mutex<TaskStatus>,
}

impl TaskShared {
    pub(crate) fn new(id: TaskId, access: AccessSet, dependencies: Vec<TaskId>) -> Self {
        let state = if dependencies.is_empty() {
            TaskState::Ready
        } else {
            TaskState::Pending
        };
        Self {
            id,
            access,
            dependencies,
            status: Mutex::new(TaskStatus {
                state,
                failure: None,
            }),
        }
    }

    pub(crate) const fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn access(&self) -> &AccessSet {
        &self.access
    }

    pub(crate) fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub(crate) fn state(&self) -> TaskState {
        self.status.lock().state
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.status.lock().state = state;
    }

    pub(crate) fn fail(&self, failure: TaskFailure) {
        let mut status = self.status.lock();
        status.state = TaskState::Failed;
        status.failure = Some(failure);
    }
}

/// Caller-side view of a submitted task.
///
/// Cheap to clone. After `wait_all`, check each handle: a failed task does
/// not fail its dependents.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub(crate) fn new(shared: Arc<TaskShared>) -> Self {
        Self { shared }
    }

    /// Task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.shared.id()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Returns `true` once the task is Done, Failed or Cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Failure reported by the work item, if it failed.
    #[must_use]
    pub fn failure(&self) -> Option<TaskFailure> {
        self.shared.status.lock().failure.clone()
    }

    /// Terminal outcome, or `None` while the task is unfinished.
    ///
    /// A cancelled task reports `SchedulerShutdown`.
    #[must_use]
    pub fn result(&self) -> Option<CoreResult<()>> {
        let status = self.shared.status.lock();
        match status.state {
            TaskState::Done => Some(Ok(())),
            TaskState::Failed => Some(Err(CoreError::TaskFailed {
                task: self.shared.id(),
                reason: status
                    .failure
                    .as_ref()
                    .map_or_else(String::new, |f| f.reason().to_string()),
            })),
            TaskState::Cancelled => Some(Err(CoreError::SchedulerShutdown)),
            TaskState::Pending | TaskState::Ready | TaskState::Running => None,
        }
    }

    /// Declared access.
    #[must_use]
    pub fn access(&self) -> &AccessSet {
        self.shared.access()
    }

    /// Earlier tasks this one was ordered after, ascending.
    #[must_use]
    pub fn dependencies(&self) -> &[TaskId] {
        self.shared.dependencies()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("dependencies", &self.dependencies())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_follows_dependencies() {
        let free = TaskShared::new(TaskId::from_raw(0), AccessSet::new(), Vec::new());
        let blocked = TaskShared::new(
            TaskId::from_raw(1),
            AccessSet::new(),
            vec![TaskId::from_raw(0)],
        );
        assert_eq!(free.state(), TaskState::Ready);
        assert_eq!(blocked.state(), TaskState::Pending);
    }

    #[test]
    fn test_handle_result() {
        let shared = Arc::new(TaskShared::new(
            TaskId::from_raw(4),
            AccessSet::new(),
            Vec::new(),
        ));
        let handle = TaskHandle::new(Arc::clone(&shared));
        assert_eq!(handle.result(), None);
        assert!(!handle.is_finished());

        shared.fail("bad input".into());
        assert!(handle.is_finished());
        assert_eq!(handle.failure().unwrap().reason(), "bad input");
        assert_eq!(
            handle.result(),
            Some(Err(CoreError::TaskFailed {
                task: TaskId::from_raw(4),
                reason: "bad input".to_string(),
            }))
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }
}
