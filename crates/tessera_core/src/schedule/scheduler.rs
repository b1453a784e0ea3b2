//! # Task Scheduler
//!
//! Runs tasks on a fixed pool of worker threads, ordering tasks whose
//! declared access conflicts.
//!
//! ## Architecture
//!
//! ```text
//! submit() ──> [dependency index] ──Ready──> channel ──> worker 0..N
//!                    ▲                                      │
//!                    └──────── finish: unblock dependents ◄─┘
//! ```
//!
//! - Edges always point from an earlier submission to a later one
//! - A finished task (Done or Failed) unblocks its dependents
//! - `wait_all` is the only blocking call

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use super::access::AccessSet;
use super::graph::{find_cycle, DependencyIndex};
use super::task::{TaskFailure, TaskHandle, TaskId, TaskResult, TaskShared, TaskState, Work};
use crate::config::SchedulerConfig;
use crate::error::{CoreError, CoreResult, ErrorSlot};

thread_local! {
    // State of the scheduler that owns the current worker thread, if any.
    static WORKER_OF: Cell<*const Shared> = const { Cell::new(std::ptr::null()) };
}

enum WorkerMessage {
    Run(TaskId),
    Stop,
}

/// Scheduler counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Worker threads.
    pub workers: usize,
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Tasks that finished Done.
    pub completed: u64,
    /// Tasks that finished Failed.
    pub failed: u64,
    /// Tasks discarded by shutdown.
    pub cancelled: u64,
    /// Tasks not yet terminal.
    pub in_flight: usize,
    /// Highest `in_flight` observed.
    pub peak_in_flight: usize,
}

struct TaskEntry {
    shared: Arc<TaskShared>,
    work: Option<Work>,
    remaining: usize,
    dependents: Vec<TaskId>,
}

struct SchedulerState {
    next_id: u64,
    accepting: bool,
    tasks: HashMap<TaskId, TaskEntry>,
    index: DependencyIndex,
    stats: SchedulerStats,
}

impl SchedulerState {
    /// Removes a terminal task and unblocks its dependents.
    ///
    /// Returns the dependents that became Ready.
    fn retire(&mut self, id: TaskId) -> Vec<TaskId> {
        let Some(entry) = self.tasks.remove(&id) else {
            return Vec::new();
        };
        self.index.remove(id, entry.shared.access());

        let mut ready = Vec::new();
        for dependent in entry.dependents {
            let Some(next) = self.tasks.get_mut(&dependent) else {
                continue;
            };
            next.remaining = next.remaining.saturating_sub(1);
            if next.remaining == 0 && next.shared.state() == TaskState::Pending {
                next.shared.set_state(TaskState::Ready);
                ready.push(dependent);
            }
        }
        self.stats.in_flight = self.tasks.len();
        ready
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    idle: Condvar,
    sender: Sender<WorkerMessage>,
    errors: ErrorSlot,
}

impl Shared {
    fn dispatch(&self, ready: Vec<TaskId>) {
        for id in ready {
            if self.sender.send(WorkerMessage::Run(id)).is_err() {
                tracing::error!("worker channel closed; task {} left unscheduled", id);
            }
        }
    }

    /// Claims a Ready task for the calling worker.
    fn claim(&self, id: TaskId) -> Option<(Arc<TaskShared>, Work)> {
        let mut state = self.state.lock();
        let entry = state.tasks.get_mut(&id)?;
        if entry.shared.state() != TaskState::Ready {
            return None;
        }
        let work = entry.work.take()?;
        entry.shared.set_state(TaskState::Running);
        Some((Arc::clone(&entry.shared), work))
    }

    fn finish(&self, task: &TaskShared, outcome: TaskResult) {
        let id = task.id();
        match outcome {
            Ok(()) => {
                task.set_state(TaskState::Done);
                tracing::trace!("task {} done", id);
            }
            Err(failure) => {
                tracing::warn!("task {} failed: {}", id, failure);
                self.errors.record(CoreError::TaskFailed {
                    task: id,
                    reason: failure.reason().to_string(),
                });
                task.fail(failure);
            }
        }

        let mut state = self.state.lock();
        match task.state() {
            TaskState::Done => state.stats.completed += 1,
            _ => state.stats.failed += 1,
        }
        let ready = state.retire(id);
        if state.tasks.is_empty() {
            self.idle.notify_all();
        }
        // Dispatch under the lock so shutdown cannot interleave and miss them.
        self.dispatch(ready);
    }
}

fn run_worker(shared: &Shared, receiver: &Receiver<WorkerMessage>) {
    WORKER_OF.with(|owner| owner.set(std::ptr::addr_of!(*shared)));
    while let Ok(message) = receiver.recv() {
        let id = match message {
            WorkerMessage::Run(id) => id,
            WorkerMessage::Stop => break,
        };
        let Some((task, work)) = shared.claim(id) else {
            continue;
        };

        tracing::trace!("task {} running", id);
        let outcome = catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "work item panicked".to_string());
            Err(TaskFailure::new(format!("panicked: {reason}")))
        });
        shared.finish(&task, outcome);
    }
}

/// Access-driven parallel task scheduler.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = Scheduler::new(&SchedulerConfig::with_workers(4))?;
///
/// let integrate = scheduler.submit(
///     AccessSet::new().write(position).read(velocity),
///     move || { /* ... */ Ok(()) },
/// )?;
/// let render = scheduler.submit(AccessSet::new().read(position), || Ok(()))?;
///
/// scheduler.wait_all()?;
/// assert_eq!(integrate.state(), TaskState::Done);
/// ```
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl Scheduler {
    /// Starts the worker pool with its own error slot.
    ///
    /// # Errors
    ///
    /// Returns `WorkerSpawn` if a worker thread cannot be started.
    pub fn new(config: &SchedulerConfig) -> CoreResult<Self> {
        Self::with_error_slot(config, ErrorSlot::new())
    }

    /// Starts the worker pool, recording task failures in `errors`.
    ///
    /// # Errors
    ///
    /// Returns `WorkerSpawn` if a worker thread cannot be started.
    pub fn with_error_slot(config: &SchedulerConfig, errors: ErrorSlot) -> CoreResult<Self> {
        let worker_count = config.resolved_worker_count();
        let (sender, receiver) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                next_id: 0,
                accepting: true,
                tasks: HashMap::new(),
                index: DependencyIndex::default(),
                stats: SchedulerStats {
                    workers: worker_count,
                    ..SchedulerStats::default()
                },
            }),
            idle: Condvar::new(),
            sender,
            errors,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_shared = Arc::clone(&shared);
            let worker_receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name_prefix))
                .spawn(move || run_worker(&worker_shared, &worker_receiver));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    for _ in &workers {
                        let _ = shared.sender.send(WorkerMessage::Stop);
                    }
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(CoreError::WorkerSpawn(e.to_string()));
                }
            }
        }

        tracing::info!("scheduler started with {} workers", worker_count);
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
        })
    }

    /// Submits a task.
    ///
    /// The task is ordered after every unfinished earlier task whose access
    /// conflicts with `access`, and runs concurrently with the rest.
    ///
    /// # Errors
    ///
    /// - `SchedulerShutdown` after [`Scheduler::shutdown`]
    /// - `CyclicDependencyDetected` if an edge would point backwards
    pub fn submit<F>(&self, access: AccessSet, work: F) -> CoreResult<TaskHandle>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if !state.accepting {
            return Err(CoreError::SchedulerShutdown);
        }

        let id = TaskId::from_raw(state.next_id);
        let dependencies = state.index.dependencies_for(&access);
        if dependencies.iter().any(|&dep| dep >= id) {
            let error = CoreError::CyclicDependencyDetected(id);
            self.shared.errors.record(error.clone());
            return Err(error);
        }
        state.next_id += 1;

        for dep in &dependencies {
            if let Some(entry) = state.tasks.get_mut(dep) {
                entry.dependents.push(id);
            }
        }
        state.index.insert(id, &access);

        tracing::debug!(
            "submitted task {} (reads {:?}, writes {:?}, after {:?})",
            id,
            access.reads(),
            access.writes(),
            dependencies
        );

        let remaining = dependencies.len();
        let shared = Arc::new(TaskShared::new(id, access, dependencies));
        state.tasks.insert(
            id,
            TaskEntry {
                shared: Arc::clone(&shared),
                work: Some(Box::new(work)),
                remaining,
                dependents: Vec::new(),
            },
        );
        state.stats.submitted += 1;
        state.stats.in_flight = state.tasks.len();
        state.stats.peak_in_flight = state.stats.peak_in_flight.max(state.tasks.len());

        if remaining == 0 {
            self.shared.dispatch(vec![id]);
        }
        Ok(TaskHandle::new(shared))
    }

    /// Blocks until every submitted task is terminal.
    ///
    /// Returns normally when tasks failed; inspect the handles.
    ///
    /// # Errors
    ///
    /// - `ReentrantWait` when called from a work item
    /// - `CyclicDependencyDetected` if the unfinished tasks do not form a DAG
    pub fn wait_all(&self) -> CoreResult<()> {
        if self.on_own_worker() {
            return Err(CoreError::ReentrantWait);
        }

        let mut state = self.shared.state.lock();
        let cycle = find_cycle(
            state
                .tasks
                .iter()
                .map(|(&id, entry)| (id, entry.shared.dependencies())),
        );
        if let Some(id) = cycle {
            let error = CoreError::CyclicDependencyDetected(id);
            self.shared.errors.record(error.clone());
            return Err(error);
        }

        while !state.tasks.is_empty() {
            self.shared.idle.wait(&mut state);
        }
        Ok(())
    }

    /// Stops the scheduler.
    ///
    /// New submissions are rejected, Pending and Ready tasks are cancelled,
    /// and Running tasks finish before the workers exit. Idempotent.
    pub fn shutdown(&self) {
        let cancelled = {
            let mut state = self.shared.state.lock();
            state.accepting = false;

            let mut discard: Vec<TaskId> = state
                .tasks
                .iter()
                .filter(|(_, entry)| {
                    matches!(entry.shared.state(), TaskState::Pending | TaskState::Ready)
                })
                .map(|(&id, _)| id)
                .collect();
            discard.sort_unstable();
            for &id in &discard {
                if let Some(entry) = state.tasks.get(&id) {
                    entry.shared.set_state(TaskState::Cancelled);
                }
                state.retire(id);
            }
            state.stats.cancelled += discard.len() as u64;
            if state.tasks.is_empty() {
                self.shared.idle.notify_all();
            }
            discard.len()
        };

        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        for _ in &workers {
            let _ = self.shared.sender.send(WorkerMessage::Stop);
        }
        if self.on_own_worker() {
            // A worker cannot join itself; the others exit on their own.
            tracing::warn!("scheduler shut down from a worker thread; workers detached");
        } else {
            for handle in workers {
                if handle.join().is_err() {
                    tracing::error!("scheduler worker exited abnormally");
                }
            }
        }
        tracing::info!("scheduler shut down, {} tasks cancelled", cancelled);
    }

    /// Returns `true` once `shutdown` has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        !self.shared.state.lock().accepting
    }

    /// Tasks not yet terminal.
    #[must_use]
    pub fn unfinished_tasks(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    /// Worker thread count.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.shared.state.lock().stats
    }

    /// Slot receiving task failures.
    #[must_use]
    pub fn error_slot(&self) -> &ErrorSlot {
        &self.shared.errors
    }

    /// Returns `true` on a worker thread of this scheduler.
    fn on_own_worker(&self) -> bool {
        WORKER_OF.with(|owner| std::ptr::eq(owner.get(), Arc::as_ptr(&self.shared)))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::TypeId;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scheduler(workers: usize) -> Scheduler {
        Scheduler::new(&SchedulerConfig::with_workers(workers)).unwrap()
    }

    fn ty(n: u32) -> TypeId {
        TypeId::from_index(n)
    }

    #[test]
    fn test_conflicting_tasks_run_in_submission_order() {
        let scheduler = scheduler(4);
        let log = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let log = Arc::clone(&log);
                scheduler
                    .submit(AccessSet::new().write(ty(0)), move || {
                        log.lock().push(i);
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();

        scheduler.wait_all().unwrap();
        assert_eq!(*log.lock(), (0..16).collect::<Vec<_>>());
        assert!(handles.iter().all(|h| h.state() == TaskState::Done));
        assert_eq!(handles[3].dependencies(), &[handles[2].id()]);
    }

    #[test]
    fn test_failure_does_not_cascade() {
        let scheduler = scheduler(2);
        let ran = Arc::new(AtomicUsize::new(0));

        let failing = scheduler
            .submit(AccessSet::new().write(ty(0)), || Err("boom".into()))
            .unwrap();
        let counter = Arc::clone(&ran);
        let dependent = scheduler
            .submit(AccessSet::new().read(ty(0)), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        scheduler.wait_all().unwrap();
        assert_eq!(failing.state(), TaskState::Failed);
        assert_eq!(failing.failure().unwrap().reason(), "boom");
        assert_eq!(dependent.state(), TaskState::Done);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.error_slot().peek(), Some(ErrorKind::TaskFailed));
    }

    #[test]
    fn test_panic_is_recorded_as_failure() {
        let scheduler = scheduler(1);
        let handle = scheduler
            .submit(AccessSet::new(), || panic!("worker blew up"))
            .unwrap();

        scheduler.wait_all().unwrap();
        assert_eq!(handle.state(), TaskState::Failed);
        assert!(handle.failure().unwrap().reason().contains("worker blew up"));

        // The worker survives the panic.
        let after = scheduler.submit(AccessSet::new(), || Ok(())).unwrap();
        scheduler.wait_all().unwrap();
        assert_eq!(after.state(), TaskState::Done);
    }

    #[test]
    fn test_wait_all_from_worker_is_rejected() {
        let scheduler = Arc::new(scheduler(1));
        let inner = Arc::clone(&scheduler);
        let observed = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&observed);

        scheduler
            .submit(AccessSet::new(), move || {
                *slot.lock() = Some(inner.wait_all());
                Ok(())
            })
            .unwrap();
        scheduler.wait_all().unwrap();

        assert_eq!(*observed.lock(), Some(Err(CoreError::ReentrantWait)));
    }

    #[test]
    fn test_wait_all_on_other_scheduler_from_worker() {
        let outer = scheduler(1);
        let other = Arc::new(scheduler(1));
        let observed = Arc::new(Mutex::new(None));

        let counter = Arc::new(AtomicUsize::new(0));
        let ran = Arc::clone(&counter);
        other
            .submit(AccessSet::new(), move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let inner = Arc::clone(&other);
        let slot = Arc::clone(&observed);
        outer
            .submit(AccessSet::new(), move || {
                *slot.lock() = Some(inner.wait_all());
                Ok(())
            })
            .unwrap();
        outer.wait_all().unwrap();

        // Only a scheduler's own workers are barred from waiting on it.
        assert_eq!(*observed.lock(), Some(Ok(())));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_cancels_pending_and_rejects_submit() {
        let scheduler = scheduler(1);
        let (release, gate) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started) = crossbeam_channel::bounded::<()>(1);

        let running = scheduler
            .submit(AccessSet::new().write(ty(0)), move || {
                let _ = started_tx.send(());
                let _ = gate.recv_timeout(Duration::from_secs(5));
                Ok(())
            })
            .unwrap();
        let pending = scheduler
            .submit(AccessSet::new().write(ty(0)), || Ok(()))
            .unwrap();

        started.recv().unwrap();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let _ = release.send(());
        });
        scheduler.shutdown();
        stopper.join().unwrap();

        assert_eq!(running.state(), TaskState::Done);
        assert_eq!(pending.state(), TaskState::Cancelled);
        assert_eq!(pending.result(), Some(Err(CoreError::SchedulerShutdown)));
        assert_eq!(
            scheduler.submit(AccessSet::new(), || Ok(())).unwrap_err(),
            CoreError::SchedulerShutdown
        );
        assert_eq!(scheduler.stats().cancelled, 1);

        scheduler.shutdown();
        scheduler.wait_all().unwrap();
    }

    #[test]
    fn test_stats_track_outcomes() {
        let scheduler = scheduler(2);
        for i in 0..6u32 {
            scheduler
                .submit(AccessSet::new().write(ty(i % 2)), move || {
                    if i == 5 {
                        Err("odd one out".into())
                    } else {
                        Ok(())
                    }
                })
                .unwrap();
        }
        scheduler.wait_all().unwrap();

        let stats = scheduler.stats();
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.submitted, 6);
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_flight, 0);
        assert!(stats.peak_in_flight >= 1);
    }
}
