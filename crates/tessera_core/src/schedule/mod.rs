//! # Scheduling
//!
//! Tasks declare which component types they read and write. The scheduler
//! derives ordering edges from overlapping access and runs everything else
//! in parallel.
//!
//! ## Conflict Rule
//!
//! Two tasks conflict if both write a common type, or one writes a type the
//! other reads. Conflicting tasks run in submission order; non-conflicting
//! tasks run in any order.

mod access;
mod graph;
mod scheduler;
mod task;

pub use access::AccessSet;
pub use scheduler::{Scheduler, SchedulerStats};
pub use task::{TaskFailure, TaskHandle, TaskId, TaskResult, TaskState};
