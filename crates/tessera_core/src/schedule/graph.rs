//! # Dependency Graph
//!
//! Orders conflicting tasks by submission order.
//!
//! Instead of comparing a new task against every unfinished task, the graph
//! keeps a per-type index of unfinished accessors:
//!
//! ```text
//! Position: last_writer = T4, readers = [T5, T7]
//!
//! new task writes Position -> depends on T4, T5, T7
//! new task reads Position  -> depends on T4
//! ```
//!
//! Readers recorded after the last writer already depend on it, and the last
//! writer depends on every earlier accessor, so the edges found here give the
//! same transitive order as a pairwise conflict check.

use std::collections::{HashMap, VecDeque};

use super::access::AccessSet;
use super::task::TaskId;
use crate::ecs::TypeId;

#[derive(Default)]
struct TypeAccessors {
    last_writer: Option<TaskId>,
    readers: Vec<TaskId>,
}

impl TypeAccessors {
    fn is_empty(&self) -> bool {
        self.last_writer.is_none() && self.readers.is_empty()
    }
}

/// Per-type index of unfinished tasks.
#[derive(Default)]
pub(crate) struct DependencyIndex {
    by_type: HashMap<TypeId, TypeAccessors>,
}

impl DependencyIndex {
    /// Unfinished tasks a new task with `access` must run after, ascending.
    pub(crate) fn dependencies_for(&self, access: &AccessSet) -> Vec<TaskId> {
        let mut deps = Vec::new();
        for type_id in access.writes() {
            if let Some(accessors) = self.by_type.get(type_id) {
                deps.extend(accessors.last_writer);
                deps.extend_from_slice(&accessors.readers);
            }
        }
        for type_id in access.reads() {
            if let Some(accessors) = self.by_type.get(type_id) {
                deps.extend(accessors.last_writer);
            }
        }
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    /// Records a newly submitted task.
    pub(crate) fn insert(&mut self, id: TaskId, access: &AccessSet) {
        for &type_id in access.writes() {
            let accessors = self.by_type.entry(type_id).or_default();
            accessors.last_writer = Some(id);
            accessors.readers.clear();
        }
        for &type_id in access.reads() {
            self.by_type.entry(type_id).or_default().readers.push(id);
        }
    }

    /// Forgets a task that reached a terminal state.
    pub(crate) fn remove(&mut self, id: TaskId, access: &AccessSet) {
        let touched = access.writes().iter().chain(access.reads());
        for type_id in touched {
            let Some(accessors) = self.by_type.get_mut(type_id) else {
                continue;
            };
            if accessors.last_writer == Some(id) {
                accessors.last_writer = None;
            }
            accessors.readers.retain(|&reader| reader != id);
            if accessors.is_empty() {
                self.by_type.remove(type_id);
            }
        }
    }

    /// Number of types with unfinished accessors.
    #[cfg(test)]
    pub(crate) fn tracked_types(&self) -> usize {
        self.by_type.len()
    }
}

/// Verifies that the unfinished tasks form a DAG (Kahn's algorithm).
///
/// `edges` yields each unfinished task with its unfinished dependencies.
/// Dependencies that are not in the set count as finished.
///
/// Returns the lowest task id left on a cycle.
pub(crate) fn find_cycle<'a, I>(edges: I) -> Option<TaskId>
where
    I: IntoIterator<Item = (TaskId, &'a [TaskId])>,
{
    let edges: Vec<(TaskId, &[TaskId])> = edges.into_iter().collect();
    let mut in_degree: HashMap<TaskId, usize> = edges.iter().map(|&(id, _)| (id, 0)).collect();
    let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();

    for &(id, deps) in &edges {
        for dep in deps {
            if in_degree.contains_key(dep) {
                dependents.entry(*dep).or_default().push(id);
                if let Some(degree) = in_degree.get_mut(&id) {
                    *degree += 1;
                }
            }
        }
    }

    let mut queue: VecDeque<TaskId> = in_degree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut visited = 0;

    while let Some(id) = queue.pop_front() {
        visited += 1;
        for next in dependents.get(&id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    if visited == in_degree.len() {
        return None;
    }
    in_degree
        .into_iter()
        .filter(|&(_, degree)| degree > 0)
        .map(|(id, _)| id)
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(n: u32) -> TypeId {
        TypeId::from_index(n)
    }

    fn task(n: u64) -> TaskId {
        TaskId::from_raw(n)
    }

    #[test]
    fn test_write_after_reads() {
        let mut index = DependencyIndex::default();
        let read = AccessSet::new().read(ty(0));

        index.insert(task(0), &read);
        index.insert(task(1), &read);
        assert!(index.dependencies_for(&read).is_empty());

        let write = AccessSet::new().write(ty(0));
        assert_eq!(index.dependencies_for(&write), vec![task(0), task(1)]);
        index.insert(task(2), &write);

        // Later readers only need the writer.
        assert_eq!(index.dependencies_for(&read), vec![task(2)]);
    }

    #[test]
    fn test_disjoint_access_has_no_edges() {
        let mut index = DependencyIndex::default();
        index.insert(task(0), &AccessSet::new().write(ty(0)));
        assert!(index
            .dependencies_for(&AccessSet::new().write(ty(1)).read(ty(2)))
            .is_empty());
    }

    #[test]
    fn test_remove_forgets_finished_tasks() {
        let mut index = DependencyIndex::default();
        let write = AccessSet::new().write(ty(0));
        let read = AccessSet::new().read(ty(0));

        index.insert(task(0), &write);
        index.insert(task(1), &read);
        index.remove(task(0), &write);
        assert_eq!(index.dependencies_for(&write), vec![task(1)]);

        index.remove(task(1), &read);
        assert_eq!(index.tracked_types(), 0);
    }

    #[test]
    fn test_find_cycle() {
        let chain = [(task(0), &[][..]), (task(1), &[task(0)][..])];
        assert_eq!(find_cycle(chain), None);

        let finished_dep = [(task(5), &[task(2)][..])];
        assert_eq!(find_cycle(finished_dep), None);

        let cyclic = [
            (task(0), &[][..]),
            (task(1), &[task(2)][..]),
            (task(2), &[task(1)][..]),
        ];
        assert_eq!(find_cycle(cyclic), Some(task(1)));
    }
}
