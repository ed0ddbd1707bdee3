//! Dependency-status and cycle checks over the task queue.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::core::task::{Task, TaskStatus};

/// Outcome of resolving one task's dependency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    /// Every dependency is done.
    Ready,
    /// The first unmet dependency exists in the queue but is not done yet.
    Blocked,
    /// The first unmet dependency is not known to the queue at all.
    Missing,
}

/// Cycle detected while validating the dependency graph.
///
/// `members` lists every node that was gray when the cycle closed, i.e. the
/// full membership of the cycle, not just the closing edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclicDependencyError {
    pub members: Vec<String>,
}

impl fmt::Display for CyclicDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cyclic dependency involving: {}", self.members.join(", "))
    }
}

impl std::error::Error for CyclicDependencyError {}

/// Resolve a task's dependency status against the completed map and the set
/// of known ids.
///
/// Dependencies are checked in declaration order and the first unsatisfied
/// one determines the result. This is a deliberate short-circuit: a single
/// unknown id yields `Missing` even if later-declared dependencies are also
/// unmet. Callers re-check on every unblock pass, so resolution stays
/// incremental.
pub fn check_dependencies(
    task: &Task,
    completed: &BTreeMap<String, Task>,
    known_ids: &HashSet<String>,
) -> DependencyStatus {
    for dep_id in &task.dependencies {
        if completed
            .get(dep_id)
            .is_some_and(|dep| dep.status == TaskStatus::Done)
        {
            continue;
        }
        if !known_ids.contains(dep_id) {
            return DependencyStatus::Missing;
        }
        return DependencyStatus::Blocked;
    }
    DependencyStatus::Ready
}

/// Collect the set of ids a dependency can legally point at: everything in
/// the queue plus everything already completed.
pub fn known_ids(queue: &[Task], completed: &BTreeMap<String, Task>) -> HashSet<String> {
    let mut ids: HashSet<String> = completed.keys().cloned().collect();
    ids.extend(queue.iter().map(|t| t.id.clone()));
    ids
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Validate that the task set contains no dependency cycle.
///
/// Dependencies referencing ids outside the task set are ignored here; they
/// are a MISSING/READY concern, not a cycle concern. On failure the error
/// names every node participating in the cycle.
pub fn validate_no_cycles(tasks: &[Task]) -> Result<(), CyclicDependencyError> {
    let graph: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.dependencies.as_slice()))
        .collect();
    let mut color: HashMap<&str, Color> = graph.keys().map(|id| (*id, Color::White)).collect();

    // Iterative DFS with an explicit stack so deep graphs cannot overflow.
    for start in tasks.iter().map(|t| t.id.as_str()) {
        if color[start] != Color::White {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        color.insert(start, Color::Gray);

        while let Some((node, next_child)) = stack.pop() {
            let deps = graph[node];
            let mut advanced = false;
            for (offset, dep) in deps.iter().enumerate().skip(next_child) {
                let Some(dep_color) = color.get(dep.as_str()).copied() else {
                    continue; // unknown id, not a cycle concern
                };
                match dep_color {
                    Color::Gray => {
                        let mut members: Vec<String> = color
                            .iter()
                            .filter(|(_, c)| **c == Color::Gray)
                            .map(|(id, _)| (*id).to_string())
                            .collect();
                        members.sort();
                        return Err(CyclicDependencyError { members });
                    }
                    Color::White => {
                        stack.push((node, offset + 1));
                        color.insert(dep.as_str(), Color::Gray);
                        stack.push((dep.as_str(), 0));
                        advanced = true;
                        break;
                    }
                    Color::Black => {}
                }
            }
            if !advanced {
                color.insert(node, Color::Black);
            }
        }
    }
    Ok(())
}

/// Pick the next runnable task: pending, sorted by `(priority, phase)`
/// ascending, first whose dependencies resolve to `Ready`.
///
/// Returns the index into `queue` so the caller can mutate the task in
/// place. `None` means either the queue holds no pending task or every
/// pending task is blocked; the caller distinguishes the two.
pub fn next_pending(queue: &[Task], completed: &BTreeMap<String, Task>) -> Option<usize> {
    let ids = known_ids(queue, completed);
    let mut pending: Vec<usize> = queue
        .iter()
        .enumerate()
        .filter(|(_, t)| t.status == TaskStatus::Pending)
        .map(|(i, _)| i)
        .collect();
    pending.sort_by_key(|&i| (queue[i].priority, queue[i].phase));

    pending
        .into_iter()
        .find(|&i| check_dependencies(&queue[i], completed, &ids) == DependencyStatus::Ready)
}
