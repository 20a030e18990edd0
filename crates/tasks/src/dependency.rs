//! Directed dependency graph between tasks.
//!
//! An edge `task -> dependency` reads "task waits for dependency". The graph
//! keeps forward and reverse adjacency in sync and refuses any edge that would
//! close a cycle, so it is a DAG after every successful mutation.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fieldwork_core::{DomainError, DomainResult, TaskId};

pub const DEFAULT_DEPENDENCY_KIND: &str = "finish_to_start";

/// Persisted form of a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub task_id: TaskId,
    pub dependency_id: TaskId,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl DependencyEdge {
    pub fn new(
        task_id: TaskId,
        dependency_id: TaskId,
        kind: Option<&str>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if task_id == dependency_id {
            return Err(DomainError::CircularDependency {
                task_id,
                dependency_id,
            });
        }
        let kind = match kind.map(str::trim) {
            None => DEFAULT_DEPENDENCY_KIND.to_string(),
            Some("") => return Err(DomainError::validation("dependency kind cannot be empty")),
            Some(k) => k.to_string(),
        };
        Ok(Self {
            task_id,
            dependency_id,
            kind,
            created_at: now,
        })
    }
}

/// Request body for adding a dependency to an existing task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDependency {
    pub dependency_id: TaskId,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// task -> tasks it waits for
    edges: BTreeMap<TaskId, BTreeSet<TaskId>>,
    /// task -> tasks waiting for it
    reverse_edges: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from stored `(task, dependency)` pairs.
    ///
    /// Stored data is expected to be acyclic already; a cycle here means the
    /// store was corrupted and is reported as an invariant violation.
    pub fn from_edges(pairs: impl IntoIterator<Item = (TaskId, TaskId)>) -> DomainResult<Self> {
        let mut graph = Self::new();
        for (task, dependency) in pairs {
            graph.link(task, dependency);
        }
        if let Some(cycle) = graph.find_cycle() {
            return Err(DomainError::invariant(format!(
                "stored dependency graph contains a cycle through {} tasks",
                cycle.len()
            )));
        }
        Ok(graph)
    }

    pub fn contains_edge(&self, task: TaskId, dependency: TaskId) -> bool {
        self.edges
            .get(&task)
            .is_some_and(|deps| deps.contains(&dependency))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Whether `to` is reachable from `from` by following dependency edges.
    pub fn has_path(&self, from: TaskId, to: TaskId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = BTreeSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(node) = queue.pop_front() {
            let Some(next) = self.edges.get(&node) else {
                continue;
            };
            for &dep in next {
                if dep == to {
                    return true;
                }
                if visited.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }
        false
    }

    /// Reject `task -> dependency` if it is a self-loop or if `dependency`
    /// already (transitively) waits for `task`.
    pub fn check_new_edge(&self, task: TaskId, dependency: TaskId) -> DomainResult<()> {
        if self.has_path(dependency, task) {
            return Err(DomainError::CircularDependency {
                task_id: task,
                dependency_id: dependency,
            });
        }
        Ok(())
    }

    /// Add `task -> dependency`. Returns `false` when the edge already exists.
    pub fn insert(&mut self, task: TaskId, dependency: TaskId) -> DomainResult<bool> {
        if self.contains_edge(task, dependency) {
            return Ok(false);
        }
        self.check_new_edge(task, dependency)?;
        self.link(task, dependency);
        Ok(true)
    }

    pub fn remove(&mut self, task: TaskId, dependency: TaskId) -> bool {
        let removed = detach(&mut self.edges, task, dependency);
        detach(&mut self.reverse_edges, dependency, task);
        removed
    }

    /// Drop every edge touching `task`, in both directions.
    pub fn remove_task(&mut self, task: TaskId) {
        for dependency in self.edges.remove(&task).unwrap_or_default() {
            detach(&mut self.reverse_edges, dependency, task);
        }
        for dependent in self.reverse_edges.remove(&task).unwrap_or_default() {
            detach(&mut self.edges, dependent, task);
        }
    }

    /// Tasks `task` waits for.
    pub fn dependencies(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Tasks waiting for `task`.
    pub fn dependents(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    /// First cycle found, as the ordered list of tasks on it; `None` for a DAG.
    ///
    /// Iterative three-colour DFS, O(V + E).
    pub fn find_cycle(&self) -> Option<Vec<TaskId>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Colour {
            Grey,
            Black,
        }

        let mut colour: BTreeMap<TaskId, Colour> = BTreeMap::new();

        for &root in self.edges.keys() {
            if colour.contains_key(&root) {
                continue;
            }
            // (node, remaining dependencies to visit)
            let mut path: Vec<(TaskId, Vec<TaskId>)> = vec![(root, self.dependencies(root))];
            colour.insert(root, Colour::Grey);

            while let Some((node, pending)) = path.last_mut() {
                let node = *node;
                match pending.pop() {
                    Some(next) => match colour.get(&next) {
                        Some(Colour::Grey) => {
                            let start = path.iter().position(|(n, _)| *n == next).unwrap_or(0);
                            return Some(path[start..].iter().map(|(n, _)| *n).collect());
                        }
                        Some(Colour::Black) => {}
                        None => {
                            colour.insert(next, Colour::Grey);
                            path.push((next, self.dependencies(next)));
                        }
                    },
                    None => {
                        colour.insert(node, Colour::Black);
                        path.pop();
                    }
                }
            }
        }
        None
    }

    fn link(&mut self, task: TaskId, dependency: TaskId) {
        self.edges.entry(task).or_default().insert(dependency);
        self.reverse_edges.entry(dependency).or_default().insert(task);
    }
}

fn detach(map: &mut BTreeMap<TaskId, BTreeSet<TaskId>>, key: TaskId, value: TaskId) -> bool {
    let Some(set) = map.get_mut(&key) else {
        return false;
    };
    let removed = set.remove(&value);
    if set.is_empty() {
        map.remove(&key);
    }
    removed
}
