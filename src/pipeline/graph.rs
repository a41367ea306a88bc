//! Task graph and executor
//!
//! Tasks are nodes of a petgraph `DiGraph`; an edge `a -> b` means `b` depends
//! on `a`. The executor starts a task as soon as all of its dependencies have
//! completed, so independent tasks run side by side up to the worker limit.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::cancel::CancellationToken;
use crate::error::{PipelineError, Result};
use crate::target::Target;

/// A unit of work in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskNode {
    /// Compile the schema sources for every requested target
    Generate,
    /// Stage one target's generated tree
    Stage(Target),
}

impl TaskNode {
    /// Stable identifier, used as the fingerprint key
    pub fn id(&self) -> String {
        match self {
            TaskNode::Generate => "generate".to_string(),
            TaskNode::Stage(target) => format!("stage:{}", target),
        }
    }
}

impl fmt::Display for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Final state of one task after execution
#[derive(Debug)]
pub enum TaskState<T> {
    Done(Arc<T>),
    Failed(PipelineError),
    /// Never started: a dependency failed or the run was cancelled first
    Cancelled,
}

/// Directed acyclic graph of tasks
#[derive(Debug, Default)]
pub struct TaskGraph {
    graph: DiGraph<TaskNode, ()>,
    node_map: HashMap<TaskNode, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// One generation task plus one staging task per target, each staging
    /// task depending on generation only
    pub fn for_targets(targets: &[Target]) -> Self {
        let mut graph = Self::new();
        graph.add_task(TaskNode::Generate);
        for &target in targets {
            graph.add_dependency(TaskNode::Stage(target), TaskNode::Generate);
        }
        graph
    }

    /// Add a task; adding an existing task returns its index
    pub fn add_task(&mut self, task: TaskNode) -> NodeIndex {
        if let Some(&idx) = self.node_map.get(&task) {
            return idx;
        }
        let idx = self.graph.add_node(task);
        self.node_map.insert(task, idx);
        idx
    }

    /// Declare that `task` cannot start before `dependency` completes
    pub fn add_dependency(&mut self, task: TaskNode, dependency: TaskNode) {
        let to = self.add_task(task);
        let from = self.add_task(dependency);
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Direct dependencies of `task`, sorted
    pub fn dependencies(&self, task: TaskNode) -> Vec<TaskNode> {
        self.neighbors(task, Direction::Incoming)
    }

    /// Tasks that depend directly on `task`, sorted
    pub fn dependents(&self, task: TaskNode) -> Vec<TaskNode> {
        self.neighbors(task, Direction::Outgoing)
    }

    fn neighbors(&self, task: TaskNode, direction: Direction) -> Vec<TaskNode> {
        let Some(&idx) = self.node_map.get(&task) else {
            return Vec::new();
        };
        let mut nodes: Vec<_> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n])
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// Topological order (dependencies first); fails on a cycle
    pub fn execution_order(&self) -> Result<Vec<TaskNode>> {
        let sorted = toposort(&self.graph, None)
            .map_err(|cycle| PipelineError::Cycle(self.graph[cycle.node_id()].id()))?;
        Ok(sorted.into_iter().map(|idx| self.graph[idx]).collect())
    }

    /// Run every task. `run` receives the outputs of the task's dependencies.
    ///
    /// A failed task marks its transitive dependents `Cancelled` without
    /// running them; unrelated tasks keep going. Once `cancel` fires no new
    /// task starts. At most `workers` tasks execute at the same time.
    pub async fn execute<T, F, Fut>(
        &self,
        workers: usize,
        cancel: &CancellationToken,
        run: F,
    ) -> Result<BTreeMap<TaskNode, TaskState<T>>>
    where
        T: Send + Sync + 'static,
        F: Fn(TaskNode, Vec<Arc<T>>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.execution_order()?;

        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut states: BTreeMap<TaskNode, TaskState<T>> = BTreeMap::new();
        let mut waiting_on: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
            .collect();

        let mut roots: Vec<NodeIndex> = waiting_on
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&idx, _)| idx)
            .collect();
        roots.sort_by_key(|&idx| self.graph[idx]);
        let mut ready: VecDeque<NodeIndex> = roots.into();
        let mut running = FuturesUnordered::new();

        loop {
            while let Some(idx) = ready.pop_front() {
                let task = self.graph[idx];
                if cancel.is_cancelled() {
                    tracing::debug!(%task, "Not starting task, run cancelled");
                    self.cancel_from(idx, &mut states);
                    continue;
                }

                let inputs: Vec<Arc<T>> = self
                    .dependencies(task)
                    .into_iter()
                    .filter_map(|dep| match states.get(&dep) {
                        Some(TaskState::Done(output)) => Some(Arc::clone(output)),
                        _ => None,
                    })
                    .collect();

                let fut = run(task, inputs);
                let semaphore = Arc::clone(&semaphore);
                let span = tracing::info_span!("task", task = %task);
                let handle = tokio::spawn(
                    async move {
                        // The semaphore is never closed, so acquiring cannot fail
                        let _permit = semaphore.acquire_owned().await;
                        fut.await
                    }
                    .instrument(span),
                );
                running.push(async move { (idx, handle.await) });
                tracing::debug!(%task, "Task started");
            }

            let Some((idx, joined)) = running.next().await else {
                break;
            };
            let task = self.graph[idx];
            let result = joined.unwrap_or_else(|e| {
                Err(PipelineError::TaskAborted {
                    task: task.id(),
                    reason: e.to_string(),
                })
            });

            match result {
                Ok(output) => {
                    tracing::debug!(%task, "Task completed");
                    states.insert(task, TaskState::Done(Arc::new(output)));
                    for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                        if states.contains_key(&self.graph[dependent]) {
                            continue;
                        }
                        if let Some(count) = waiting_on.get_mut(&dependent) {
                            *count = count.saturating_sub(1);
                            if *count == 0 {
                                ready.push_back(dependent);
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(%task, error = %err, "Task failed");
                    states.insert(task, TaskState::Failed(err));
                    for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                        self.cancel_from(dependent, &mut states);
                    }
                }
            }
        }

        Ok(states)
    }

    /// Mark `idx` and everything reachable from it as cancelled, unless already settled
    fn cancel_from<T>(&self, idx: NodeIndex, states: &mut BTreeMap<TaskNode, TaskState<T>>) {
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            let task = self.graph[current];
            if states.contains_key(&task) {
                continue;
            }
            states.insert(task, TaskState::Cancelled);
            stack.extend(self.graph.neighbors_directed(current, Direction::Outgoing));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_staging_depends_only_on_generation() {
        let graph = TaskGraph::for_targets(&[Target::Python, Target::Js]);
        assert_eq!(graph.task_count(), 3);
        assert_eq!(graph.dependencies(TaskNode::Stage(Target::Js)), vec![TaskNode::Generate]);
        assert_eq!(
            graph.dependents(TaskNode::Generate),
            vec![TaskNode::Stage(Target::Python), TaskNode::Stage(Target::Js)]
        );
        assert_eq!(graph.execution_order().unwrap()[0], TaskNode::Generate);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut graph = TaskGraph::new();
        graph.add_dependency(TaskNode::Stage(Target::Js), TaskNode::Generate);
        graph.add_dependency(TaskNode::Generate, TaskNode::Stage(Target::Js));
        assert!(matches!(graph.execution_order(), Err(PipelineError::Cycle(_))));
    }

    #[tokio::test]
    async fn test_dependencies_complete_first() {
        let graph = TaskGraph::for_targets(&Target::ALL);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let states = graph
            .execute(4, &CancellationToken::new(), |task, inputs| {
                let order = Arc::clone(&order);
                async move {
                    if task != TaskNode::Generate {
                        assert_eq!(inputs.len(), 1);
                    }
                    order.lock().unwrap().push(task);
                    Ok::<_, PipelineError>(task.id())
                }
            })
            .await
            .unwrap();

        assert_eq!(states.len(), 4);
        assert_eq!(order.lock().unwrap()[0], TaskNode::Generate);
        assert!(states.values().all(|s| matches!(s, TaskState::Done(_))));
    }

    #[tokio::test]
    async fn test_failed_dependency_cancels_dependents() {
        let graph = TaskGraph::for_targets(&[Target::Python, Target::Js]);
        let started = Arc::new(AtomicUsize::new(0));

        let states = graph
            .execute(2, &CancellationToken::new(), |task, _| {
                let started = Arc::clone(&started);
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    match task {
                        TaskNode::Generate => Err(PipelineError::InvalidSchema {
                            diagnostics: "bad".to_string(),
                        }),
                        _ => Ok(()),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(matches!(states[&TaskNode::Generate], TaskState::Failed(_)));
        assert!(matches!(states[&TaskNode::Stage(Target::Python)], TaskState::Cancelled));
        assert!(matches!(states[&TaskNode::Stage(Target::Js)], TaskState::Cancelled));
    }

    #[tokio::test]
    async fn test_sibling_failure_is_isolated() {
        let graph = TaskGraph::for_targets(&[Target::Python, Target::Js]);
        let states = graph
            .execute(2, &CancellationToken::new(), |task, _| async move {
                match task {
                    TaskNode::Stage(Target::Python) => Err(PipelineError::Cancelled),
                    _ => Ok(()),
                }
            })
            .await
            .unwrap();

        assert!(matches!(states[&TaskNode::Stage(Target::Python)], TaskState::Failed(_)));
        assert!(matches!(states[&TaskNode::Stage(Target::Js)], TaskState::Done(_)));
    }

    #[tokio::test]
    async fn test_worker_limit_is_respected() {
        let graph = TaskGraph::for_targets(&Target::ALL);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        graph
            .execute(1, &CancellationToken::new(), |_, _| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, PipelineError>(())
                }
            })
            .await
            .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_nothing() {
        let graph = TaskGraph::for_targets(&[Target::Python]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let states = graph
            .execute(2, &cancel, |_, _| async move { Ok::<_, PipelineError>(()) })
            .await
            .unwrap();
        assert!(states.values().all(|s| matches!(s, TaskState::Cancelled)));
    }
}
