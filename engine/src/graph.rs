/*
 * Copyright 2024 the matpipe authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use thiserror::Error;

use crate::task::{Task, TaskId};

/// Source of the per-instance stamp carried by every issued [`TaskId`].
static NEXT_GRAPH_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency {dependency} is not registered in this graph (registered tasks: {registered})")]
    UnknownDependency {
        dependency: TaskId,
        registered: usize,
    },
    #[error("dependency {dependency} belongs to a different task graph")]
    ForeignGraph { dependency: TaskId },
    #[error("task {dependency} accepts at most {limit} consumer(s)")]
    TooManyConsumers { dependency: TaskId, limit: usize },
}

/// Start gate for the one-time call to `Task::start`.
///
/// `WillNow` marks the window where a worker has claimed the call but the
/// graph lock has been dropped; it keeps a second worker from starting the
/// same task while letting other scheduling decisions proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Started {
    No,
    WillNow,
    Yes,
}

#[derive(Debug)]
struct TaskState {
    started: Started,
    /// A worker currently executes a portion of this task.
    runs_now: bool,
    /// A portion reported completion; no further portion will run.
    finished: bool,
    /// `release_resources` has been called.
    deallocated: bool,
    /// Not-yet-finished tasks that list this task as a dependency.
    /// Counted per occurrence, so a duplicated dependency entry is
    /// consistent with `n_dependencies_not_started` below.
    n_users_not_finished: usize,
    /// Dependencies that have not been picked for start yet.
    n_dependencies_not_started: usize,
}

impl TaskState {
    fn new(n_dependencies: usize) -> Self {
        TaskState {
            started: Started::No,
            runs_now: false,
            finished: false,
            deallocated: false,
            n_users_not_finished: 0,
            n_dependencies_not_started: n_dependencies,
        }
    }

    fn reset(&mut self, n_dependencies: usize) {
        *self = TaskState::new(n_dependencies);
    }
}

enum Pick {
    Start(TaskId),
    Resume(TaskId),
}

/**
 * The scheduler's start policy is what makes streaming work: a task
 * becomes eligible to start when all of its dependencies have *started*,
 * not when they have finished. A row adder therefore begins consuming
 * row 1 while its readers are still producing the remaining rows, and
 * every task that actually has to wait for upstream data says so through
 * `is_waiting`.
 *
 * Workers prefer resuming an in-flight task over starting a fresh one,
 * and both scans pick the lowest id. That keeps already-live pipelines
 * draining instead of growing the set of tasks holding buffers, and it
 * makes the schedule deterministic for a single worker.
 *
 * Reclamation is eager. When a task finishes, each of its dependencies
 * loses one unfinished user, and a dependency that is finished with no
 * unfinished users left is released immediately. That is the mechanism
 * that lets a pipeline stream through more data than fits in memory:
 * buffers live only while some unfinished task can still read them.
 */
pub struct TaskGraph<T> {
    /// Instance stamp compared against the stamp in every dependency id,
    /// so an id issued by another graph is refused even when its index
    /// would be in range here.
    id: usize,
    tasks: Vec<Arc<T>>,
    /// Per task, the dependency ids in registration order. This is the
    /// order handed to `Task::start`, and duplicates are preserved.
    dependencies: Vec<Vec<TaskId>>,
    /// Edge task -> dependency, one edge per occurrence. Incoming edges
    /// of a node are therefore its users.
    structure: DiGraph<(), ()>,
    sched: Mutex<Vec<TaskState>>,
    ready: Condvar,
}

impl<T: Task> Default for TaskGraph<T> {
    fn default() -> Self {
        TaskGraph::new()
    }
}

impl<T: Task> TaskGraph<T> {
    pub fn new() -> Self {
        TaskGraph {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            tasks: Vec::new(),
            dependencies: Vec::new(),
            structure: DiGraph::new(),
            sched: Mutex::new(Vec::new()),
            ready: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: TaskId) -> Option<&Arc<T>> {
        if id.graph != self.id {
            return None;
        }
        self.tasks.get(id.index)
    }

    /// Register `task` with its dependency list and hand back its id.
    ///
    /// Every dependency must be a task registered in *this* graph: an id
    /// stamped by another instance is refused outright, and an id that
    /// names no registered slot is refused too. Together with ids being
    /// issued in insertion order, that makes the stored adjacency
    /// acyclic and topologically ordered by construction. Registration
    /// also enforces each dependency's declared consumer limit.
    pub fn add_task(&mut self, task: T, dependencies: &[TaskId]) -> Result<TaskId, GraphError> {
        for dep in dependencies {
            if dep.graph != self.id {
                return Err(GraphError::ForeignGraph { dependency: *dep });
            }
            if dep.index >= self.tasks.len() {
                return Err(GraphError::UnknownDependency {
                    dependency: *dep,
                    registered: self.tasks.len(),
                });
            }
        }
        for dep in dependencies {
            if let Some(limit) = self.tasks[dep.index].consumer_limit() {
                let existing = self
                    .structure
                    .edges_directed(NodeIndex::new(dep.index), Direction::Incoming)
                    .count();
                let added = dependencies.iter().filter(|d| **d == *dep).count();
                if existing + added > limit {
                    return Err(GraphError::TooManyConsumers {
                        dependency: *dep,
                        limit,
                    });
                }
            }
        }

        let id = TaskId {
            index: self.tasks.len(),
            graph: self.id,
        };
        let node = self.structure.add_node(());
        debug_assert_eq!(node.index(), id.index);
        for dep in dependencies {
            self.structure.add_edge(node, NodeIndex::new(dep.index), ());
        }
        self.tasks.push(Arc::new(task));
        self.dependencies.push(dependencies.to_vec());
        self.sched
            .get_mut()
            .expect("task graph lock poisoned")
            .push(TaskState::new(dependencies.len()));
        log::debug!("registered task {} with {} dependencies", id, dependencies.len());
        Ok(id)
    }

    /// Run every registered task to completion on `n_threads` workers.
    ///
    /// The calling thread participates as one of the workers. On return,
    /// every task has finished and had its resources released.
    pub fn run_all(&self, n_threads: usize) {
        let n_threads = n_threads.max(1);
        {
            let mut sched = self.lock_sched();
            for (state, deps) in sched.iter_mut().zip(&self.dependencies) {
                state.reset(deps.len());
            }
            for deps in &self.dependencies {
                for dep in deps {
                    sched[dep.index].n_users_not_finished += 1;
                }
            }
        }

        crossbeam::scope(|scope| {
            for _ in 1..n_threads {
                scope.spawn(|_| self.worker_loop());
            }
            self.worker_loop();
        })
        .expect("worker thread panicked");
    }

    fn worker_loop(&self) {
        loop {
            let pick = match self.next_portion() {
                Some(pick) => pick,
                None => return,
            };
            match pick {
                Pick::Resume(id) => {
                    let done = self.tasks[id.index].run_portion();
                    self.portion_done(id, done);
                }
                Pick::Start(id) => {
                    let deps: Vec<Arc<T>> = self.dependencies[id.index]
                        .iter()
                        .map(|dep| Arc::clone(&self.tasks[dep.index]))
                        .collect();
                    let proceed = self.tasks[id.index].start(&deps);
                    {
                        let mut sched = self.lock_sched();
                        sched[id.index].started = Started::Yes;
                        if !proceed {
                            sched[id.index].runs_now = false;
                        }
                    }
                    if proceed {
                        let done = self.tasks[id.index].run_portion();
                        self.portion_done(id, done);
                    } else {
                        self.ready.notify_all();
                    }
                }
            }
        }
    }

    /// Pick the next portion for this worker, blocking until one exists
    /// or every task has finished (in which case `None` is returned and
    /// the worker exits).
    fn next_portion(&self) -> Option<Pick> {
        let mut sched = self.lock_sched();
        loop {
            if let Some(id) = self.find_resumable(&sched) {
                sched[id.index].runs_now = true;
                log::trace!("resuming task {}", id);
                return Some(Pick::Resume(id));
            }

            if let Some(id) = self.find_startable(&sched) {
                sched[id.index].started = Started::WillNow;
                sched[id.index].runs_now = true;
                // The decision to start is what unblocks users, not the
                // completion of `start` itself.
                let mut unblocked = false;
                for edge in self
                    .structure
                    .edges_directed(NodeIndex::new(id.index), Direction::Incoming)
                {
                    let user = edge.source().index();
                    sched[user].n_dependencies_not_started -= 1;
                    if sched[user].n_dependencies_not_started == 0 {
                        unblocked = true;
                    }
                }
                if unblocked {
                    self.ready.notify_all();
                }
                log::debug!("starting task {}", id);
                return Some(Pick::Start(id));
            }

            if Self::all_finished(&sched) {
                return None;
            }

            sched = self
                .ready
                .wait_while(sched, |sched| {
                    !Self::all_finished(sched)
                        && self.find_resumable(sched).is_none()
                        && self.find_startable(sched).is_none()
                })
                .expect("task graph lock poisoned");
        }
    }

    fn portion_done(&self, id: TaskId, done: bool) {
        let mut sched = self.lock_sched();
        sched[id.index].runs_now = false;
        if done {
            sched[id.index].finished = true;
            log::debug!("task {} finished", id);

            // A finished task no longer reads from its dependencies; any
            // dependency left without unfinished users is reclaimed on
            // the spot.
            for dep in &self.dependencies[id.index] {
                let state = &mut sched[dep.index];
                debug_assert!(state.n_users_not_finished > 0);
                state.n_users_not_finished -= 1;
                if state.finished && state.n_users_not_finished == 0 && !state.deallocated {
                    self.tasks[dep.index].release_resources();
                    state.deallocated = true;
                    log::debug!("released task {}", dep);
                }
            }

            // Terminal tasks have no users and are reclaimed right away.
            let state = &mut sched[id.index];
            if state.n_users_not_finished == 0 && !state.deallocated {
                self.tasks[id.index].release_resources();
                state.deallocated = true;
                log::debug!("released task {}", id);
            }
        }
        self.ready.notify_all();
    }

    fn find_resumable(&self, sched: &[TaskState]) -> Option<TaskId> {
        for (index, state) in sched.iter().enumerate() {
            if state.started == Started::Yes
                && !state.finished
                && !state.runs_now
                && !self.tasks[index].is_waiting()
            {
                return Some(TaskId {
                    index,
                    graph: self.id,
                });
            }
        }
        None
    }

    fn find_startable(&self, sched: &[TaskState]) -> Option<TaskId> {
        for (index, state) in sched.iter().enumerate() {
            if state.started == Started::No && state.n_dependencies_not_started == 0 {
                return Some(TaskId {
                    index,
                    graph: self.id,
                });
            }
        }
        None
    }

    fn all_finished(sched: &[TaskState]) -> bool {
        sched.iter().all(|state| state.finished)
    }

    fn lock_sched(&self) -> MutexGuard<'_, Vec<TaskState>> {
        self.sched.lock().expect("task graph lock poisoned")
    }
}
