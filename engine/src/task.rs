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

use std::fmt;
use std::sync::Arc;

/// Dense identifier of a registered task, assigned in insertion order.
///
/// An id records which graph instance issued it, and
/// [`TaskGraph::add_task`] rejects a dependency id minted by a different
/// graph even when the index happens to be in range there; an id only
/// ever stands for the task stored at its slot in the issuing graph.
/// Within the owning graph, ids can only be obtained from `add_task`, so
/// every dependency list names already-registered tasks and the graph is
/// topologically ordered by construction.
///
/// [`TaskGraph::add_task`]: crate::graph::TaskGraph::add_task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    pub(crate) index: usize,
    /// Instance stamp of the issuing graph.
    pub(crate) graph: usize,
}

impl TaskId {
    pub fn index(self) -> usize {
        self.index
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// A node of the task graph.
///
/// The scheduler drives every task through the same lifecycle:
///
/// ```text
/// registered --start--> initialized --run_portion--> ... --run_portion
///     (returns true)--> finished --release_resources--> dead
/// ```
///
/// All methods take `&self`; a task keeps its mutable state behind its own
/// locks. The scheduler never dispatches two portions of the same task
/// concurrently, and `start`/`release_resources` are each called exactly
/// once per run.
pub trait Task: Send + Sync {
    /// Called once, before any portion, with the registered dependency
    /// list in registration order. The return value is a hint: `true`
    /// means the task can run a portion right away, `false` that the
    /// scheduler should poll [`is_waiting`] before dispatching it.
    ///
    /// Dependencies are guaranteed to have been *picked* for start, not
    /// to have completed their own `start` yet. A task that needs a
    /// dependency's published state must poll for it.
    ///
    /// [`is_waiting`]: Task::is_waiting
    fn start(&self, dependencies: &[Arc<Self>]) -> bool
    where
        Self: Sized;

    /// Cheap predicate polled under the graph lock. Returning `true`
    /// means "do not dispatch me in this round". Must not mutate
    /// anything observable.
    fn is_waiting(&self) -> bool;

    /// Advance by one unit of work. Returns `true` once the task is
    /// complete; no further portions run after that.
    fn run_portion(&self) -> bool;

    /// Called exactly once, after the task finished and every task that
    /// depends on it finished too. Drops internal buffers and handles.
    fn release_resources(&self);

    /// Monotonic: flips to `true` when a portion completes the task.
    fn is_done(&self) -> bool;

    /// Upper bound on how many registered tasks may list this task as a
    /// dependency. Registration fails when the bound would be exceeded.
    /// Streaming producers return `Some(1)`: their row handoff is
    /// strictly single-producer/single-consumer.
    fn consumer_limit(&self) -> Option<usize> {
        None
    }
}
