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

//! Executes a DAG of cooperative tasks on a fixed pool of worker threads.
//!
//! Tasks subdivide their work into resumable portions instead of blocking,
//! which lets a small pool interleave many streaming pipelines. The graph
//! owns every registered task, decides which portion runs next and calls
//! each task's cleanup hook as soon as nothing depends on it anymore.

pub mod graph;
pub mod task;

pub use graph::{GraphError, TaskGraph};
pub use task::{Task, TaskId};
