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

//! Streaming tasks for row-oriented matrix pipelines.
//!
//! A producer publishes one row at a time through a [`RowBuffer`] and
//! stalls until its single consumer acknowledges the row. Pipelines built
//! from these tasks stream through matrices of any height with a handful
//! of row-sized buffers.

pub mod row_buffer;
pub mod tasks;

pub use row_buffer::{RowBuffer, RowBufferError, RowRead, RowWrite};
pub use tasks::{RowAdder, RowReader, RowWriter, StreamTask};
