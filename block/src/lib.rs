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

//! Block tasks operate on whole matrices: every task performs its entire
//! operation in a single portion and synchronizes with its dependencies
//! at the task boundary. Allocation failures are recoverable; a failed
//! task stays done and every downstream task adopts the failure cause
//! instead of computing.

pub mod buffer;
pub mod strassen;
pub mod tasks;

pub use buffer::{MatrixBuffer, MatrixError};
pub use strassen::{define_sum, matmul_strassen, padded_size, BlockHandle};
pub use tasks::{BlockTask, MatrixCell, MatrixOp, MatrixReader, MatrixWriter, OpKind};
