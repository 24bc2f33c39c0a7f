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

//! Builds the recursive Strassen task graph for one multiplication.
//!
//! Matrices here are square with power-of-two dimensions; the front-end
//! pads on load and trims on write.

use matpipe_engine::{GraphError, TaskGraph, TaskId};

use crate::tasks::{BlockTask, MatrixOp, OpKind};

/// A registered block task together with the dimensions of the matrix it
/// produces, which is all the builder needs to wire further operations.
#[derive(Debug, Clone, Copy)]
pub struct BlockHandle {
    pub id: TaskId,
    pub rows: usize,
    pub cols: usize,
}

/// Smallest power of two that fits `size`.
pub fn padded_size(size: usize) -> usize {
    let mut padded = 1;
    while padded < size {
        padded <<= 1;
    }
    padded
}

/// Register `a + coeff * b`.
pub fn define_sum(
    graph: &mut TaskGraph<BlockTask>,
    a: &BlockHandle,
    b: &BlockHandle,
    coeff: f32,
    borrow: bool,
) -> Result<BlockHandle, GraphError> {
    let (rows, cols) = (a.rows, b.cols);
    let id = graph.add_task(
        BlockTask::Op(MatrixOp::new(rows, cols, OpKind::Add { coeff, borrow })),
        &[a.id, b.id],
    )?;
    Ok(BlockHandle { id, rows, cols })
}

fn sum(
    graph: &mut TaskGraph<BlockTask>,
    a: &BlockHandle,
    b: &BlockHandle,
    coeff: f32,
) -> Result<BlockHandle, GraphError> {
    define_sum(graph, a, b, coeff, false)
}

fn window(
    graph: &mut TaskGraph<BlockTask>,
    source: &BlockHandle,
    size: usize,
    row_offset: usize,
    col_offset: usize,
) -> Result<BlockHandle, GraphError> {
    let id = graph.add_task(
        BlockTask::Op(MatrixOp::new(
            size,
            size,
            OpKind::Window {
                row_offset,
                col_offset,
            },
        )),
        &[source.id],
    )?;
    Ok(BlockHandle {
        id,
        rows: size,
        cols: size,
    })
}

/// Register the task subgraph computing `m1 * m2` and return the handle
/// of the task producing the product. At or below the cutoff dimension
/// the direct algorithm is used; above it the multiplication splits into
/// seven recursive products over half-sized quadrants.
pub fn matmul_strassen(
    graph: &mut TaskGraph<BlockTask>,
    m1: &BlockHandle,
    m2: &BlockHandle,
    cutoff: usize,
) -> Result<BlockHandle, GraphError> {
    assert!(cutoff > 0, "strassen cutoff must be positive");
    let size = m1.cols;
    if size <= cutoff {
        let (rows, cols) = (m1.rows, m2.cols);
        let id = graph.add_task(
            BlockTask::Op(MatrixOp::new(rows, cols, OpKind::Mul)),
            &[m1.id, m2.id],
        )?;
        return Ok(BlockHandle { id, rows, cols });
    }

    let half = size / 2;
    let a11 = window(graph, m1, half, 0, 0)?;
    let a12 = window(graph, m1, half, 0, half)?;
    let a21 = window(graph, m1, half, half, 0)?;
    let a22 = window(graph, m1, half, half, half)?;
    let b11 = window(graph, m2, half, 0, 0)?;
    let b12 = window(graph, m2, half, 0, half)?;
    let b21 = window(graph, m2, half, half, 0)?;
    let b22 = window(graph, m2, half, half, half)?;

    let p1 = {
        let left = sum(graph, &a11, &a22, 1.0)?;
        let right = sum(graph, &b11, &b22, 1.0)?;
        matmul_strassen(graph, &left, &right, cutoff)?
    };
    let p2 = {
        let left = sum(graph, &a21, &a22, 1.0)?;
        matmul_strassen(graph, &left, &b11, cutoff)?
    };
    let p3 = {
        let right = sum(graph, &b12, &b22, -1.0)?;
        matmul_strassen(graph, &a11, &right, cutoff)?
    };
    let p4 = {
        let right = sum(graph, &b21, &b11, -1.0)?;
        matmul_strassen(graph, &a22, &right, cutoff)?
    };
    let p5 = {
        let left = sum(graph, &a11, &a12, 1.0)?;
        matmul_strassen(graph, &left, &b22, cutoff)?
    };
    let p6 = {
        let left = sum(graph, &a21, &a11, -1.0)?;
        let right = sum(graph, &b11, &b12, 1.0)?;
        matmul_strassen(graph, &left, &right, cutoff)?
    };
    let p7 = {
        let left = sum(graph, &a12, &a22, -1.0)?;
        let right = sum(graph, &b21, &b22, 1.0)?;
        matmul_strassen(graph, &left, &right, cutoff)?
    };

    let c11 = {
        let left = sum(graph, &p1, &p4, 1.0)?;
        let right = sum(graph, &p7, &p5, -1.0)?;
        sum(graph, &left, &right, 1.0)?
    };
    let c12 = sum(graph, &p3, &p5, 1.0)?;
    let c21 = sum(graph, &p2, &p4, 1.0)?;
    let c22 = {
        let left = sum(graph, &p1, &p2, -1.0)?;
        let right = sum(graph, &p3, &p6, 1.0)?;
        sum(graph, &left, &right, 1.0)?
    };

    let id = graph.add_task(
        BlockTask::Op(MatrixOp::new(size, size, OpKind::Assemble)),
        &[c11.id, c12.id, c21.id, c22.id],
    )?;
    Ok(BlockHandle {
        id,
        rows: size,
        cols: size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_rounds_up_to_powers_of_two() {
        assert_eq!(padded_size(1), 1);
        assert_eq!(padded_size(2), 2);
        assert_eq!(padded_size(3), 4);
        assert_eq!(padded_size(4), 4);
        assert_eq!(padded_size(5), 8);
        assert_eq!(padded_size(1000), 1024);
    }
}
