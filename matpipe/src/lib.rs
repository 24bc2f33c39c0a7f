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

//! The two pipeline front-ends, shared by the `matsum` and `matmul`
//! binaries and by the tests, which drive them in-process.

use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::bail;

use matpipe_block::{
    matmul_strassen, padded_size, BlockHandle, BlockTask, MatrixReader, MatrixWriter,
};
use matpipe_engine::{TaskGraph, TaskId};
use matpipe_stream::{RowAdder, RowReader, RowWriter, StreamTask};

#[derive(Debug)]
pub struct SumConfig {
    pub threads: usize,
    pub rows: usize,
    pub cols: usize,
    pub output: PathBuf,
    pub inputs: Vec<PathBuf>,
}

/// Sum all input matrices element-wise into the output file.
///
/// The graph is a strict binary tree built by FIFO pairing: readers and
/// intermediate adders are consumed by exactly one downstream task each,
/// which is what the single-consumer row handoff requires. All tasks
/// stream row by row, so the pipeline never holds more than a few rows
/// per task in memory.
pub fn run_sum(config: &SumConfig) -> anyhow::Result<()> {
    if config.inputs.is_empty() {
        bail!("at least one input matrix is required");
    }
    let mut graph = TaskGraph::new();
    let mut wave: VecDeque<TaskId> = VecDeque::new();
    for input in &config.inputs {
        let reader = StreamTask::Read(RowReader::new(input, config.rows, config.cols));
        wave.push_back(graph.add_task(reader, &[])?);
    }
    while wave.len() > 1 {
        let left = wave.pop_front().expect("wave holds at least two tasks");
        let right = wave.pop_front().expect("wave holds at least two tasks");
        let adder = StreamTask::Add(RowAdder::new(config.rows, config.cols));
        wave.push_back(graph.add_task(adder, &[left, right])?);
    }
    let total = wave.pop_front().expect("wave holds the final producer");
    let writer = StreamTask::Write(RowWriter::new(&config.output, config.rows, false));
    graph.add_task(writer, &[total])?;

    graph.run_all(config.threads);
    Ok(())
}

#[derive(Debug)]
pub struct MulConfig {
    pub threads: usize,
    /// Logical matrix dimension; padded up to a power of two internally.
    pub size: usize,
    /// Dimension at or below which Strassen recursion falls back to the
    /// direct algorithm.
    pub cutoff: usize,
    pub output: PathBuf,
    pub inputs: Vec<PathBuf>,
}

/// Multiply all input matrices left to right in pairwise waves.
pub fn run_mul(config: &MulConfig) -> anyhow::Result<()> {
    if config.inputs.is_empty() {
        bail!("at least one input matrix is required");
    }
    let padded = padded_size(config.size);
    let mut graph = TaskGraph::new();
    let mut wave: Vec<BlockHandle> = Vec::new();
    for input in &config.inputs {
        let loader = BlockTask::Read(MatrixReader::new(
            input,
            config.size,
            config.size,
            padded,
            padded,
        ));
        let id = graph.add_task(loader, &[])?;
        wave.push(BlockHandle {
            id,
            rows: padded,
            cols: padded,
        });
    }
    while wave.len() > 1 {
        let mut next = Vec::new();
        let mut index = 1;
        while index < wave.len() {
            next.push(matmul_strassen(
                &mut graph,
                &wave[index - 1],
                &wave[index],
                config.cutoff,
            )?);
            index += 2;
        }
        if wave.len() % 2 == 1 {
            next.push(wave[wave.len() - 1]);
        }
        wave = next;
    }
    let writer = graph.add_task(
        BlockTask::Write(MatrixWriter::new(&config.output, config.size, config.size)),
        &[wave[0].id],
    )?;

    graph.run_all(config.threads);

    if let Some(BlockTask::Write(task)) = graph.task(writer).map(|task| &**task) {
        if let Some(cause) = task.failure() {
            bail!("multiplication failed: {}", cause);
        }
    }
    Ok(())
}
