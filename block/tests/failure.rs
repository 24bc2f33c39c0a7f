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

use std::fs;

use matpipe_block::{BlockTask, MatrixOp, MatrixReader, MatrixWriter, OpKind};
use matpipe_engine::TaskGraph;

#[test]
fn operation_failure_propagates_to_the_writer() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    fs::write(&input, "1 2\n3 4\n").unwrap();

    let mut graph = TaskGraph::new();
    let reader = graph
        .add_task(BlockTask::Read(MatrixReader::new(&input, 2, 2, 2, 2)), &[])
        .unwrap();
    // A window read past the source bounds fails its task; the failure
    // cause must flow along the data edges instead of aborting the run.
    let bad_window = graph
        .add_task(
            BlockTask::Op(MatrixOp::new(
                2,
                2,
                OpKind::Window {
                    row_offset: 3,
                    col_offset: 0,
                },
            )),
            &[reader],
        )
        .unwrap();
    let relay = graph
        .add_task(
            BlockTask::Op(MatrixOp::new(2, 2, OpKind::Mul)),
            &[bad_window, bad_window],
        )
        .unwrap();
    let writer = graph
        .add_task(
            BlockTask::Write(MatrixWriter::new(&output, 2, 2)),
            &[relay],
        )
        .unwrap();

    graph.run_all(2);

    let failure = match graph.task(writer).map(|task| &**task) {
        Some(BlockTask::Write(task)) => task.failure(),
        _ => panic!("writer task missing"),
    };
    let failure = failure.expect("failure cause adopted by the writer");
    assert!(failure.contains("window"), "unexpected cause: {}", failure);
    assert!(!output.exists(), "failed run must not write output");
}
