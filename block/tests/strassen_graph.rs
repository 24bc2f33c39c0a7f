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
use std::path::Path;

use proptest::prelude::*;

use matpipe_block::{matmul_strassen, padded_size, BlockHandle, BlockTask, MatrixReader, MatrixWriter};
use matpipe_engine::TaskGraph;

fn write_matrix(path: &Path, values: &[f32], n_cols: usize) {
    let mut text = String::new();
    for (index, value) in values.iter().enumerate() {
        text.push_str(&format!("{} ", value));
        if index % n_cols == n_cols - 1 {
            text.push('\n');
        }
    }
    fs::write(path, text).unwrap();
}

fn read_floats(path: &Path) -> Vec<f32> {
    fs::read_to_string(path)
        .unwrap()
        .split_whitespace()
        .map(|token| token.parse().unwrap())
        .collect()
}

/// Build and run a single `a * b` multiplication of logical size `size`
/// through the Strassen graph, returning the written product.
fn multiply(a: &[f32], b: &[f32], size: usize, cutoff: usize, threads: usize) -> Vec<f32> {
    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("a.txt");
    let right = dir.path().join("b.txt");
    let output = dir.path().join("out.txt");
    write_matrix(&left, a, size);
    write_matrix(&right, b, size);

    let padded = padded_size(size);
    let mut graph = TaskGraph::new();
    let a = graph
        .add_task(
            BlockTask::Read(MatrixReader::new(&left, size, size, padded, padded)),
            &[],
        )
        .unwrap();
    let b = graph
        .add_task(
            BlockTask::Read(MatrixReader::new(&right, size, size, padded, padded)),
            &[],
        )
        .unwrap();
    let a = BlockHandle {
        id: a,
        rows: padded,
        cols: padded,
    };
    let b = BlockHandle {
        id: b,
        rows: padded,
        cols: padded,
    };
    let product = matmul_strassen(&mut graph, &a, &b, cutoff).unwrap();
    graph
        .add_task(
            BlockTask::Write(MatrixWriter::new(&output, size, size)),
            &[product.id],
        )
        .unwrap();
    graph.run_all(threads);

    read_floats(&output)
}

fn naive(a: &[f32], b: &[f32], size: usize) -> Vec<f32> {
    let mut product = vec![0.0; size * size];
    for row in 0..size {
        for col in 0..size {
            let mut acc = 0.0;
            for k in 0..size {
                acc += a[row * size + k] * b[k * size + col];
            }
            product[row * size + col] = acc;
        }
    }
    product
}

#[test]
fn two_by_two_at_cutoff_one() {
    let product = multiply(
        &[1.0, 2.0, 3.0, 4.0],
        &[5.0, 6.0, 7.0, 8.0],
        2,
        1,
        2,
    );
    assert_eq!(product, vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn padded_identity_multiplication() {
    // Logical size 3 pads to 4; identity times m must reproduce m after
    // the trim.
    let identity = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    let m = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
    let product = multiply(&identity, &m, 3, 1, 3);
    assert_eq!(product, m.to_vec());
}

#[test]
fn cutoff_does_not_change_the_product() {
    let a: Vec<f32> = (0..16).map(|i| i as f32).collect();
    let b: Vec<f32> = (0..16).map(|i| (15 - i) as f32).collect();
    let direct = multiply(&a, &b, 4, 4, 2);
    let recursive = multiply(&a, &b, 4, 1, 2);
    assert_eq!(direct, naive(&a, &b, 4));
    assert_eq!(direct, recursive);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn strassen_matches_the_direct_algorithm(
        a in proptest::collection::vec(-10i16..10, 16),
        b in proptest::collection::vec(-10i16..10, 16),
        cutoff in 1usize..5,
        threads in 1usize..4,
    ) {
        let a: Vec<f32> = a.iter().map(|v| *v as f32).collect();
        let b: Vec<f32> = b.iter().map(|v| *v as f32).collect();
        let product = multiply(&a, &b, 4, cutoff, threads);
        let expected = naive(&a, &b, 4);
        for (got, want) in product.iter().zip(&expected) {
            prop_assert!((got - want).abs() <= 1e-3);
        }
    }
}
