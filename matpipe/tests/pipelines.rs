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
use std::path::{Path, PathBuf};

use matpipe::{run_mul, run_sum, MulConfig, SumConfig};

fn write_file(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
}

fn read_floats(path: &Path) -> Vec<f32> {
    fs::read_to_string(path)
        .unwrap()
        .split_whitespace()
        .map(|token| token.parse().unwrap())
        .collect()
}

#[test]
fn sums_two_matrices() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.txt");
    let second = dir.path().join("b.txt");
    let output = dir.path().join("out.txt");
    write_file(&first, "1 2\n3 4\n");
    write_file(&second, "5 6\n7 8\n");

    run_sum(&SumConfig {
        threads: 2,
        rows: 2,
        cols: 2,
        output: output.clone(),
        inputs: vec![first, second],
    })
    .unwrap();

    assert_eq!(read_floats(&output), vec![6.0, 8.0, 10.0, 12.0]);
}

#[test]
fn sums_four_one_by_one_matrices() {
    let dir = tempfile::tempdir().unwrap();
    let mut inputs: Vec<PathBuf> = Vec::new();
    for value in 1..=4 {
        let path = dir.path().join(format!("m{}.txt", value));
        write_file(&path, &format!("{}\n", value));
        inputs.push(path);
    }
    let output = dir.path().join("out.txt");

    run_sum(&SumConfig {
        threads: 4,
        rows: 1,
        cols: 1,
        output: output.clone(),
        inputs,
    })
    .unwrap();

    assert_eq!(read_floats(&output), vec![10.0]);
}

#[test]
fn single_input_sum_is_the_identity() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("a.txt");
    let output = dir.path().join("out.txt");
    write_file(&input, "1 2 3\n4 5 6\n");

    run_sum(&SumConfig {
        threads: 2,
        rows: 2,
        cols: 3,
        output: output.clone(),
        inputs: vec![input],
    })
    .unwrap();

    assert_eq!(read_floats(&output), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn sum_output_does_not_depend_on_the_thread_count() {
    let dir = tempfile::tempdir().unwrap();
    let mut inputs: Vec<PathBuf> = Vec::new();
    for index in 0..3 {
        let path = dir.path().join(format!("m{}.txt", index));
        let mut text = String::new();
        for row in 0..4 {
            for col in 0..5 {
                text.push_str(&format!("{} ", (index + 1) * (row * 5 + col)));
            }
            text.push('\n');
        }
        write_file(&path, &text);
        inputs.push(path);
    }

    let single = dir.path().join("single.txt");
    let parallel = dir.path().join("parallel.txt");
    run_sum(&SumConfig {
        threads: 1,
        rows: 4,
        cols: 5,
        output: single.clone(),
        inputs: inputs.clone(),
    })
    .unwrap();
    run_sum(&SumConfig {
        threads: num_cpus::get().max(2),
        rows: 4,
        cols: 5,
        output: parallel.clone(),
        inputs,
    })
    .unwrap();

    assert_eq!(fs::read(&single).unwrap(), fs::read(&parallel).unwrap());
}

#[test]
fn multiplies_two_by_two_with_cutoff_one() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.txt");
    let second = dir.path().join("b.txt");
    let output = dir.path().join("out.txt");
    write_file(&first, "1 2\n3 4\n");
    write_file(&second, "5 6\n7 8\n");

    run_mul(&MulConfig {
        threads: 2,
        size: 2,
        cutoff: 1,
        output: output.clone(),
        inputs: vec![first, second],
    })
    .unwrap();

    assert_eq!(read_floats(&output), vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn multiplies_padded_identity() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("identity.txt");
    let second = dir.path().join("m.txt");
    let output = dir.path().join("out.txt");
    write_file(&first, "1 0 0\n0 1 0\n0 0 1\n");
    write_file(&second, "1 2 3\n4 5 6\n7 8 9\n");

    run_mul(&MulConfig {
        threads: 3,
        size: 3,
        cutoff: 1,
        output: output.clone(),
        inputs: vec![first, second],
    })
    .unwrap();

    assert_eq!(
        read_floats(&output),
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]
    );
}

#[test]
fn multiplies_three_matrices_in_waves() {
    let dir = tempfile::tempdir().unwrap();
    let mut inputs: Vec<PathBuf> = Vec::new();
    // a * b * identity == a * b
    for (name, text) in &[
        ("a.txt", "1 2\n3 4\n"),
        ("b.txt", "5 6\n7 8\n"),
        ("i.txt", "1 0\n0 1\n"),
    ] {
        let path = dir.path().join(name);
        write_file(&path, text);
        inputs.push(path);
    }
    let output = dir.path().join("out.txt");

    run_mul(&MulConfig {
        threads: 4,
        size: 2,
        cutoff: 2,
        output: output.clone(),
        inputs,
    })
    .unwrap();

    assert_eq!(read_floats(&output), vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn missing_sum_input_reads_as_zeros() {
    let dir = tempfile::tempdir().unwrap();
    let present = dir.path().join("a.txt");
    let output = dir.path().join("out.txt");
    write_file(&present, "1 2\n3 4\n");

    run_sum(&SumConfig {
        threads: 2,
        rows: 2,
        cols: 2,
        output: output.clone(),
        inputs: vec![present, dir.path().join("absent.txt")],
    })
    .unwrap();

    assert_eq!(read_floats(&output), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn empty_input_list_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(run_sum(&SumConfig {
        threads: 1,
        rows: 1,
        cols: 1,
        output: dir.path().join("out.txt"),
        inputs: Vec::new(),
    })
    .is_err());
}
