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

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{ensure, Context};

use matpipe::{run_mul, MulConfig};

fn print_usage() {
    eprintln!(
        r#"usage: matmul -n THREADS -N SIZE -L CUTOFF -o FILE IN [IN...]

Multiplies the matrices from the given files left to right using
Strassen's algorithm. SIZE is the logical dimension; it is padded up to
the next power of two internally and trimmed again on write.

options:
  -n N       number of worker threads
  -N SIZE    matrix dimension
  -L CUTOFF  dimension at which recursion falls back to direct matmul
  -o FILE    output file
"#
    );
}

fn positive(args: &mut pico_args::Arguments, key: &'static str) -> anyhow::Result<usize> {
    let value: usize = args
        .value_from_str(key)
        .with_context(|| format!("argument {}", key))?;
    ensure!(value > 0, "argument {}: required positive integer", key);
    Ok(value)
}

fn parse_args() -> anyhow::Result<MulConfig> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print_usage();
        std::process::exit(0);
    }
    let threads = positive(&mut args, "-n")?;
    let size = positive(&mut args, "-N")?;
    let cutoff = positive(&mut args, "-L")?;
    let output: PathBuf = args.value_from_str("-o").context("argument -o")?;
    let inputs: Vec<PathBuf> = args.finish().into_iter().map(PathBuf::from).collect();
    ensure!(!inputs.is_empty(), "at least one input matrix file is required");
    for input in &inputs {
        ensure!(
            !input.to_string_lossy().starts_with('-'),
            "unknown option {}",
            input.display()
        );
    }
    Ok(MulConfig {
        threads,
        size,
        cutoff,
        output,
        inputs,
    })
}

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .env()
        .init()
        .ok();
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{:#}", err);
            print_usage();
            std::process::exit(1);
        }
    };
    let started = Instant::now();
    if let Err(err) = run_mul(&config) {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
    println!("time: {}s", started.elapsed().as_millis() as f64 / 1000.0);
}
