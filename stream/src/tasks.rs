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

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use matpipe_engine::Task;
use matpipe_numio::{write_row, FloatReader};

use crate::row_buffer::RowBuffer;

/// The sealed set of streaming task kinds.
///
/// Consumers discover their producers' output buffers through
/// [`out_buffer`] instead of downcasting: a consumer captures `Arc`
/// handles to its dependency tasks in `start` and polls for the buffer,
/// which the producer publishes when its own `start` runs.
///
/// [`out_buffer`]: StreamTask::out_buffer
pub enum StreamTask {
    Read(RowReader),
    Add(RowAdder),
    Write(RowWriter),
}

impl StreamTask {
    /// The row buffer this task publishes rows through, once started.
    /// Writers produce nothing and always return `None`.
    pub fn out_buffer(&self) -> Option<Arc<RowBuffer>> {
        match self {
            StreamTask::Read(task) => task.out_buffer(),
            StreamTask::Add(task) => task.out_buffer(),
            StreamTask::Write(_) => None,
        }
    }
}

impl Task for StreamTask {
    fn start(&self, dependencies: &[Arc<Self>]) -> bool {
        match self {
            StreamTask::Read(task) => task.start(dependencies),
            StreamTask::Add(task) => task.start(dependencies),
            StreamTask::Write(task) => task.start(dependencies),
        }
    }

    fn is_waiting(&self) -> bool {
        match self {
            StreamTask::Read(task) => task.is_waiting(),
            StreamTask::Add(task) => task.is_waiting(),
            StreamTask::Write(task) => task.is_waiting(),
        }
    }

    fn run_portion(&self) -> bool {
        match self {
            StreamTask::Read(task) => task.run_portion(),
            StreamTask::Add(task) => task.run_portion(),
            StreamTask::Write(task) => task.run_portion(),
        }
    }

    fn release_resources(&self) {
        match self {
            StreamTask::Read(task) => task.release_resources(),
            StreamTask::Add(task) => task.release_resources(),
            StreamTask::Write(task) => task.release_resources(),
        }
    }

    fn is_done(&self) -> bool {
        match self {
            StreamTask::Read(task) => task.is_done(),
            StreamTask::Add(task) => task.is_done(),
            StreamTask::Write(task) => task.is_done(),
        }
    }

    fn consumer_limit(&self) -> Option<usize> {
        match self {
            // Row handoff is strictly single-consumer; fan-out would
            // lose the backpressure handshake.
            StreamTask::Read(_) | StreamTask::Add(_) => Some(1),
            StreamTask::Write(_) => Some(0),
        }
    }
}

/// Reads `n_rows` rows of `n_cols` floats from a file, one row per
/// portion. A file that cannot be opened streams zeros, matching the
/// reader's no-failure contract.
pub struct RowReader {
    path: PathBuf,
    n_rows: usize,
    n_cols: usize,
    out: Mutex<Option<Arc<RowBuffer>>>,
    io: Mutex<Option<ReaderState>>,
    done: AtomicBool,
}

struct ReaderState {
    scratch: RowBuffer,
    input: Option<FloatReader<BufReader<File>>>,
    produced: usize,
}

impl RowReader {
    pub fn new(path: impl Into<PathBuf>, n_rows: usize, n_cols: usize) -> Self {
        RowReader {
            path: path.into(),
            n_rows,
            n_cols,
            out: Mutex::new(None),
            io: Mutex::new(None),
            done: AtomicBool::new(false),
        }
    }

    fn out_buffer(&self) -> Option<Arc<RowBuffer>> {
        lock(&self.out).clone()
    }

    fn start(&self, dependencies: &[Arc<StreamTask>]) -> bool {
        assert!(dependencies.is_empty(), "row reader takes no dependencies");
        let input = match File::open(&self.path) {
            Ok(file) => Some(FloatReader::new(BufReader::new(file))),
            Err(err) => {
                log::warn!(
                    "cannot open {}: {}; reading zero rows instead",
                    self.path.display(),
                    err
                );
                None
            }
        };
        *lock(&self.io) = Some(ReaderState {
            scratch: RowBuffer::new(self.n_cols),
            input,
            produced: 0,
        });
        *lock(&self.out) = Some(Arc::new(RowBuffer::new(self.n_cols)));
        self.done.store(false, Ordering::SeqCst);
        true
    }

    fn is_waiting(&self) -> bool {
        // Stalls only on backpressure: the previous row not consumed yet.
        match &*lock(&self.out) {
            Some(out) => !out.was_read(),
            None => false,
        }
    }

    fn run_portion(&self) -> bool {
        let mut io = lock(&self.io);
        let io = io.as_mut().expect("portion dispatched before start");
        let out = match lock(&self.out).clone() {
            Some(out) => out,
            None => return false,
        };
        if !out.was_read() {
            return false;
        }
        {
            let mut row = io.scratch.write();
            match &mut io.input {
                Some(input) => {
                    for value in row.iter_mut() {
                        *value = input.next_f32();
                    }
                }
                None => {
                    for value in row.iter_mut() {
                        *value = 0.0;
                    }
                }
            }
        }
        out.swap(&io.scratch)
            .expect("reader buffers share one width");
        io.produced += 1;
        log::trace!("{}: row {}/{}", self.path.display(), io.produced, self.n_rows);
        if io.produced >= self.n_rows {
            out.close();
            self.done.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn release_resources(&self) {
        *lock(&self.io) = None;
        *lock(&self.out) = None;
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Adds two row streams element-wise, one row per portion.
pub struct RowAdder {
    n_rows: usize,
    n_cols: usize,
    out: Mutex<Option<Arc<RowBuffer>>>,
    sources: Mutex<Option<(Arc<StreamTask>, Arc<StreamTask>)>>,
    work: Mutex<Option<AdderState>>,
    done: AtomicBool,
}

struct AdderState {
    scratch: RowBuffer,
    produced: usize,
}

impl RowAdder {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        RowAdder {
            n_rows,
            n_cols,
            out: Mutex::new(None),
            sources: Mutex::new(None),
            work: Mutex::new(None),
            done: AtomicBool::new(false),
        }
    }

    fn out_buffer(&self) -> Option<Arc<RowBuffer>> {
        lock(&self.out).clone()
    }

    fn source_buffers(&self) -> Option<(Arc<RowBuffer>, Arc<RowBuffer>)> {
        let sources = lock(&self.sources);
        let (left, right) = sources.as_ref()?;
        match (left.out_buffer(), right.out_buffer()) {
            (Some(left), Some(right)) => Some((left, right)),
            _ => None,
        }
    }

    fn start(&self, dependencies: &[Arc<StreamTask>]) -> bool {
        assert_eq!(dependencies.len(), 2, "row adder expects two producers");
        *lock(&self.sources) = Some((
            Arc::clone(&dependencies[0]),
            Arc::clone(&dependencies[1]),
        ));
        *lock(&self.work) = Some(AdderState {
            scratch: RowBuffer::new(self.n_cols),
            produced: 0,
        });
        *lock(&self.out) = Some(Arc::new(RowBuffer::new(self.n_cols)));
        self.done.store(false, Ordering::SeqCst);
        false
    }

    fn is_waiting(&self) -> bool {
        let out_busy = match &*lock(&self.out) {
            Some(out) => !out.was_read(),
            None => false,
        };
        if out_busy {
            return true;
        }
        match self.source_buffers() {
            Some((left, right)) => {
                let left_ready = left.has_row() || left.is_exhausted();
                let right_ready = right.has_row() || right.is_exhausted();
                !(left_ready && right_ready)
            }
            // Producers picked for start but not yet publishing.
            None => true,
        }
    }

    fn run_portion(&self) -> bool {
        let mut work = lock(&self.work);
        let work = work.as_mut().expect("portion dispatched before start");
        let (left, right) = match self.source_buffers() {
            Some(buffers) => buffers,
            None => return false,
        };
        let out = match lock(&self.out).clone() {
            Some(out) => out,
            None => return false,
        };
        if !out.was_read() {
            return false;
        }
        if left.is_exhausted() || right.is_exhausted() {
            log::warn!(
                "row adder input ended after {} of {} rows",
                work.produced,
                self.n_rows
            );
            out.close();
            self.done.store(true, Ordering::SeqCst);
            return true;
        }
        if !left.has_row() || !right.has_row() {
            return false;
        }
        {
            let mut sum = work.scratch.write();
            {
                let row = left.read();
                sum.copy_from_slice(&row);
            }
            let row = right.read();
            for (target, value) in sum.iter_mut().zip(row.iter()) {
                *target += value;
            }
        }
        left.read_done();
        right.read_done();
        out.swap(&work.scratch)
            .expect("adder buffers share one width");
        work.produced += 1;
        if work.produced >= self.n_rows {
            out.close();
            self.done.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn release_resources(&self) {
        *lock(&self.work) = None;
        *lock(&self.sources) = None;
        *lock(&self.out) = None;
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Terminal task: drains one row stream into a file, one row per
/// portion, optionally showing a `wrote/total` counter on a terminal.
pub struct RowWriter {
    path: PathBuf,
    n_rows: usize,
    progress: bool,
    source: Mutex<Option<Arc<StreamTask>>>,
    io: Mutex<Option<WriterState>>,
    done: AtomicBool,
}

struct WriterState {
    output: Option<BufWriter<File>>,
    term: console::Term,
    wrote: usize,
}

impl RowWriter {
    pub fn new(path: impl Into<PathBuf>, n_rows: usize, progress: bool) -> Self {
        RowWriter {
            path: path.into(),
            n_rows,
            progress,
            source: Mutex::new(None),
            io: Mutex::new(None),
            done: AtomicBool::new(false),
        }
    }

    fn source_buffer(&self) -> Option<Arc<RowBuffer>> {
        lock(&self.source).as_ref().and_then(|task| task.out_buffer())
    }

    fn start(&self, dependencies: &[Arc<StreamTask>]) -> bool {
        assert_eq!(dependencies.len(), 1, "row writer expects one producer");
        *lock(&self.source) = Some(Arc::clone(&dependencies[0]));
        let output = match File::create(&self.path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(err) => {
                log::error!(
                    "cannot create {}: {}; draining rows without writing",
                    self.path.display(),
                    err
                );
                None
            }
        };
        *lock(&self.io) = Some(WriterState {
            output,
            term: console::Term::stdout(),
            wrote: 0,
        });
        self.done.store(false, Ordering::SeqCst);
        false
    }

    fn is_waiting(&self) -> bool {
        match self.source_buffer() {
            Some(source) => !(source.has_row() || source.is_exhausted()),
            None => true,
        }
    }

    fn run_portion(&self) -> bool {
        let mut io = lock(&self.io);
        let io = io.as_mut().expect("portion dispatched before start");
        let source = match self.source_buffer() {
            Some(source) => source,
            None => return false,
        };
        if !source.has_row() {
            if source.is_exhausted() {
                log::warn!(
                    "row stream ended after {} of {} rows",
                    io.wrote,
                    self.n_rows
                );
                self.done.store(true, Ordering::SeqCst);
                return true;
            }
            return false;
        }
        {
            let row = source.read();
            if let Some(output) = &mut io.output {
                if let Err(err) = write_row(output, &row) {
                    log::error!("writing {}: {}", self.path.display(), err);
                }
            }
        }
        source.read_done();
        io.wrote += 1;
        if self.progress {
            print_progress(io, self.n_rows);
        }
        if io.wrote >= self.n_rows {
            if let Some(output) = &mut io.output {
                if let Err(err) = output.flush() {
                    log::error!("flushing {}: {}", self.path.display(), err);
                }
            }
            self.done.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn release_resources(&self) {
        *lock(&self.io) = None;
        *lock(&self.source) = None;
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

fn print_progress(io: &mut WriterState, n_rows: usize) {
    if io.term.is_term() {
        io.term.clear_line().ok();
        write!(io.term, "{}/{}", io.wrote, n_rows).ok();
        if io.wrote >= n_rows {
            io.term.write_line("").ok();
        }
    } else {
        writeln!(io.term, "{}/{}", io.wrote, n_rows).ok();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("stream task lock poisoned")
}
