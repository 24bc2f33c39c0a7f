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

use crate::buffer::{MatrixBuffer, MatrixError};

/// Shared per-task record: the result buffer plus the done flag and
/// failure cause consumers look at. Dependencies hand out `Arc`s to
/// their cell in `start`; the buffer itself is only locked inside
/// portions, after the producing task reported done.
pub struct MatrixCell {
    n_rows: usize,
    n_cols: usize,
    buffer: Mutex<MatrixBuffer>,
    done: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl MatrixCell {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        MatrixCell {
            n_rows,
            n_cols,
            buffer: Mutex::new(MatrixBuffer::new(n_rows, n_cols)),
            done: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn lock(&self) -> MutexGuard<'_, MatrixBuffer> {
        self.buffer.lock().expect("matrix cell lock poisoned")
    }

    pub fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Back to the not-done, not-failed state; called from
    /// `release_resources`, where no consumer can observe the cell, so a
    /// graph can be run again.
    fn reset(&self) {
        self.done.store(false, Ordering::SeqCst);
        *self.failure.lock().expect("matrix cell lock poisoned") = None;
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn set_failure(&self, cause: String) {
        *self.failure.lock().expect("matrix cell lock poisoned") = Some(cause);
    }

    pub fn has_failed(&self) -> bool {
        self.failure
            .lock()
            .expect("matrix cell lock poisoned")
            .is_some()
    }

    pub fn failure_cause(&self) -> Option<String> {
        self.failure
            .lock()
            .expect("matrix cell lock poisoned")
            .clone()
    }
}

/// Lock two cells' buffers without risking a lock-order deadlock: all
/// pairwise acquisitions go in address order. Guards come back in
/// argument order.
fn lock_pair<'a>(
    a: &'a MatrixCell,
    b: &'a MatrixCell,
) -> (MutexGuard<'a, MatrixBuffer>, MutexGuard<'a, MatrixBuffer>) {
    assert!(
        !std::ptr::eq(a, b),
        "cannot lock the same matrix cell twice"
    );
    if (a as *const MatrixCell) < (b as *const MatrixCell) {
        let first = a.lock();
        let second = b.lock();
        (first, second)
    } else {
        let second = b.lock();
        let first = a.lock();
        (first, second)
    }
}

/// The sealed set of block task kinds.
pub enum BlockTask {
    Read(MatrixReader),
    Op(MatrixOp),
    Write(MatrixWriter),
}

impl BlockTask {
    /// The result cell this task fills in, used by consumers to capture
    /// their arguments at `start`. Writers produce nothing.
    pub fn cell(&self) -> Option<&Arc<MatrixCell>> {
        match self {
            BlockTask::Read(task) => Some(&task.cell),
            BlockTask::Op(task) => Some(&task.cell),
            BlockTask::Write(_) => None,
        }
    }
}

impl Task for BlockTask {
    fn start(&self, dependencies: &[Arc<Self>]) -> bool {
        match self {
            BlockTask::Read(_) => {
                debug_assert!(dependencies.is_empty());
                true
            }
            BlockTask::Op(task) => task.start(dependencies),
            BlockTask::Write(task) => task.start(dependencies),
        }
    }

    fn is_waiting(&self) -> bool {
        match self {
            BlockTask::Read(_) => false,
            BlockTask::Op(task) => task.is_waiting(),
            BlockTask::Write(task) => task.is_waiting(),
        }
    }

    fn run_portion(&self) -> bool {
        match self {
            BlockTask::Read(task) => task.run_portion(),
            BlockTask::Op(task) => task.run_portion(),
            BlockTask::Write(task) => task.run_portion(),
        }
    }

    fn release_resources(&self) {
        match self {
            BlockTask::Read(task) => {
                task.cell.lock().free();
                task.cell.reset();
            }
            BlockTask::Op(task) => task.release_resources(),
            BlockTask::Write(task) => task.release_resources(),
        }
    }

    fn is_done(&self) -> bool {
        match self {
            BlockTask::Read(task) => task.cell.is_done(),
            BlockTask::Op(task) => task.cell.is_done(),
            BlockTask::Write(task) => task.done.load(Ordering::SeqCst),
        }
    }
}

/// Loads a matrix from a file in one portion. The cell is sized
/// `real x real` (padded); the file supplies the `nominal x nominal`
/// top-left corner and the padding stays zero.
pub struct MatrixReader {
    path: PathBuf,
    nominal_rows: usize,
    nominal_cols: usize,
    cell: Arc<MatrixCell>,
}

impl MatrixReader {
    pub fn new(
        path: impl Into<PathBuf>,
        nominal_rows: usize,
        nominal_cols: usize,
        real_rows: usize,
        real_cols: usize,
    ) -> Self {
        debug_assert!(nominal_rows <= real_rows && nominal_cols <= real_cols);
        MatrixReader {
            path: path.into(),
            nominal_rows,
            nominal_cols,
            cell: Arc::new(MatrixCell::new(real_rows, real_cols)),
        }
    }

    fn run_portion(&self) -> bool {
        {
            let mut buffer = self.cell.lock();
            match buffer.try_allocate() {
                Ok(()) => match File::open(&self.path) {
                    Ok(file) => {
                        let mut input = FloatReader::new(BufReader::new(file));
                        for row in 0..self.nominal_rows {
                            for col in 0..self.nominal_cols {
                                *buffer.at_mut(row, col) = input.next_f32();
                            }
                        }
                    }
                    Err(err) => {
                        log::warn!(
                            "cannot open {}: {}; loading zeros instead",
                            self.path.display(),
                            err
                        );
                    }
                },
                Err(err) => {
                    log::error!("loading {}: {}", self.path.display(), err);
                    self.cell.set_failure(err.to_string());
                }
            }
        }
        self.cell.mark_done();
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OpKind {
    /// `first + coeff * second`. With `borrow` set the task takes over
    /// the first argument's storage instead of allocating.
    Add { coeff: f32, borrow: bool },
    /// Direct multiplication of the two arguments.
    Mul,
    /// Copy of a window of the single argument, read at the offsets.
    Window {
        row_offset: usize,
        col_offset: usize,
    },
    /// Four same-sized quadrants into one block matrix.
    Assemble,
}

impl OpKind {
    fn arity(&self) -> usize {
        match self {
            OpKind::Add { .. } | OpKind::Mul => 2,
            OpKind::Window { .. } => 1,
            OpKind::Assemble => 4,
        }
    }
}

/// One-shot matrix operation over the result cells of its dependencies.
/// If any dependency failed, the failure cause is adopted and the
/// operation is skipped; any error from the operation itself becomes
/// this task's failure cause.
pub struct MatrixOp {
    kind: OpKind,
    cell: Arc<MatrixCell>,
    arguments: Mutex<Vec<Arc<MatrixCell>>>,
}

impl MatrixOp {
    pub fn new(n_rows: usize, n_cols: usize, kind: OpKind) -> Self {
        MatrixOp {
            kind,
            cell: Arc::new(MatrixCell::new(n_rows, n_cols)),
            arguments: Mutex::new(Vec::new()),
        }
    }

    fn start(&self, dependencies: &[Arc<BlockTask>]) -> bool {
        let mut arguments = Vec::new();
        for dependency in dependencies {
            if let Some(cell) = dependency.cell() {
                arguments.push(Arc::clone(cell));
            }
        }
        assert_eq!(
            arguments.len(),
            self.kind.arity(),
            "matrix operation arity mismatch"
        );
        *self.lock_arguments() = arguments;
        false
    }

    fn is_waiting(&self) -> bool {
        self.lock_arguments().iter().any(|cell| !cell.is_done())
    }

    fn run_portion(&self) -> bool {
        let arguments = self.lock_arguments().clone();
        for argument in &arguments {
            if let Some(cause) = argument.failure_cause() {
                log::debug!("skipping a matrix operation: {}", cause);
                self.cell.set_failure(cause);
                self.cell.mark_done();
                return true;
            }
        }
        if let Err(err) = self.perform(&arguments) {
            log::error!("matrix operation failed: {}", err);
            self.cell.set_failure(err.to_string());
        }
        self.cell.mark_done();
        true
    }

    fn perform(&self, arguments: &[Arc<MatrixCell>]) -> Result<(), MatrixError> {
        match self.kind {
            OpKind::Add { coeff, borrow } => {
                if borrow {
                    let (mut own, mut first) = lock_pair(&self.cell, &arguments[0]);
                    own.borrow(&mut first)?;
                    drop(first);
                    let second = arguments[1].lock();
                    own.add(&second, coeff)
                } else {
                    let mut own = self.cell.lock();
                    own.try_allocate()?;
                    {
                        let first = arguments[0].lock();
                        own.copy_from(&first)?;
                    }
                    let second = arguments[1].lock();
                    own.add(&second, coeff)
                }
            }
            OpKind::Mul => {
                let mut own = self.cell.lock();
                own.try_allocate()?;
                if Arc::ptr_eq(&arguments[0], &arguments[1]) {
                    let argument = arguments[0].lock();
                    own.mul(&argument, &argument)
                } else {
                    let (first, second) = lock_pair(&arguments[0], &arguments[1]);
                    own.mul(&first, &second)
                }
            }
            OpKind::Window {
                row_offset,
                col_offset,
            } => {
                let mut own = self.cell.lock();
                own.try_allocate()?;
                let (n_rows, n_cols) = (own.n_rows(), own.n_cols());
                let source = arguments[0].lock();
                own.set_window(&source, 0, 0, row_offset, col_offset, n_rows, n_cols)
            }
            OpKind::Assemble => {
                let mut own = self.cell.lock();
                own.try_allocate()?;
                let (half_rows, half_cols) = (arguments[0].n_rows(), arguments[0].n_cols());
                let offsets = [
                    (0, 0),
                    (0, half_cols),
                    (half_rows, 0),
                    (half_rows, half_cols),
                ];
                for (argument, (row_offset, col_offset)) in arguments.iter().zip(offsets.iter()) {
                    let quadrant = argument.lock();
                    own.set_window(
                        &quadrant,
                        *row_offset,
                        *col_offset,
                        0,
                        0,
                        quadrant.n_rows(),
                        quadrant.n_cols(),
                    )?;
                }
                Ok(())
            }
        }
    }

    fn release_resources(&self) {
        self.cell.lock().free();
        self.cell.reset();
        self.lock_arguments().clear();
    }

    fn lock_arguments(&self) -> MutexGuard<'_, Vec<Arc<MatrixCell>>> {
        self.arguments.lock().expect("matrix task lock poisoned")
    }
}

/// Terminal task: writes the `n_rows` x `n_cols` top-left corner of its
/// source (trimming any padding) in one portion, or records the adopted
/// failure cause and writes nothing.
pub struct MatrixWriter {
    path: PathBuf,
    n_rows: usize,
    n_cols: usize,
    source: Mutex<Option<Arc<MatrixCell>>>,
    failure: Mutex<Option<String>>,
    done: AtomicBool,
}

impl MatrixWriter {
    pub fn new(path: impl Into<PathBuf>, n_rows: usize, n_cols: usize) -> Self {
        MatrixWriter {
            path: path.into(),
            n_rows,
            n_cols,
            source: Mutex::new(None),
            failure: Mutex::new(None),
            done: AtomicBool::new(false),
        }
    }

    /// The failure cause adopted from upstream, if the run failed.
    pub fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .expect("matrix task lock poisoned")
            .clone()
    }

    fn start(&self, dependencies: &[Arc<BlockTask>]) -> bool {
        assert_eq!(dependencies.len(), 1, "matrix writer expects one source");
        let cell = dependencies[0]
            .cell()
            .expect("matrix writer source produces no matrix");
        *self.lock_source() = Some(Arc::clone(cell));
        *self.failure.lock().expect("matrix task lock poisoned") = None;
        self.done.store(false, Ordering::SeqCst);
        false
    }

    fn is_waiting(&self) -> bool {
        match &*self.lock_source() {
            Some(source) => !source.is_done(),
            None => true,
        }
    }

    fn run_portion(&self) -> bool {
        let source = match self.lock_source().clone() {
            Some(source) => source,
            None => return false,
        };
        if let Some(cause) = source.failure_cause() {
            log::error!("not writing {}: {}", self.path.display(), cause);
            *self.failure.lock().expect("matrix task lock poisoned") = Some(cause);
            self.done.store(true, Ordering::SeqCst);
            return true;
        }
        match File::create(&self.path) {
            Ok(file) => {
                let mut output = BufWriter::new(file);
                let buffer = source.lock();
                let mut row = Vec::with_capacity(self.n_cols);
                for r in 0..self.n_rows {
                    row.clear();
                    for c in 0..self.n_cols {
                        row.push(buffer.at(r, c));
                    }
                    if let Err(err) = write_row(&mut output, &row) {
                        log::error!("writing {}: {}", self.path.display(), err);
                        break;
                    }
                }
                if let Err(err) = output.flush() {
                    log::error!("flushing {}: {}", self.path.display(), err);
                }
            }
            Err(err) => {
                log::error!("cannot create {}: {}", self.path.display(), err);
            }
        }
        self.done.store(true, Ordering::SeqCst);
        true
    }

    fn release_resources(&self) {
        *self.lock_source() = None;
    }

    fn lock_source(&self) -> MutexGuard<'_, Option<Arc<MatrixCell>>> {
        self.source.lock().expect("matrix task lock poisoned")
    }
}
