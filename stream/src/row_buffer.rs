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

use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowBufferError {
    #[error("cannot swap row buffers of different widths ({left} and {right})")]
    WidthMismatch { left: usize, right: usize },
}

#[derive(Debug)]
struct RowState {
    data: Vec<f32>,
    version: u64,
    was_read: bool,
    closed: bool,
}

/// One-slot handoff channel between a producer and its single consumer.
///
/// The producer fills a private buffer and [`swap`]s it with the shared
/// one; in one step the fresh row becomes visible and the previous,
/// already-consumed row becomes the producer's scratch space. `was_read`
/// is the only backpressure: it starts out `true`, `swap` clears it, and
/// the consumer sets it again with [`read_done`] once the row has been
/// used. The producer cannot publish row k+1 before row k was
/// acknowledged, which is what makes the handoff FIFO without a queue.
///
/// `closed` is the completion signal: a producer closes its buffer along
/// with the final row, and a consumer that finds the buffer exhausted
/// (acknowledged and closed) knows no further row will ever arrive.
///
/// [`swap`]: RowBuffer::swap
/// [`read_done`]: RowBuffer::read_done
#[derive(Debug)]
pub struct RowBuffer {
    state: Mutex<RowState>,
}

impl RowBuffer {
    pub fn new(width: usize) -> Self {
        RowBuffer {
            state: Mutex::new(RowState {
                data: vec![0.0; width],
                version: 0,
                was_read: true,
                closed: false,
            }),
        }
    }

    pub fn width(&self) -> usize {
        self.lock().data.len()
    }

    /// Number of swaps performed on this buffer so far.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn was_read(&self) -> bool {
        self.lock().was_read
    }

    /// An unread row is available.
    pub fn has_row(&self) -> bool {
        !self.lock().was_read
    }

    /// Consumer acknowledgment; re-enables the producer.
    pub fn read_done(&self) {
        self.lock().was_read = true;
    }

    /// Producer signal that no further row will be published.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// The buffer is closed and the last published row was acknowledged:
    /// there is nothing left to consume, ever.
    pub fn is_exhausted(&self) -> bool {
        let state = self.lock();
        state.was_read && state.closed
    }

    /// Read access to the current row.
    pub fn read(&self) -> RowRead<'_> {
        RowRead { guard: self.lock() }
    }

    /// Write access to the current row. Producers use this on their
    /// private scratch buffer; the shared buffer is only written through
    /// [`swap`].
    ///
    /// [`swap`]: RowBuffer::swap
    pub fn write(&self) -> RowWrite<'_> {
        RowWrite { guard: self.lock() }
    }

    /// Exchange contents with `other`, then advance this buffer's
    /// version and mark its row unread. Both buffer locks are taken in
    /// address order, so two tasks swapping against shared buffers
    /// cannot deadlock.
    pub fn swap(&self, other: &RowBuffer) -> Result<(), RowBufferError> {
        assert!(
            !std::ptr::eq(self, other),
            "a row buffer cannot swap with itself"
        );
        let self_first = (self as *const RowBuffer) < (other as *const RowBuffer);
        let (first, second) = if self_first {
            (self.lock(), other.lock())
        } else {
            (other.lock(), self.lock())
        };
        let (mut mine, mut theirs) = if self_first {
            (first, second)
        } else {
            (second, first)
        };
        if mine.data.len() != theirs.data.len() {
            return Err(RowBufferError::WidthMismatch {
                left: mine.data.len(),
                right: theirs.data.len(),
            });
        }
        mem::swap(&mut mine.data, &mut theirs.data);
        mine.version += 1;
        mine.was_read = false;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, RowState> {
        self.state.lock().expect("row buffer lock poisoned")
    }
}

pub struct RowRead<'a> {
    guard: MutexGuard<'a, RowState>,
}

impl Deref for RowRead<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.guard.data
    }
}

pub struct RowWrite<'a> {
    guard: MutexGuard<'a, RowState>,
}

impl Deref for RowWrite<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.guard.data
    }
}

impl DerefMut for RowWrite<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.guard.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_out_acknowledged_and_open() {
        let buffer = RowBuffer::new(4);
        assert!(buffer.was_read());
        assert!(!buffer.has_row());
        assert!(!buffer.is_closed());
        assert_eq!(buffer.version(), 0);
        assert_eq!(buffer.width(), 4);
    }

    #[test]
    fn swap_publishes_a_row() {
        let shared = RowBuffer::new(3);
        let scratch = RowBuffer::new(3);
        scratch.write().copy_from_slice(&[1.0, 2.0, 3.0]);

        shared.swap(&scratch).unwrap();
        assert!(shared.has_row());
        assert_eq!(shared.version(), 1);
        assert_eq!(&*shared.read(), &[1.0, 2.0, 3.0]);
        // The consumed previous contents became the producer's scratch.
        assert_eq!(&*scratch.read(), &[0.0, 0.0, 0.0]);

        shared.read_done();
        assert!(!shared.has_row());
        assert!(shared.was_read());
    }

    #[test]
    fn swap_rejects_width_mismatch() {
        let shared = RowBuffer::new(3);
        let scratch = RowBuffer::new(2);
        assert_eq!(
            shared.swap(&scratch),
            Err(RowBufferError::WidthMismatch { left: 3, right: 2 })
        );
    }

    #[test]
    fn versions_advance_only_on_the_published_side() {
        let shared = RowBuffer::new(1);
        let scratch = RowBuffer::new(1);
        shared.swap(&scratch).unwrap();
        shared.read_done();
        shared.swap(&scratch).unwrap();
        assert_eq!(shared.version(), 2);
        assert_eq!(scratch.version(), 0);
    }

    #[test]
    fn exhausted_after_close_and_acknowledge() {
        let shared = RowBuffer::new(2);
        let scratch = RowBuffer::new(2);
        shared.swap(&scratch).unwrap();
        shared.close();
        assert!(!shared.is_exhausted());
        shared.read_done();
        assert!(shared.is_exhausted());
    }
}
