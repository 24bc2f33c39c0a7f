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

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatrixError {
    #[error("matrix buffer is not allocated")]
    NotAllocated,
    #[error("matrices have different sizes ({left_rows}x{left_cols} and {right_rows}x{right_cols})")]
    SizeMismatch {
        left_rows: usize,
        left_cols: usize,
        right_rows: usize,
        right_cols: usize,
    },
    #[error("bad dimensions for matmul ({lhs_cols} columns against {rhs_rows} rows)")]
    BadMulDimensions { lhs_cols: usize, rhs_rows: usize },
    #[error("a {n_rows}x{n_cols} window does not fit at offset ({row_offset}, {col_offset})")]
    WindowOutOfBounds {
        n_rows: usize,
        n_cols: usize,
        row_offset: usize,
        col_offset: usize,
    },
    #[error("cannot allocate a {rows}x{cols} matrix buffer")]
    AllocationFailed { rows: usize, cols: usize },
}

/// 2D float container with deferred allocation.
///
/// Construction records the dimensions only; [`allocate`] performs the
/// actual allocation and reports `false` on out-of-memory instead of
/// aborting, which is what lets block tasks turn allocation pressure
/// into a recoverable failure flag. All arithmetic requires both
/// operands allocated and size-checked.
///
/// [`allocate`]: MatrixBuffer::allocate
#[derive(Debug, Default)]
pub struct MatrixBuffer {
    n_rows: usize,
    n_cols: usize,
    data: Vec<f32>,
}

impl MatrixBuffer {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        MatrixBuffer {
            n_rows,
            n_cols,
            data: Vec::new(),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn total_len(&self) -> usize {
        self.n_rows * self.n_cols
    }

    /// Allocate the zero-filled backing store. Returns `false` if the
    /// allocator cannot provide the memory.
    pub fn allocate(&mut self) -> bool {
        if self.is_allocated() {
            return true;
        }
        let len = self.total_len();
        if self.data.try_reserve_exact(len).is_err() {
            return false;
        }
        self.data.resize(len, 0.0);
        true
    }

    pub fn try_allocate(&mut self) -> Result<(), MatrixError> {
        if self.allocate() {
            Ok(())
        } else {
            Err(MatrixError::AllocationFailed {
                rows: self.n_rows,
                cols: self.n_cols,
            })
        }
    }

    pub fn is_allocated(&self) -> bool {
        !self.data.is_empty()
    }

    /// Drop the backing store; the dimensions stay.
    pub fn free(&mut self) {
        self.data = Vec::new();
    }

    /// Element access. Panics when the buffer is not allocated or the
    /// position is out of range; arithmetic entry points check both.
    pub fn at(&self, row: usize, col: usize) -> f32 {
        debug_assert!(row < self.n_rows && col < self.n_cols);
        self.data[row * self.n_cols + col]
    }

    pub fn at_mut(&mut self, row: usize, col: usize) -> &mut f32 {
        debug_assert!(row < self.n_rows && col < self.n_cols);
        &mut self.data[row * self.n_cols + col]
    }

    /// In-place `self += coeff * m`.
    pub fn add(&mut self, m: &MatrixBuffer, coeff: f32) -> Result<(), MatrixError> {
        self.check_same_size(m)?;
        self.check_allocated()?;
        m.check_allocated()?;
        for (target, value) in self.data.iter_mut().zip(&m.data) {
            *target += coeff * value;
        }
        Ok(())
    }

    /// `self = a + coeff * b`.
    pub fn sum(&mut self, a: &MatrixBuffer, b: &MatrixBuffer, coeff: f32) -> Result<(), MatrixError> {
        self.copy_from(a)?;
        self.add(b, coeff)
    }

    /// `self = a * b`, the direct algorithm.
    pub fn mul(&mut self, a: &MatrixBuffer, b: &MatrixBuffer) -> Result<(), MatrixError> {
        if a.n_cols != b.n_rows {
            return Err(MatrixError::BadMulDimensions {
                lhs_cols: a.n_cols,
                rhs_rows: b.n_rows,
            });
        }
        if self.n_rows != a.n_rows || self.n_cols != b.n_cols {
            return Err(MatrixError::SizeMismatch {
                left_rows: self.n_rows,
                left_cols: self.n_cols,
                right_rows: a.n_rows,
                right_cols: b.n_cols,
            });
        }
        self.check_allocated()?;
        a.check_allocated()?;
        b.check_allocated()?;
        for row in 0..self.n_rows {
            for col in 0..self.n_cols {
                let mut acc = 0.0;
                for k in 0..a.n_cols {
                    acc += a.at(row, k) * b.at(k, col);
                }
                *self.at_mut(row, col) = acc;
            }
        }
        Ok(())
    }

    /// Copy all of `src` into this buffer at position (0, 0).
    pub fn copy_from(&mut self, src: &MatrixBuffer) -> Result<(), MatrixError> {
        self.set_window(src, 0, 0, 0, 0, src.n_rows, src.n_cols)
    }

    /// Copy an `n_rows` x `n_cols` window of `src`, read from
    /// (`src_row`, `src_col`), into this buffer at (`dst_row`,
    /// `dst_col`).
    pub fn set_window(
        &mut self,
        src: &MatrixBuffer,
        dst_row: usize,
        dst_col: usize,
        src_row: usize,
        src_col: usize,
        n_rows: usize,
        n_cols: usize,
    ) -> Result<(), MatrixError> {
        self.check_allocated()?;
        src.check_allocated()?;
        if self.n_rows < dst_row + n_rows || self.n_cols < dst_col + n_cols {
            return Err(MatrixError::WindowOutOfBounds {
                n_rows,
                n_cols,
                row_offset: dst_row,
                col_offset: dst_col,
            });
        }
        if src.n_rows < src_row + n_rows || src.n_cols < src_col + n_cols {
            return Err(MatrixError::WindowOutOfBounds {
                n_rows,
                n_cols,
                row_offset: src_row,
                col_offset: src_col,
            });
        }
        for row in 0..n_rows {
            for col in 0..n_cols {
                *self.at_mut(dst_row + row, dst_col + col) = src.at(src_row + row, src_col + col);
            }
        }
        Ok(())
    }

    /// Exchange storage and dimensions with `other`.
    pub fn swap(&mut self, other: &mut MatrixBuffer) {
        mem::swap(&mut self.data, &mut other.data);
        mem::swap(&mut self.n_rows, &mut other.n_rows);
        mem::swap(&mut self.n_cols, &mut other.n_cols);
    }

    /// Take over `other`'s storage instead of allocating. Requires equal
    /// dimensions; `other` is left holding this buffer's (typically
    /// empty) storage.
    pub fn borrow(&mut self, other: &mut MatrixBuffer) -> Result<(), MatrixError> {
        self.check_same_size(other)?;
        other.check_allocated()?;
        self.swap(other);
        Ok(())
    }

    fn check_same_size(&self, other: &MatrixBuffer) -> Result<(), MatrixError> {
        if self.n_rows != other.n_rows || self.n_cols != other.n_cols {
            return Err(MatrixError::SizeMismatch {
                left_rows: self.n_rows,
                left_cols: self.n_cols,
                right_rows: other.n_rows,
                right_cols: other.n_cols,
            });
        }
        Ok(())
    }

    fn check_allocated(&self) -> Result<(), MatrixError> {
        if self.is_allocated() {
            Ok(())
        } else {
            Err(MatrixError::NotAllocated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n_rows: usize, n_cols: usize, values: &[f32]) -> MatrixBuffer {
        let mut buffer = MatrixBuffer::new(n_rows, n_cols);
        assert!(buffer.allocate());
        for (index, value) in values.iter().enumerate() {
            *buffer.at_mut(index / n_cols, index % n_cols) = *value;
        }
        buffer
    }

    #[test]
    fn starts_unallocated() {
        let mut buffer = MatrixBuffer::new(2, 3);
        assert!(!buffer.is_allocated());
        assert!(buffer.allocate());
        assert!(buffer.is_allocated());
        assert_eq!(buffer.at(1, 2), 0.0);
        buffer.free();
        assert!(!buffer.is_allocated());
    }

    #[test]
    fn add_with_coefficient() {
        let mut target = filled(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let other = filled(2, 2, &[10.0, 10.0, 10.0, 10.0]);
        target.add(&other, -1.0).unwrap();
        assert_eq!(target.at(0, 0), -9.0);
        assert_eq!(target.at(1, 1), -6.0);
    }

    #[test]
    fn add_rejects_size_mismatch() {
        let mut target = filled(2, 2, &[0.0; 4]);
        let other = filled(2, 3, &[0.0; 6]);
        assert!(matches!(
            target.add(&other, 1.0),
            Err(MatrixError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn add_rejects_unallocated_operand() {
        let mut target = filled(2, 2, &[0.0; 4]);
        let other = MatrixBuffer::new(2, 2);
        assert_eq!(target.add(&other, 1.0), Err(MatrixError::NotAllocated));
    }

    #[test]
    fn sum_of_two() {
        let a = filled(1, 3, &[1.0, 2.0, 3.0]);
        let b = filled(1, 3, &[4.0, 5.0, 6.0]);
        let mut target = MatrixBuffer::new(1, 3);
        assert!(target.allocate());
        target.sum(&a, &b, 1.0).unwrap();
        assert_eq!(target.at(0, 2), 9.0);
    }

    #[test]
    fn direct_multiplication() {
        let a = filled(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = filled(2, 2, &[5.0, 6.0, 7.0, 8.0]);
        let mut product = MatrixBuffer::new(2, 2);
        assert!(product.allocate());
        product.mul(&a, &b).unwrap();
        assert_eq!(product.at(0, 0), 19.0);
        assert_eq!(product.at(0, 1), 22.0);
        assert_eq!(product.at(1, 0), 43.0);
        assert_eq!(product.at(1, 1), 50.0);
    }

    #[test]
    fn multiplication_rejects_bad_inner_dimensions() {
        let a = filled(2, 3, &[0.0; 6]);
        let b = filled(2, 2, &[0.0; 4]);
        let mut product = MatrixBuffer::new(2, 2);
        assert!(product.allocate());
        assert_eq!(
            product.mul(&a, &b),
            Err(MatrixError::BadMulDimensions {
                lhs_cols: 3,
                rhs_rows: 2,
            })
        );
    }

    #[test]
    fn window_copy_in_and_out_of_quadrants() {
        let source = filled(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let mut block = MatrixBuffer::new(4, 4);
        assert!(block.allocate());
        block.set_window(&source, 2, 2, 0, 0, 2, 2).unwrap();
        assert_eq!(block.at(2, 2), 1.0);
        assert_eq!(block.at(3, 3), 4.0);
        assert_eq!(block.at(0, 0), 0.0);

        let mut corner = MatrixBuffer::new(1, 1);
        assert!(corner.allocate());
        corner.set_window(&block, 0, 0, 3, 3, 1, 1).unwrap();
        assert_eq!(corner.at(0, 0), 4.0);
    }

    #[test]
    fn window_out_of_bounds_is_rejected() {
        let source = filled(2, 2, &[0.0; 4]);
        let mut target = filled(2, 2, &[0.0; 4]);
        assert!(matches!(
            target.set_window(&source, 1, 1, 0, 0, 2, 2),
            Err(MatrixError::WindowOutOfBounds { .. })
        ));
    }

    #[test]
    fn borrow_takes_over_storage() {
        let mut lender = filled(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let mut target = MatrixBuffer::new(2, 2);
        target.borrow(&mut lender).unwrap();
        assert!(target.is_allocated());
        assert!(!lender.is_allocated());
        assert_eq!(target.at(1, 0), 3.0);
    }

    #[test]
    fn borrow_requires_matching_size() {
        let mut lender = filled(2, 3, &[0.0; 6]);
        let mut target = MatrixBuffer::new(2, 2);
        assert!(matches!(
            target.borrow(&mut lender),
            Err(MatrixError::SizeMismatch { .. })
        ));
    }
}
