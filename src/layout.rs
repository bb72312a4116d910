//! Byte layout of marshaled tensors
//!
//! Row-major (C order): the last listed dimension is contiguous. The
//! stride table holds one multiplier per dimension except the innermost,
//! so a rank-N index linearizes as
//! `i(N-1) + sum(i_j * strides[j] for j in 0..N-1)`.

use crate::dtype::{ElementType, NativeRepr};
use crate::error::{MarshalError, Result};

/// Computed layout of one argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Vec<usize>,
    native: NativeRepr,
    element_count: usize,
    byte_size: usize,
    strides: Vec<usize>,
}

impl Layout {
    /// Layout of a tensor with the given shape
    ///
    /// An empty shape is a rank-0 tensor holding one element.
    pub fn new(shape: &[usize], dtype: &ElementType) -> Result<Self> {
        if let Some(axis) = shape.iter().position(|&d| d == 0) {
            return Err(MarshalError::InvalidShape(format!(
                "dimension {axis} of {shape:?} is zero"
            )));
        }
        let native = dtype.native();
        let element_count = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| MarshalError::InvalidShape(format!("{shape:?} overflows usize")))?;
        let byte_size = element_count
            .checked_mul(native.size())
            .ok_or_else(|| MarshalError::InvalidShape(format!("{shape:?} overflows usize")))?;

        Ok(Self {
            shape: shape.to_vec(),
            native,
            element_count,
            byte_size,
            strides: stride_table(shape),
        })
    }

    /// Layout of a scalar argument: one element, no shape
    pub fn scalar(dtype: &ElementType) -> Self {
        let native = dtype.native();
        Self {
            shape: Vec::new(),
            native,
            element_count: 1,
            byte_size: native.size(),
            strides: Vec::new(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn native(&self) -> NativeRepr {
        self.native
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Flat element offset of a full index tuple
    pub fn flat_offset(&self, index: &[usize]) -> usize {
        debug_assert_eq!(index.len(), self.rank());
        flat_offset(index, &self.strides)
    }
}

/// Row-major stride table, one entry per non-innermost dimension
///
/// `strides[rank-2] = shape[rank-1]`, `strides[rank-3] = shape[rank-1] * shape[rank-2]`, ...
/// Rank 0 and rank 1 give an empty table.
pub fn stride_table(shape: &[usize]) -> Vec<usize> {
    let rank = shape.len();
    if rank < 2 {
        return Vec::new();
    }
    let mut strides = vec![0; rank - 1];
    let mut running = 1usize;
    for j in (0..rank - 1).rev() {
        running = running.saturating_mul(shape[j + 1]);
        strides[j] = running;
    }
    strides
}

/// Linearize an index tuple against a stride table
///
/// The innermost index is added unscaled; an empty index maps to 0.
pub fn flat_offset(index: &[usize], strides: &[usize]) -> usize {
    match index.split_last() {
        None => 0,
        Some((inner, outer)) => {
            debug_assert_eq!(outer.len(), strides.len());
            outer
                .iter()
                .zip(strides)
                .fold(*inner, |acc, (i, s)| acc + i * s)
        }
    }
}
