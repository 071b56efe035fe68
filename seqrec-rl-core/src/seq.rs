//! Sequence-structured tensors
//!
//! A [`SeqTensor`] is a flat value vector plus cumulative sequence
//! offsets: the batch layout used for variable-length session data.
//! All per-position values of a batch live in one `Array1<f32>`, and
//! `offsets[i]..offsets[i + 1]` delimits sequence `i`.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{RLError, Result};

/// A batch of variable-length f32 sequences in flat layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeqTensor {
    values: Array1<f32>,
    offsets: Vec<usize>,
}

impl SeqTensor {
    /// Build from a flat value vector and cumulative offsets.
    ///
    /// Offsets must start at 0, be non-decreasing, and end at
    /// `values.len()`.
    pub fn new(values: Array1<f32>, offsets: Vec<usize>) -> Result<Self> {
        if offsets.first() != Some(&0) {
            return Err(RLError::Batch(format!(
                "sequence offsets must start at 0, got {:?}",
                offsets.first()
            )));
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(RLError::Batch(
                "sequence offsets must be non-decreasing".to_string(),
            ));
        }
        let last = *offsets.last().unwrap_or(&0);
        if last != values.len() {
            return Err(RLError::DimensionMismatch {
                expected: values.len(),
                actual: last,
            });
        }
        Ok(Self { values, offsets })
    }

    /// Build from per-sequence value vectors
    pub fn from_sequences(sequences: &[Vec<f32>]) -> Self {
        let mut offsets = Vec::with_capacity(sequences.len() + 1);
        offsets.push(0);
        let mut values = Vec::new();
        for seq in sequences {
            values.extend_from_slice(seq);
            offsets.push(values.len());
        }
        Self {
            values: Array1::from_vec(values),
            offsets,
        }
    }

    /// Number of sequences in the batch
    pub fn num_sequences(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Total number of positions across all sequences
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the batch holds no positions at all
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Flat value vector
    pub fn values(&self) -> &Array1<f32> {
        &self.values
    }

    /// Cumulative sequence offsets
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// View of sequence `i`
    pub fn sequence(&self, i: usize) -> ArrayView1<'_, f32> {
        self.values.slice(ndarray::s![self.offsets[i]..self.offsets[i + 1]])
    }

    /// Per-sequence value vectors
    pub fn to_sequences(&self) -> Vec<Vec<f32>> {
        (0..self.num_sequences())
            .map(|i| self.sequence(i).to_vec())
            .collect()
    }

    /// Shift every sequence left by one position: output position `t`
    /// takes the input value at `t + 1`, and the final position of each
    /// sequence takes `fill`. Offsets are preserved.
    pub fn delay_one(&self, fill: f32) -> Self {
        let mut values = self.values.clone();
        for i in 0..self.num_sequences() {
            let (start, end) = (self.offsets[i], self.offsets[i + 1]);
            for t in start..end {
                values[t] = if t + 1 < end { self.values[t + 1] } else { fill };
            }
        }
        Self {
            values,
            offsets: self.offsets.clone(),
        }
    }

    /// Apply `f` to every value
    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Self {
        Self {
            values: self.values.mapv(f),
            offsets: self.offsets.clone(),
        }
    }

    /// Multiply every value by `k`
    pub fn scale(&self, k: f32) -> Self {
        self.map(|v| v * k)
    }

    /// Elementwise combination of two tensors with identical offsets
    pub fn zip_with<F: Fn(f32, f32) -> f32>(&self, other: &Self, f: F) -> Result<Self> {
        if self.values.len() != other.values.len() {
            return Err(RLError::DimensionMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }
        if self.offsets != other.offsets {
            return Err(RLError::Batch(format!(
                "sequence offsets disagree: {:?} vs {:?}",
                self.offsets, other.offsets
            )));
        }
        let values = Array1::from_iter(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(&a, &b)| f(a, b)),
        );
        Ok(Self {
            values,
            offsets: self.offsets.clone(),
        })
    }

    /// Elementwise sum
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| a + b)
    }

    /// Elementwise difference
    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Mean over all positions; 0.0 for an empty batch
    pub fn mean(&self) -> f32 {
        self.values.mean().unwrap_or(0.0)
    }
}
