//! Typed batch inputs
//!
//! Each execution mode has its own batch struct; the ordered feed name
//! lists are kept for callers that wire tensors by name.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{RLError, Result};
use crate::seq::SeqTensor;

/// One batch of complete sessions for train / test / inference.
///
/// Entry `i` of every field describes sequence `i`: the user context
/// vector, the item shown at each position, and the 0/1 click signal
/// at each position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainBatch {
    /// Per-sequence user context features
    pub user_ctx: Vec<Array1<f32>>,
    /// Per-sequence item ids, one per position
    pub item_ids: Vec<Vec<usize>>,
    /// Per-sequence click rewards, one per position
    pub click_id: Vec<Vec<u8>>,
}

impl TrainBatch {
    /// Ordered feed names for callers wiring inputs by name
    pub fn feed_names() -> Vec<String> {
        vec![
            "user_ctx".to_string(),
            "item_ids".to_string(),
            "click_id".to_string(),
        ]
    }

    /// Number of sequences in the batch
    pub fn num_sequences(&self) -> usize {
        self.item_ids.len()
    }

    /// Cumulative position offsets, matching [`SeqTensor`] layout
    pub fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.item_ids.len() + 1);
        offsets.push(0);
        let mut total = 0;
        for seq in &self.item_ids {
            total += seq.len();
            offsets.push(total);
        }
        offsets
    }

    /// Check internal consistency against a model's vocabulary size and
    /// user-context dimension
    pub fn validate(&self, vocab_size: usize, user_dim: usize) -> Result<()> {
        if self.user_ctx.len() != self.item_ids.len() || self.item_ids.len() != self.click_id.len()
        {
            return Err(RLError::Batch(format!(
                "field lengths disagree: {} user_ctx, {} item_ids, {} click_id",
                self.user_ctx.len(),
                self.item_ids.len(),
                self.click_id.len()
            )));
        }
        if self.item_ids.is_empty() {
            return Err(RLError::Batch("empty batch".to_string()));
        }
        for (i, (items, clicks)) in self.item_ids.iter().zip(self.click_id.iter()).enumerate() {
            if items.is_empty() {
                return Err(RLError::Batch(format!("sequence {i} is empty")));
            }
            if items.len() != clicks.len() {
                return Err(RLError::Batch(format!(
                    "sequence {i}: {} items but {} clicks",
                    items.len(),
                    clicks.len()
                )));
            }
            if let Some(&id) = items.iter().find(|&&id| id >= vocab_size) {
                return Err(RLError::Batch(format!(
                    "sequence {i}: item id {id} out of range for vocab {vocab_size}"
                )));
            }
        }
        if let Some((i, ctx)) = self
            .user_ctx
            .iter()
            .enumerate()
            .find(|(_, ctx)| ctx.len() != user_dim)
        {
            return Err(RLError::Batch(format!(
                "sequence {i}: user context has dim {}, model expects {user_dim}",
                ctx.len()
            )));
        }
        Ok(())
    }

    /// Click rewards cast to f32 and multiplied by the reward scale
    pub fn scaled_rewards(&self, scale: f32) -> SeqTensor {
        let sequences: Vec<Vec<f32>> = self
            .click_id
            .iter()
            .map(|seq| seq.iter().map(|&c| f32::from(c) * scale).collect())
            .collect();
        SeqTensor::from_sequences(&sequences)
    }
}

/// User-context inputs for the staged-inference init phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitBatch {
    /// One user context vector per session to initialize
    pub user_ctx: Vec<Array1<f32>>,
}

impl InitBatch {
    /// Ordered feed names for the init phase
    pub fn feed_names() -> Vec<String> {
        vec!["user_ctx".to_string()]
    }

    /// Check user-context dimensions
    pub fn validate(&self, user_dim: usize) -> Result<()> {
        if self.user_ctx.is_empty() {
            return Err(RLError::Batch("empty init batch".to_string()));
        }
        for (i, ctx) in self.user_ctx.iter().enumerate() {
            if ctx.len() != user_dim {
                return Err(RLError::Batch(format!(
                    "row {i}: user context has dim {}, model expects {user_dim}",
                    ctx.len()
                )));
            }
        }
        Ok(())
    }
}

/// One externally-paced step per persisted hidden state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneStepBatch {
    /// Hidden state carried over from init or the previous step, one
    /// row per session
    pub prev_hidden: Array2<f32>,
    /// The single new item consumed by each session
    pub item_ids: Vec<usize>,
}

impl OneStepBatch {
    /// Ordered feed names for the one-step phase
    pub fn feed_names() -> Vec<String> {
        vec!["prev_hidden".to_string(), "item_id".to_string()]
    }

    /// Check row counts, hidden width, and id range
    pub fn validate(&self, vocab_size: usize, hidden_dim: usize) -> Result<()> {
        if self.prev_hidden.nrows() != self.item_ids.len() {
            return Err(RLError::Batch(format!(
                "{} hidden rows but {} item ids",
                self.prev_hidden.nrows(),
                self.item_ids.len()
            )));
        }
        if self.prev_hidden.ncols() != hidden_dim {
            return Err(RLError::DimensionMismatch {
                expected: hidden_dim,
                actual: self.prev_hidden.ncols(),
            });
        }
        if let Some(&id) = self.item_ids.iter().find(|&&id| id >= vocab_size) {
            return Err(RLError::Batch(format!(
                "item id {id} out of range for vocab {vocab_size}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn batch() -> TrainBatch {
        TrainBatch {
            user_ctx: vec![arr1(&[0.1, 0.2]), arr1(&[0.3, 0.4])],
            item_ids: vec![vec![0, 1, 2], vec![2, 0]],
            click_id: vec![vec![0, 1, 0], vec![1, 1]],
        }
    }

    #[test]
    fn valid_batch_passes() {
        assert!(batch().validate(3, 2).is_ok());
    }

    #[test]
    fn rejects_item_click_length_mismatch() {
        let mut b = batch();
        b.click_id[0].pop();
        assert!(matches!(b.validate(3, 2), Err(RLError::Batch(_))));
    }

    #[test]
    fn rejects_out_of_vocab_item() {
        assert!(matches!(batch().validate(2, 2), Err(RLError::Batch(_))));
    }

    #[test]
    fn rejects_wrong_user_dim() {
        assert!(batch().validate(3, 4).is_err());
    }

    #[test]
    fn scaled_rewards_match_layout() {
        let rewards = batch().scaled_rewards(0.01);
        assert_eq!(rewards.offsets(), &[0, 3, 5]);
        assert_eq!(rewards.values().to_vec(), vec![0.0, 0.01, 0.0, 0.01, 0.01]);
    }

    #[test]
    fn onestep_rejects_row_mismatch() {
        let b = OneStepBatch {
            prev_hidden: Array2::zeros((2, 4)),
            item_ids: vec![0],
        };
        assert!(b.validate(3, 4).is_err());
    }
}
