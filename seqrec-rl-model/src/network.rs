//! The model contract consumed by the algorithm layer

use ndarray::{Array1, Array2};

use seqrec_rl_core::{InitBatch, OneStepBatch, RLError, Result, SeqTensor, TrainBatch};

/// A session Q-network: per-position Q estimates over a fixed action
/// vocabulary, staged inference, and flat parameter access.
///
/// Q at position `t` is always the estimate from the hidden state
/// *before* the item at `t` is consumed.
pub trait QNetwork: Send {
    /// Size of the action vocabulary
    fn vocab_size(&self) -> usize;

    /// Dimension of the user context vector
    fn user_dim(&self) -> usize;

    /// Width of the recurrent hidden state
    fn hidden_dim(&self) -> usize;

    /// Q of the action actually taken at each position ("c_Q")
    fn q_taken(&self, batch: &TrainBatch) -> Result<SeqTensor>;

    /// Max over actions at each position ("max_Q")
    fn q_max(&self, batch: &TrainBatch) -> Result<SeqTensor>;

    /// Argmax action ids at each position (double-Q action selection)
    fn q_argmax(&self, batch: &TrainBatch) -> Result<Vec<Vec<usize>>>;

    /// Q of externally chosen action ids at each position (double-Q
    /// action evaluation)
    fn q_at(&self, batch: &TrainBatch, ids: &[Vec<usize>]) -> Result<SeqTensor>;

    /// Initial hidden state from user context, one row per session
    fn infer_init(&self, batch: &InitBatch) -> Result<Array2<f32>>;

    /// Advance each session by one consumed item: returns the updated
    /// hidden states and the Q of each consumed item
    fn infer_onestep(&self, batch: &OneStepBatch) -> Result<(Array2<f32>, Array1<f32>)>;

    /// Flat parameter vector in a fixed order
    fn parameters(&self) -> Vec<f32>;

    /// Overwrite all parameters from a flat vector
    fn set_parameters(&mut self, params: &[f32]) -> Result<()>;

    /// Gradient of a scalar loss w.r.t. the flat parameters, given the
    /// loss gradient at each position's taken-action Q
    fn backward(&self, batch: &TrainBatch, d_q_taken: &SeqTensor) -> Result<Vec<f32>>;
}

/// Mix the source network's parameters into the target:
/// `target <- ratio * source + (1 - ratio) * target`.
///
/// Ratio 1.0 is a full copy; small ratios give the exponential
/// moving-average update.
pub fn sync_parameters<M: QNetwork + ?Sized>(source: &M, target: &mut M, ratio: f64) -> Result<()> {
    let src = source.parameters();
    let mut dst = target.parameters();
    if src.len() != dst.len() {
        return Err(RLError::DimensionMismatch {
            expected: src.len(),
            actual: dst.len(),
        });
    }
    let ratio = ratio as f32;
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d = ratio * s + (1.0 - ratio) * *d;
    }
    target.set_parameters(&dst)
}
