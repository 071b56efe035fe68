//! Ordered fetch dictionaries
//!
//! Every public algorithm method returns a [`StepOutput`]: an ordered
//! name-to-tensor mapping plus, for the staged-inference modes, the
//! ordered list of required feed names.

use indexmap::IndexMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::seq::SeqTensor;

/// Key under which train and test publish the scalar loss.
///
/// The external parallel-execution harness looks this name up; it must
/// never be renamed.
pub const LOSS_KEY: &str = "loss";

/// A fetched output tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FetchValue {
    /// A single scalar, e.g. the batch loss
    Scalar(f32),
    /// A per-position value in sequence layout
    Sequence(SeqTensor),
    /// A dense matrix, e.g. a batch of hidden states
    Dense(Array2<f32>),
}

impl FetchValue {
    /// The scalar value, if this is a scalar
    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Self::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// The sequence tensor, if this is one
    pub fn as_sequence(&self) -> Option<&SeqTensor> {
        match self {
            Self::Sequence(t) => Some(t),
            _ => None,
        }
    }

    /// The dense matrix, if this is one
    pub fn as_dense(&self) -> Option<&Array2<f32>> {
        match self {
            Self::Dense(m) => Some(m),
            _ => None,
        }
    }
}

/// Ordered mapping from output name to fetched tensor
pub type FetchDict = IndexMap<String, FetchValue>;

/// Result of one algorithm invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Ordered list of required input field names; present only for
    /// the staged-inference modes
    pub feed_names: Option<Vec<String>>,
    /// Ordered name-to-tensor outputs
    pub fetch_dict: FetchDict,
}

impl StepOutput {
    /// Output without feed names (train / test / inference)
    pub fn new(fetch_dict: FetchDict) -> Self {
        Self {
            feed_names: None,
            fetch_dict,
        }
    }

    /// Output carrying feed names (staged inference)
    pub fn with_feeds(feed_names: Vec<String>, fetch_dict: FetchDict) -> Self {
        Self {
            feed_names: Some(feed_names),
            fetch_dict,
        }
    }

    /// The scalar stored under [`LOSS_KEY`], if present
    pub fn loss(&self) -> Option<f32> {
        self.fetch_dict.get(LOSS_KEY).and_then(FetchValue::as_scalar)
    }
}
