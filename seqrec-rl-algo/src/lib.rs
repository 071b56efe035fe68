//! Target-network Q-learning / SARSA / double-Q trainer for
//! sequential recommendation.
//!
//! [`RLAlgorithm`] is a thin orchestration layer over a
//! [`QNetwork`](seqrec_rl_model::QNetwork): it composes model outputs
//! into a temporal-difference loss or a prediction, steps a flat-vector
//! optimizer, and refreshes a target network on a fixed cadence. The
//! external training harness owns batching, parallelism, and the call
//! order (`before_every_batch` first, then `train`).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod algorithm;
pub mod optim;

pub use algorithm::RLAlgorithm;
pub use optim::{Adam, Optimizer, Sgd};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{Optimizer, RLAlgorithm};
    pub use seqrec_rl_core::prelude::*;
    pub use seqrec_rl_model::{GruQConfig, GruQNetwork, QNetwork};
}
