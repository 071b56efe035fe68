//! Core types for target-network Q-learning over sequential
//! recommendation batches.
//!
//! This crate provides the shared vocabulary of the workspace:
//! sequence-structured tensors, batch types, ordered fetch
//! dictionaries, configuration enums, and the error taxonomy.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod config;
pub mod error;
pub mod fetch;
pub mod seq;

pub use batch::{InitBatch, OneStepBatch, TrainBatch};
pub use config::{AlgorithmConfig, OptimizerKind, QKind, SyncStrategy};
pub use error::{RLError, Result};
pub use fetch::{FetchDict, FetchValue, StepOutput, LOSS_KEY};
pub use seq::SeqTensor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AlgorithmConfig, FetchDict, FetchValue, InitBatch, OneStepBatch, OptimizerKind, QKind,
        RLError, Result, SeqTensor, StepOutput, SyncStrategy, TrainBatch,
    };
}
