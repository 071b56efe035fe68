//! Q-network contract and a concrete recurrent session Q-network.
//!
//! The [`QNetwork`] trait is the model contract the algorithm layer
//! orchestrates against: sequence forward passes keyed by a typed
//! output selector, staged inference, flat parameter access, and an
//! analytic backward pass. [`GruQNetwork`] is a pure-ndarray
//! implementation: item embeddings, a user-context projection for the
//! initial hidden state, a GRU cell, and a linear Q head.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod gru;
pub mod network;

pub use gru::{GruQConfig, GruQNetwork};
pub use network::{sync_parameters, QNetwork};
