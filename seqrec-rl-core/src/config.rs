//! Algorithm configuration
//!
//! Every closed choice is a tagged enum with exhaustive matching, and
//! configuration is validated once at construction with a typed error.

use serde::{Deserialize, Serialize};

use crate::error::{RLError, Result};

/// Bootstrapping policy for the temporal-difference target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QKind {
    /// Next value is the target model's max-Q
    QLearning,
    /// Next value is the target model's Q for the action actually taken
    Sarsa,
    /// Action chosen by the online model, evaluated by the target model
    DoubleQ,
}

/// Optimizer selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Adam with a fixed epsilon
    Adam,
    /// Plain stochastic gradient descent
    Sgd,
}

/// Target-network refresh policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Full parameter copy every `interval` batches (including the
    /// first batch at counter 0); all other batches are no-ops
    HardReplace {
        /// Number of batches between full copies
        interval: usize,
    },
    /// Exponential moving average: every batch mixes
    /// `ratio * online + (1 - ratio) * target` into the target
    Polyak {
        /// Mixing ratio in [0, 1]
        ratio: f64,
    },
}

impl Default for SyncStrategy {
    fn default() -> Self {
        Self::HardReplace { interval: 20 }
    }
}

/// Configuration for [`RLAlgorithm`](https://docs.rs/seqrec-rl-algo)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    /// Optimizer selector
    pub optimizer: OptimizerKind,
    /// Learning rate
    pub learning_rate: f64,
    /// Discount factor
    pub gamma: f64,
    /// Bootstrapping policy
    pub q_kind: QKind,
    /// Target-network refresh policy
    pub sync: SyncStrategy,
    /// Factor applied to the click reward before use; outputs are
    /// divided by it again so externally reported units are unchanged
    pub reward_scale: f64,
    /// Epsilon for the Adam optimizer
    pub adam_epsilon: f64,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Adam,
            learning_rate: 1e-3,
            gamma: 0.99,
            q_kind: QKind::QLearning,
            sync: SyncStrategy::default(),
            reward_scale: 0.01,
            adam_epsilon: 1e-4,
        }
    }
}

impl AlgorithmConfig {
    /// Validate the configuration, returning a typed error on the
    /// first violated constraint
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(RLError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(RLError::Config(format!(
                "gamma must be in [0, 1], got {}",
                self.gamma
            )));
        }
        if !(self.reward_scale > 0.0) {
            return Err(RLError::Config(format!(
                "reward_scale must be positive, got {}",
                self.reward_scale
            )));
        }
        if !(self.adam_epsilon > 0.0) {
            return Err(RLError::Config(format!(
                "adam_epsilon must be positive, got {}",
                self.adam_epsilon
            )));
        }
        match self.sync {
            SyncStrategy::HardReplace { interval } => {
                if interval == 0 {
                    return Err(RLError::Config(
                        "hard_replace interval must be at least 1".to_string(),
                    ));
                }
            }
            SyncStrategy::Polyak { ratio } => {
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(RLError::Config(format!(
                        "polyak ratio must be in [0, 1], got {ratio}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AlgorithmConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_gamma() {
        let config = AlgorithmConfig {
            gamma: 1.5,
            ..AlgorithmConfig::default()
        };
        assert!(matches!(config.validate(), Err(RLError::Config(_))));
    }

    #[test]
    fn rejects_zero_learning_rate() {
        let config = AlgorithmConfig {
            learning_rate: 0.0,
            ..AlgorithmConfig::default()
        };
        assert!(matches!(config.validate(), Err(RLError::Config(_))));
    }

    #[test]
    fn rejects_zero_sync_interval() {
        let config = AlgorithmConfig {
            sync: SyncStrategy::HardReplace { interval: 0 },
            ..AlgorithmConfig::default()
        };
        assert!(matches!(config.validate(), Err(RLError::Config(_))));
    }

    #[test]
    fn rejects_out_of_range_polyak_ratio() {
        let config = AlgorithmConfig {
            sync: SyncStrategy::Polyak { ratio: 1.2 },
            ..AlgorithmConfig::default()
        };
        assert!(matches!(config.validate(), Err(RLError::Config(_))));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = AlgorithmConfig {
            q_kind: QKind::DoubleQ,
            sync: SyncStrategy::Polyak { ratio: 0.01 },
            ..AlgorithmConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: AlgorithmConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
