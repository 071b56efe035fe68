//! The training algorithm
//!
//! One `RLAlgorithm` instance lives for the whole run: the external
//! harness calls [`RLAlgorithm::before_every_batch`] and then one of
//! the execution modes, once per batch.

use tracing::debug;

use seqrec_rl_core::{
    AlgorithmConfig, FetchDict, FetchValue, InitBatch, OneStepBatch, QKind, Result, SeqTensor,
    StepOutput, SyncStrategy, TrainBatch, LOSS_KEY,
};
use seqrec_rl_model::{sync_parameters, QNetwork};

use crate::optim::Optimizer;

/// Fetch key for the current-step Q estimate, in unscaled units
pub const C_Q_KEY: &str = "c_Q";
/// Fetch key for the click reward signal, in unscaled units
pub const CLICK_ID_KEY: &str = "click_id";
/// Fetch key for the persisted hidden state of staged inference
pub const PREV_HIDDEN_KEY: &str = "prev_hidden";

/// Target-network Q-learning / SARSA / double-Q over a session
/// Q-network.
///
/// Owns the online model, a target model refreshed only through
/// parameter sync, the optimizer, and the per-batch step counter.
pub struct RLAlgorithm<M: QNetwork + Clone> {
    model: M,
    target_model: M,
    config: AlgorithmConfig,
    optimizer: Optimizer,
    learn_cnt: usize,
}

impl<M: QNetwork + Clone> RLAlgorithm<M> {
    /// Validate the configuration and take ownership of the online
    /// model; the target model starts as an identical copy.
    pub fn new(model: M, config: AlgorithmConfig) -> Result<Self> {
        config.validate()?;
        let optimizer = Optimizer::from_config(&config);
        let target_model = model.clone();
        Ok(Self {
            model,
            target_model,
            config,
            optimizer,
            learn_cnt: 0,
        })
    }

    /// The online model
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Mutable access to the online model (checkpoint restore,
    /// external sync)
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// The target model
    pub fn target_model(&self) -> &M {
        &self.target_model
    }

    /// The active configuration
    pub fn config(&self) -> &AlgorithmConfig {
        &self.config
    }

    /// Number of completed `before_every_batch` calls
    pub fn learn_cnt(&self) -> usize {
        self.learn_cnt
    }

    fn scaled_rewards(&self, batch: &TrainBatch) -> SeqTensor {
        batch.scaled_rewards(self.config.reward_scale as f32)
    }

    /// The bootstrapped temporal-difference target.
    ///
    /// The next-step value is chosen by the configured [`QKind`],
    /// shifted one position earlier within each sequence with a fill
    /// of 0 (the last position of a sequence gets no continuation
    /// value), discounted, and added to the scaled reward. The result
    /// is a fixed label: no gradient flows through it.
    pub fn target_q(&self, batch: &TrainBatch) -> Result<SeqTensor> {
        let rewards = self.scaled_rewards(batch);
        self.target_q_from(batch, &rewards)
    }

    fn target_q_from(&self, batch: &TrainBatch, rewards: &SeqTensor) -> Result<SeqTensor> {
        let next_q = match self.config.q_kind {
            QKind::QLearning => self.target_model.q_max(batch)?,
            QKind::Sarsa => self.target_model.q_taken(batch)?,
            QKind::DoubleQ => {
                let ids = self.model.q_argmax(batch)?;
                self.target_model.q_at(batch, &ids)?
            }
        };
        let delayed = next_q.delay_one(0.0);
        rewards.add(&delayed.scale(self.config.gamma as f32))
    }

    fn loss_fetches(&self, loss: f32, c_q: &SeqTensor, rewards: &SeqTensor) -> FetchDict {
        let inv_scale = 1.0 / self.config.reward_scale as f32;
        let mut fetch_dict = FetchDict::new();
        // the external parallel-execution harness looks up this exact key
        fetch_dict.insert(LOSS_KEY.to_string(), FetchValue::Scalar(loss));
        fetch_dict.insert(
            C_Q_KEY.to_string(),
            FetchValue::Sequence(c_q.scale(inv_scale)),
        );
        fetch_dict.insert(
            CLICK_ID_KEY.to_string(),
            FetchValue::Sequence(rewards.scale(inv_scale)),
        );
        fetch_dict
    }

    fn forward_loss(&self, batch: &TrainBatch) -> Result<(f32, SeqTensor, SeqTensor, SeqTensor)> {
        let rewards = self.scaled_rewards(batch);
        let c_q = self.model.q_taken(batch)?;
        let target_q = self.target_q_from(batch, &rewards)?;
        let err = c_q.sub(&target_q)?;
        let loss = err.map(|e| e * e).mean();
        Ok((loss, c_q, rewards, err))
    }

    /// Train mode: minimize the mean squared error between the current
    /// Q estimate and the bootstrapped target, then report loss and
    /// rescaled outputs.
    pub fn train(&mut self, batch: &TrainBatch) -> Result<StepOutput> {
        let (loss, c_q, rewards, err) = self.forward_loss(batch)?;

        let d_q = err.scale(2.0 / err.len() as f32);
        let grads = self.model.backward(batch, &d_q)?;
        let mut params = self.model.parameters();
        self.optimizer.step(&mut params, &grads)?;
        self.model.set_parameters(&params)?;
        debug!(loss, step = self.learn_cnt, "train batch");

        Ok(StepOutput::new(self.loss_fetches(loss, &c_q, &rewards)))
    }

    /// Test mode: the train computation without the parameter update,
    /// for offline loss evaluation.
    pub fn test(&self, batch: &TrainBatch) -> Result<StepOutput> {
        let (loss, c_q, rewards, _err) = self.forward_loss(batch)?;
        Ok(StepOutput::new(self.loss_fetches(loss, &c_q, &rewards)))
    }

    /// Inference mode: only the online model's current Q estimate,
    /// rescaled; no target, no loss.
    pub fn inference(&self, batch: &TrainBatch) -> Result<StepOutput> {
        let c_q = self.model.q_taken(batch)?;
        let inv_scale = 1.0 / self.config.reward_scale as f32;
        let mut fetch_dict = FetchDict::new();
        fetch_dict.insert(
            C_Q_KEY.to_string(),
            FetchValue::Sequence(c_q.scale(inv_scale)),
        );
        Ok(StepOutput::new(fetch_dict))
    }

    /// Staged inference, init phase: the initial hidden state from
    /// user context, to be persisted by the caller.
    pub fn infer_init(&self, batch: &InitBatch) -> Result<StepOutput> {
        let hidden = self.model.infer_init(batch)?;
        let mut fetch_dict = FetchDict::new();
        fetch_dict.insert(PREV_HIDDEN_KEY.to_string(), FetchValue::Dense(hidden));
        Ok(StepOutput::with_feeds(InitBatch::feed_names(), fetch_dict))
    }

    /// Staged inference, one-step phase: consume one item per session
    /// and produce the updated hidden state plus the rescaled Q of the
    /// consumed item.
    pub fn infer_onestep(&self, batch: &OneStepBatch) -> Result<StepOutput> {
        let (hidden, q) = self.model.infer_onestep(batch)?;
        let inv_scale = 1.0 / self.config.reward_scale as f32;
        let q_seqs: Vec<Vec<f32>> = q.iter().map(|&v| vec![v * inv_scale]).collect();
        let mut fetch_dict = FetchDict::new();
        fetch_dict.insert(PREV_HIDDEN_KEY.to_string(), FetchValue::Dense(hidden));
        fetch_dict.insert(
            C_Q_KEY.to_string(),
            FetchValue::Sequence(SeqTensor::from_sequences(&q_seqs)),
        );
        Ok(StepOutput::with_feeds(OneStepBatch::feed_names(), fetch_dict))
    }

    /// Per-batch hook, invoked before the batch's gradient step.
    ///
    /// Under [`SyncStrategy::HardReplace`] the target receives a full
    /// parameter copy whenever the counter is divisible by the
    /// interval, including the very first call; every other call is a
    /// no-op. Under [`SyncStrategy::Polyak`] every call mixes the
    /// online parameters into the target.
    pub fn before_every_batch(&mut self) -> Result<()> {
        match self.config.sync {
            SyncStrategy::HardReplace { interval } => {
                if self.learn_cnt % interval == 0 {
                    sync_parameters(&self.model, &mut self.target_model, 1.0)?;
                    debug!(step = self.learn_cnt, "target network refreshed");
                }
            }
            SyncStrategy::Polyak { ratio } => {
                sync_parameters(&self.model, &mut self.target_model, ratio)?;
            }
        }
        self.learn_cnt += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;
    use seqrec_rl_core::{OptimizerKind, RLError};
    use seqrec_rl_model::{GruQConfig, GruQNetwork};

    fn net(seed: u64) -> GruQNetwork {
        GruQNetwork::new_seeded(
            GruQConfig {
                vocab_size: 5,
                user_dim: 3,
                embed_dim: 4,
                hidden_dim: 6,
            },
            seed,
        )
        .unwrap()
    }

    fn batch() -> TrainBatch {
        TrainBatch {
            user_ctx: vec![arr1(&[0.1, -0.2, 0.3]), arr1(&[0.0, 0.5, -0.1])],
            item_ids: vec![vec![0, 3, 1], vec![2, 4]],
            click_id: vec![vec![0, 1, 0], vec![1, 0]],
        }
    }

    fn config(q_kind: QKind) -> AlgorithmConfig {
        AlgorithmConfig {
            q_kind,
            gamma: 0.9,
            ..AlgorithmConfig::default()
        }
    }

    #[test]
    fn new_rejects_invalid_config() {
        let bad = AlgorithmConfig {
            gamma: -0.1,
            ..AlgorithmConfig::default()
        };
        assert!(RLAlgorithm::new(net(1), bad).is_err());
    }

    #[test]
    fn double_q_coincides_with_q_learning_for_identical_models() {
        // a fresh algorithm's target model equals its online model, so
        // online argmax evaluated by the target is exactly the target max
        let model = net(2);
        let dq = RLAlgorithm::new(model.clone(), config(QKind::DoubleQ)).unwrap();
        let ql = RLAlgorithm::new(model, config(QKind::QLearning)).unwrap();
        let b = batch();
        let t_dq = dq.target_q(&b).unwrap();
        let t_ql = ql.target_q(&b).unwrap();
        for (x, y) in t_dq.values().iter().zip(t_ql.values().iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-6);
        }
    }

    #[test]
    fn target_at_last_position_ignores_bootstrap() {
        // clicks [0, 0, 1], gamma 0.9: the delayed next value at the
        // final position is the 0 fill, so the target there is exactly
        // reward_scale * 1 regardless of the bootstrapping policy
        let b = TrainBatch {
            user_ctx: vec![arr1(&[0.2, 0.1, -0.3])],
            item_ids: vec![vec![1, 4, 2]],
            click_id: vec![vec![0, 0, 1]],
        };
        for q_kind in [QKind::QLearning, QKind::Sarsa, QKind::DoubleQ] {
            let algo = RLAlgorithm::new(net(3), config(q_kind)).unwrap();
            let target = algo.target_q(&b).unwrap();
            let last = target.values()[target.len() - 1];
            assert_abs_diff_eq!(last, 0.01, epsilon = 1e-7);
        }
    }

    #[test]
    fn hard_replace_cadence() {
        let mut algo = RLAlgorithm::new(net(5), config(QKind::QLearning)).unwrap();

        // first call (counter 0) copies immediately
        let p0 = algo.model().parameters();
        algo.before_every_batch().unwrap();
        assert_eq!(algo.target_model().parameters(), p0);

        // drift the online model; calls 1..=19 must not touch the target
        let drifted: Vec<f32> = p0.iter().map(|v| v + 1.0).collect();
        algo.model_mut().set_parameters(&drifted).unwrap();
        for _ in 1..20 {
            algo.before_every_batch().unwrap();
            assert_eq!(algo.target_model().parameters(), p0);
        }

        // call 20 copies the drifted parameters
        algo.before_every_batch().unwrap();
        assert_eq!(algo.target_model().parameters(), drifted);
        assert_eq!(algo.learn_cnt(), 21);
    }

    #[test]
    fn polyak_mixes_every_call() {
        let cfg = AlgorithmConfig {
            sync: seqrec_rl_core::SyncStrategy::Polyak { ratio: 0.5 },
            ..config(QKind::QLearning)
        };
        let mut algo = RLAlgorithm::new(net(7), cfg).unwrap();
        let p0 = algo.model().parameters();
        let drifted: Vec<f32> = p0.iter().map(|v| v + 2.0).collect();
        algo.model_mut().set_parameters(&drifted).unwrap();

        algo.before_every_batch().unwrap();
        let mixed = algo.target_model().parameters();
        for i in 0..p0.len() {
            assert_abs_diff_eq!(mixed[i], p0[i] + 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn rescaling_recovers_raw_units() {
        let model = net(11);
        let algo = RLAlgorithm::new(model.clone(), config(QKind::Sarsa)).unwrap();
        let b = batch();
        let out = algo.test(&b).unwrap();

        let raw_q = model.q_taken(&b).unwrap();
        let fetched_q = out.fetch_dict[C_Q_KEY].as_sequence().unwrap();
        for (f, r) in fetched_q.values().iter().zip(raw_q.values().iter()) {
            assert_abs_diff_eq!(*f, r / 0.01, epsilon = 1e-4);
        }

        let fetched_clicks = out.fetch_dict[CLICK_ID_KEY].as_sequence().unwrap();
        let raw_clicks: Vec<f32> = b
            .click_id
            .iter()
            .flatten()
            .map(|&c| f32::from(c))
            .collect();
        for (f, r) in fetched_clicks.values().iter().zip(raw_clicks.iter()) {
            assert_abs_diff_eq!(*f, *r, epsilon = 1e-6);
        }
    }

    #[test]
    fn train_and_test_agree_on_loss() {
        let mut algo = RLAlgorithm::new(net(13), config(QKind::QLearning)).unwrap();
        let b = batch();
        let test_loss = algo.test(&b).unwrap().loss().unwrap();
        let train_loss = algo.train(&b).unwrap().loss().unwrap();
        assert_eq!(test_loss, train_loss);
    }

    #[test]
    fn fetch_dict_order_and_loss_key() {
        let mut algo = RLAlgorithm::new(net(17), config(QKind::QLearning)).unwrap();
        let out = algo.train(&batch()).unwrap();
        let keys: Vec<&str> = out.fetch_dict.keys().map(String::as_str).collect();
        assert_eq!(keys, vec![LOSS_KEY, C_Q_KEY, CLICK_ID_KEY]);
        assert_eq!(keys[0], "loss");
    }

    #[test]
    fn inference_reports_only_c_q() {
        let algo = RLAlgorithm::new(net(19), config(QKind::QLearning)).unwrap();
        let out = algo.inference(&batch()).unwrap();
        assert_eq!(out.fetch_dict.len(), 1);
        assert!(out.fetch_dict.contains_key(C_Q_KEY));
        assert!(out.loss().is_none());
    }

    #[test]
    fn staged_inference_outputs_and_feeds() {
        let model = net(23);
        let algo = RLAlgorithm::new(model.clone(), config(QKind::QLearning)).unwrap();

        let init = InitBatch {
            user_ctx: vec![arr1(&[0.1, -0.2, 0.3])],
        };
        let out = algo.infer_init(&init).unwrap();
        assert_eq!(out.feed_names.as_deref(), Some(&["user_ctx".to_string()][..]));
        let hidden = out.fetch_dict[PREV_HIDDEN_KEY].as_dense().unwrap().clone();
        assert_eq!(hidden.nrows(), 1);

        let step = OneStepBatch {
            prev_hidden: hidden,
            item_ids: vec![2],
        };
        let out = algo.infer_onestep(&step).unwrap();
        assert!(out.feed_names.is_some());
        assert!(out.fetch_dict.contains_key(PREV_HIDDEN_KEY));
        let (_, raw_q) = model.infer_onestep(&step).unwrap();
        let fetched = out.fetch_dict[C_Q_KEY].as_sequence().unwrap();
        assert_abs_diff_eq!(fetched.values()[0], raw_q[0] / 0.01, epsilon = 1e-4);
    }

    #[test]
    fn training_reduces_loss_against_fixed_targets() {
        // gamma 0 makes the target a fixed supervised label, so the
        // loss must fall under repeated updates
        let cfg = AlgorithmConfig {
            gamma: 0.0,
            learning_rate: 0.01,
            optimizer: OptimizerKind::Adam,
            ..AlgorithmConfig::default()
        };
        let mut algo = RLAlgorithm::new(net(29), cfg).unwrap();
        let b = batch();
        let first = algo.test(&b).unwrap().loss().unwrap();
        for _ in 0..200 {
            algo.before_every_batch().unwrap();
            algo.train(&b).unwrap();
        }
        let last = algo.test(&b).unwrap().loss().unwrap();
        assert!(last < first, "loss did not fall: {first} -> {last}");
    }

    #[test]
    fn malformed_batch_yields_typed_error() {
        let mut algo = RLAlgorithm::new(net(31), config(QKind::QLearning)).unwrap();
        let mut b = batch();
        b.click_id[0].pop();
        assert!(matches!(algo.train(&b), Err(RLError::Batch(_))));
    }
}
