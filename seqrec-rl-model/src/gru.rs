//! Pure-ndarray recurrent session Q-network
//!
//! Architecture: an item embedding table, a user-context projection
//! producing the initial hidden state, a GRU cell advancing the hidden
//! state one consumed item at a time, and a linear head mapping the
//! hidden state to per-action Q values.
//!
//! The hidden state before consuming the item at position `t` is the
//! state the Q estimate at `t` is read from, so a full-sequence forward
//! pass is exactly the fold of `infer_init` and repeated
//! `infer_onestep`.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

use seqrec_rl_core::{InitBatch, OneStepBatch, RLError, Result, SeqTensor, TrainBatch};

use crate::network::QNetwork;

/// Dimensions of a [`GruQNetwork`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GruQConfig {
    /// Size of the item/action vocabulary
    pub vocab_size: usize,
    /// Dimension of the user context vector
    pub user_dim: usize,
    /// Width of the item embeddings
    pub embed_dim: usize,
    /// Width of the recurrent hidden state
    pub hidden_dim: usize,
}

impl Default for GruQConfig {
    fn default() -> Self {
        Self {
            vocab_size: 64,
            user_dim: 8,
            embed_dim: 16,
            hidden_dim: 32,
        }
    }
}

impl GruQConfig {
    /// Reject zero-sized dimensions
    pub fn validate(&self) -> Result<()> {
        for (name, dim) in [
            ("vocab_size", self.vocab_size),
            ("user_dim", self.user_dim),
            ("embed_dim", self.embed_dim),
            ("hidden_dim", self.hidden_dim),
        ] {
            if dim == 0 {
                return Err(RLError::Config(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }
}

/// All learnable tensors, in the fixed flattening order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GruParams {
    embed: Array2<f32>,
    w_user: Array2<f32>,
    b_user: Array1<f32>,
    w_z: Array2<f32>,
    u_z: Array2<f32>,
    b_z: Array1<f32>,
    w_r: Array2<f32>,
    u_r: Array2<f32>,
    b_r: Array1<f32>,
    w_h: Array2<f32>,
    u_h: Array2<f32>,
    b_h: Array1<f32>,
    w_out: Array2<f32>,
    b_out: Array1<f32>,
}

fn xavier<R: Rng>(rng: &mut R, rows: usize, cols: usize) -> Array2<f32> {
    let limit = (6.0 / (rows + cols) as f32).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
}

impl GruParams {
    fn init<R: Rng>(config: &GruQConfig, rng: &mut R) -> Self {
        let (v, u, d, h) = (
            config.vocab_size,
            config.user_dim,
            config.embed_dim,
            config.hidden_dim,
        );
        Self {
            embed: xavier(rng, v, d),
            w_user: xavier(rng, u, h),
            b_user: Array1::zeros(h),
            w_z: xavier(rng, d, h),
            u_z: xavier(rng, h, h),
            b_z: Array1::zeros(h),
            w_r: xavier(rng, d, h),
            u_r: xavier(rng, h, h),
            b_r: Array1::zeros(h),
            w_h: xavier(rng, d, h),
            u_h: xavier(rng, h, h),
            b_h: Array1::zeros(h),
            w_out: xavier(rng, h, v),
            b_out: Array1::zeros(v),
        }
    }

    fn zeros(config: &GruQConfig) -> Self {
        let (v, u, d, h) = (
            config.vocab_size,
            config.user_dim,
            config.embed_dim,
            config.hidden_dim,
        );
        Self {
            embed: Array2::zeros((v, d)),
            w_user: Array2::zeros((u, h)),
            b_user: Array1::zeros(h),
            w_z: Array2::zeros((d, h)),
            u_z: Array2::zeros((h, h)),
            b_z: Array1::zeros(h),
            w_r: Array2::zeros((d, h)),
            u_r: Array2::zeros((h, h)),
            b_r: Array1::zeros(h),
            w_h: Array2::zeros((d, h)),
            u_h: Array2::zeros((h, h)),
            b_h: Array1::zeros(h),
            w_out: Array2::zeros((h, v)),
            b_out: Array1::zeros(v),
        }
    }

    fn len(&self) -> usize {
        self.embed.len()
            + self.w_user.len()
            + self.b_user.len()
            + self.w_z.len()
            + self.u_z.len()
            + self.b_z.len()
            + self.w_r.len()
            + self.u_r.len()
            + self.b_r.len()
            + self.w_h.len()
            + self.u_h.len()
            + self.b_h.len()
            + self.w_out.len()
            + self.b_out.len()
    }

    fn flatten(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.embed.iter());
        out.extend(self.w_user.iter());
        out.extend(self.b_user.iter());
        out.extend(self.w_z.iter());
        out.extend(self.u_z.iter());
        out.extend(self.b_z.iter());
        out.extend(self.w_r.iter());
        out.extend(self.u_r.iter());
        out.extend(self.b_r.iter());
        out.extend(self.w_h.iter());
        out.extend(self.u_h.iter());
        out.extend(self.b_h.iter());
        out.extend(self.w_out.iter());
        out.extend(self.b_out.iter());
        out
    }

    fn assign_flat(&mut self, src: &[f32]) -> Result<()> {
        if src.len() != self.len() {
            return Err(RLError::DimensionMismatch {
                expected: self.len(),
                actual: src.len(),
            });
        }
        let mut cursor = 0;
        let mut fill1 = |a: &mut Array1<f32>, cursor: &mut usize| {
            for dst in a.iter_mut() {
                *dst = src[*cursor];
                *cursor += 1;
            }
        };
        let mut fill2 = |a: &mut Array2<f32>, cursor: &mut usize| {
            for dst in a.iter_mut() {
                *dst = src[*cursor];
                *cursor += 1;
            }
        };
        fill2(&mut self.embed, &mut cursor);
        fill2(&mut self.w_user, &mut cursor);
        fill1(&mut self.b_user, &mut cursor);
        fill2(&mut self.w_z, &mut cursor);
        fill2(&mut self.u_z, &mut cursor);
        fill1(&mut self.b_z, &mut cursor);
        fill2(&mut self.w_r, &mut cursor);
        fill2(&mut self.u_r, &mut cursor);
        fill1(&mut self.b_r, &mut cursor);
        fill2(&mut self.w_h, &mut cursor);
        fill2(&mut self.u_h, &mut cursor);
        fill1(&mut self.b_h, &mut cursor);
        fill2(&mut self.w_out, &mut cursor);
        fill1(&mut self.b_out, &mut cursor);
        Ok(())
    }
}

/// Activations of one GRU step, kept for the backward pass
struct GruStep {
    z: Array1<f32>,
    r: Array1<f32>,
    hc: Array1<f32>,
    h: Array1<f32>,
}

fn sigmoid(x: Array1<f32>) -> Array1<f32> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

fn outer(a: ArrayView1<f32>, b: ArrayView1<f32>) -> Array2<f32> {
    let a2 = a.insert_axis(Axis(1));
    let b2 = b.insert_axis(Axis(0));
    a2.dot(&b2)
}

/// Recurrent session Q-network over a fixed item vocabulary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GruQNetwork {
    config: GruQConfig,
    params: GruParams,
}

impl GruQNetwork {
    /// Create with Xavier-initialized weights
    pub fn new(config: GruQConfig) -> Result<Self> {
        Self::from_rng(config, &mut rand::thread_rng())
    }

    /// Create with a deterministic seed
    pub fn new_seeded(config: GruQConfig, seed: u64) -> Result<Self> {
        Self::from_rng(config, &mut StdRng::seed_from_u64(seed))
    }

    fn from_rng<R: Rng>(config: GruQConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let params = GruParams::init(&config, rng);
        Ok(Self { config, params })
    }

    /// Network dimensions
    pub fn config(&self) -> &GruQConfig {
        &self.config
    }

    /// Total number of learnable parameters
    pub fn num_parameters(&self) -> usize {
        self.params.len()
    }

    /// Write config and parameters as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a network written by [`save`](Self::save)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let network: Self = serde_json::from_str(&json)?;
        network.config.validate()?;
        Ok(network)
    }

    fn init_hidden(&self, user_ctx: ArrayView1<f32>) -> Array1<f32> {
        (user_ctx.dot(&self.params.w_user) + &self.params.b_user).mapv(f32::tanh)
    }

    fn gru_step(&self, x: ArrayView1<f32>, h_prev: ArrayView1<f32>) -> GruStep {
        let p = &self.params;
        let z = sigmoid(x.dot(&p.w_z) + h_prev.dot(&p.u_z) + &p.b_z);
        let r = sigmoid(x.dot(&p.w_r) + h_prev.dot(&p.u_r) + &p.b_r);
        let rh = &r * &h_prev.to_owned();
        let hc = (x.dot(&p.w_h) + rh.dot(&p.u_h) + &p.b_h).mapv(f32::tanh);
        let h = &z * &hc + &z.mapv(|v| 1.0 - v) * &h_prev.to_owned();
        GruStep { z, r, hc, h }
    }

    fn q_vec(&self, h: ArrayView1<f32>) -> Array1<f32> {
        h.dot(&self.params.w_out) + &self.params.b_out
    }

    /// Hidden state before each position of each sequence
    fn hidden_states(&self, batch: &TrainBatch) -> Result<Vec<Vec<Array1<f32>>>> {
        batch.validate(self.config.vocab_size, self.config.user_dim)?;
        let mut states = Vec::with_capacity(batch.num_sequences());
        for (user_ctx, items) in batch.user_ctx.iter().zip(batch.item_ids.iter()) {
            let mut h = self.init_hidden(user_ctx.view());
            let mut seq_states = Vec::with_capacity(items.len());
            for &item in items {
                seq_states.push(h.clone());
                let x = self.params.embed.row(item);
                h = self.gru_step(x, h.view()).h;
            }
            states.push(seq_states);
        }
        Ok(states)
    }

    fn q_for_ids(&self, batch: &TrainBatch, ids: &[Vec<usize>]) -> Result<SeqTensor> {
        let states = self.hidden_states(batch)?;
        let mut sequences = Vec::with_capacity(states.len());
        for (seq_states, seq_ids) in states.iter().zip(ids.iter()) {
            let values = seq_states
                .iter()
                .zip(seq_ids.iter())
                .map(|(h, &id)| h.dot(&self.params.w_out.column(id)) + self.params.b_out[id])
                .collect();
            sequences.push(values);
        }
        Ok(SeqTensor::from_sequences(&sequences))
    }

    fn check_ids(&self, batch: &TrainBatch, ids: &[Vec<usize>]) -> Result<()> {
        if ids.len() != batch.num_sequences() {
            return Err(RLError::DimensionMismatch {
                expected: batch.num_sequences(),
                actual: ids.len(),
            });
        }
        for (i, (seq_ids, items)) in ids.iter().zip(batch.item_ids.iter()).enumerate() {
            if seq_ids.len() != items.len() {
                return Err(RLError::Batch(format!(
                    "sequence {i}: {} ids for {} positions",
                    seq_ids.len(),
                    items.len()
                )));
            }
            if let Some(&id) = seq_ids.iter().find(|&&id| id >= self.config.vocab_size) {
                return Err(RLError::Batch(format!(
                    "sequence {i}: id {id} out of range for vocab {}",
                    self.config.vocab_size
                )));
            }
        }
        Ok(())
    }
}

impl QNetwork for GruQNetwork {
    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn user_dim(&self) -> usize {
        self.config.user_dim
    }

    fn hidden_dim(&self) -> usize {
        self.config.hidden_dim
    }

    fn q_taken(&self, batch: &TrainBatch) -> Result<SeqTensor> {
        self.q_for_ids(batch, &batch.item_ids)
    }

    fn q_max(&self, batch: &TrainBatch) -> Result<SeqTensor> {
        let states = self.hidden_states(batch)?;
        let sequences = states
            .iter()
            .map(|seq_states| {
                seq_states
                    .iter()
                    .map(|h| {
                        self.q_vec(h.view())
                            .iter()
                            .fold(f32::NEG_INFINITY, |acc, &q| acc.max(q))
                    })
                    .collect()
            })
            .collect::<Vec<Vec<f32>>>();
        Ok(SeqTensor::from_sequences(&sequences))
    }

    fn q_argmax(&self, batch: &TrainBatch) -> Result<Vec<Vec<usize>>> {
        let states = self.hidden_states(batch)?;
        let ids = states
            .iter()
            .map(|seq_states| {
                seq_states
                    .iter()
                    .map(|h| {
                        let q = self.q_vec(h.view());
                        let mut best = 0;
                        for (i, &v) in q.iter().enumerate() {
                            if v > q[best] {
                                best = i;
                            }
                        }
                        best
                    })
                    .collect()
            })
            .collect();
        Ok(ids)
    }

    fn q_at(&self, batch: &TrainBatch, ids: &[Vec<usize>]) -> Result<SeqTensor> {
        self.check_ids(batch, ids)?;
        self.q_for_ids(batch, ids)
    }

    fn infer_init(&self, batch: &InitBatch) -> Result<Array2<f32>> {
        batch.validate(self.config.user_dim)?;
        let mut hidden = Array2::zeros((batch.user_ctx.len(), self.config.hidden_dim));
        for (i, user_ctx) in batch.user_ctx.iter().enumerate() {
            hidden.row_mut(i).assign(&self.init_hidden(user_ctx.view()));
        }
        Ok(hidden)
    }

    fn infer_onestep(&self, batch: &OneStepBatch) -> Result<(Array2<f32>, Array1<f32>)> {
        batch.validate(self.config.vocab_size, self.config.hidden_dim)?;
        let n = batch.item_ids.len();
        let mut hidden = Array2::zeros((n, self.config.hidden_dim));
        let mut q = Array1::zeros(n);
        for (i, &item) in batch.item_ids.iter().enumerate() {
            let h_prev = batch.prev_hidden.row(i);
            q[i] = h_prev.dot(&self.params.w_out.column(item)) + self.params.b_out[item];
            let x = self.params.embed.row(item);
            hidden.row_mut(i).assign(&self.gru_step(x, h_prev).h);
        }
        Ok((hidden, q))
    }

    fn parameters(&self) -> Vec<f32> {
        self.params.flatten()
    }

    fn set_parameters(&mut self, params: &[f32]) -> Result<()> {
        self.params.assign_flat(params)
    }

    fn backward(&self, batch: &TrainBatch, d_q_taken: &SeqTensor) -> Result<Vec<f32>> {
        batch.validate(self.config.vocab_size, self.config.user_dim)?;
        let offsets = batch.offsets();
        if d_q_taken.offsets() != offsets.as_slice() {
            return Err(RLError::Batch(format!(
                "loss gradient offsets {:?} do not match batch offsets {:?}",
                d_q_taken.offsets(),
                offsets
            )));
        }
        let p = &self.params;
        let mut grads = GruParams::zeros(&self.config);

        for (i, items) in batch.item_ids.iter().enumerate() {
            let user_ctx = &batch.user_ctx[i];
            let h0 = self.init_hidden(user_ctx.view());

            // forward pass, caching per-step activations
            let mut h_prevs = Vec::with_capacity(items.len());
            let mut steps = Vec::with_capacity(items.len());
            let mut h = h0.clone();
            for &item in items {
                h_prevs.push(h.clone());
                let x = p.embed.row(item);
                let step = self.gru_step(x, h.view());
                h = step.h.clone();
                steps.push(step);
            }

            // backprop through time
            let mut dh_next: Array1<f32> = Array1::zeros(self.config.hidden_dim);
            for t in (0..items.len()).rev() {
                let item = items[t];
                let h_prev = &h_prevs[t];
                let step = &steps[t];
                let x = p.embed.row(item);
                let dh_out = dh_next;

                let dhc = &dh_out * &step.z;
                let dz = &dh_out * &(&step.hc - h_prev);
                let mut dh_prev = &dh_out * &step.z.mapv(|z| 1.0 - z);

                let da_h = &dhc * &step.hc.mapv(|v| 1.0 - v * v);
                grads.w_h += &outer(x, da_h.view());
                let rh = &step.r * h_prev;
                grads.u_h += &outer(rh.view(), da_h.view());
                grads.b_h += &da_h;
                let d_rh = da_h.dot(&p.u_h.t());
                let dr = &d_rh * h_prev;
                dh_prev += &(&d_rh * &step.r);

                let da_z = &dz * &step.z.mapv(|z| z * (1.0 - z));
                grads.w_z += &outer(x, da_z.view());
                grads.u_z += &outer(h_prev.view(), da_z.view());
                grads.b_z += &da_z;
                dh_prev += &da_z.dot(&p.u_z.t());

                let da_r = &dr * &step.r.mapv(|r| r * (1.0 - r));
                grads.w_r += &outer(x, da_r.view());
                grads.u_r += &outer(h_prev.view(), da_r.view());
                grads.b_r += &da_r;
                dh_prev += &da_r.dot(&p.u_r.t());

                let dx = da_z.dot(&p.w_z.t()) + da_r.dot(&p.w_r.t()) + da_h.dot(&p.w_h.t());
                let mut embed_row = grads.embed.row_mut(item);
                embed_row += &dx;

                // head contribution at position t
                let dq = d_q_taken.values()[offsets[i] + t];
                let mut out_col = grads.w_out.column_mut(item);
                out_col.scaled_add(dq, h_prev);
                grads.b_out[item] += dq;
                dh_prev.scaled_add(dq, &p.w_out.column(item));

                dh_next = dh_prev;
            }

            // init projection
            let da0 = &dh_next * &h0.mapv(|v| 1.0 - v * v);
            grads.w_user += &outer(user_ctx.view(), da0.view());
            grads.b_user += &da0;
        }

        Ok(grads.flatten())
    }
}
