//! Train a small session Q-network on synthetic click data and walk a
//! session through staged inference.
//!
//! Run with `RUST_LOG=debug` to see per-batch losses and target
//! refreshes.

use anyhow::Result;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use seqrec_rl_algo::RLAlgorithm;
use seqrec_rl_core::{AlgorithmConfig, InitBatch, OneStepBatch, QKind, TrainBatch};
use seqrec_rl_model::{GruQConfig, GruQNetwork};

fn synthetic_batch(rng: &mut StdRng, vocab: usize, user_dim: usize) -> TrainBatch {
    let num_seqs = 8;
    let mut user_ctx = Vec::with_capacity(num_seqs);
    let mut item_ids = Vec::with_capacity(num_seqs);
    let mut click_id = Vec::with_capacity(num_seqs);
    for _ in 0..num_seqs {
        let len = rng.gen_range(3..8);
        user_ctx.push(Array1::from_shape_fn(user_dim, |_| rng.gen_range(-1.0..1.0)));
        let items: Vec<usize> = (0..len).map(|_| rng.gen_range(0..vocab)).collect();
        // clicks favor low item ids so there is something to learn
        let clicks = items
            .iter()
            .map(|&id| u8::from(rng.gen::<f32>() < 0.8 / (1.0 + id as f32)))
            .collect();
        item_ids.push(items);
        click_id.push(clicks);
    }
    TrainBatch {
        user_ctx,
        item_ids,
        click_id,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let net_config = GruQConfig {
        vocab_size: 20,
        user_dim: 4,
        embed_dim: 8,
        hidden_dim: 16,
    };
    let model = GruQNetwork::new(net_config)?;
    let config = AlgorithmConfig {
        q_kind: QKind::DoubleQ,
        gamma: 0.9,
        learning_rate: 1e-2,
        ..AlgorithmConfig::default()
    };
    let mut algo = RLAlgorithm::new(model, config)?;

    let mut rng = StdRng::seed_from_u64(42);
    for epoch in 0..50 {
        let batch = synthetic_batch(&mut rng, 20, 4);
        algo.before_every_batch()?;
        let out = algo.train(&batch)?;
        if epoch % 10 == 0 {
            println!("epoch {epoch:3}  loss {:.6}", out.loss().unwrap_or(f32::NAN));
        }
    }

    // held-out evaluation
    let eval = synthetic_batch(&mut rng, 20, 4);
    let out = algo.test(&eval)?;
    println!("eval loss {:.6}", out.loss().unwrap_or(f32::NAN));

    // staged inference: persist hidden state across externally paced steps
    let init = InitBatch {
        user_ctx: vec![Array1::from_vec(vec![0.2, -0.1, 0.4, 0.0])],
    };
    let mut hidden = algo
        .infer_init(&init)?
        .fetch_dict["prev_hidden"]
        .as_dense()
        .expect("init emits a hidden state")
        .clone();
    for &item in &[3usize, 1, 7] {
        let out = algo.infer_onestep(&OneStepBatch {
            prev_hidden: hidden.clone(),
            item_ids: vec![item],
        })?;
        let q = out.fetch_dict["c_Q"].as_sequence().expect("onestep emits c_Q");
        println!("item {item}: Q = {:.4}", q.values()[0]);
        hidden = out.fetch_dict["prev_hidden"]
            .as_dense()
            .expect("onestep emits a hidden state")
            .clone();
    }

    Ok(())
}
