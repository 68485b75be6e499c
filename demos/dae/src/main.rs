//! Trains a denoising autoencoder on synthetic binary patterns with a
//! plain gradient-descent loop, then reconstructs held-out rows.
//!
//! The library deliberately stops at `params()` and `train_cost()`; the
//! loop below is the "external optimizer" those accessors exist for.

use anyhow::{Context, Result};
use layergraph::graph::Function;
use layergraph::layer::DenoisingAutoencoder;
use layergraph::model::Model;
use ndarray::{ArrayD, Axis, IxDyn, Slice};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::info;

const INPUT_SIZE: usize = 64;
const HIDDEN_SIZE: usize = 32;
const ROWS: usize = 256;
const BATCH_SIZE: usize = 32;
const EPOCHS: usize = 30;
const LEARNING_RATE: f32 = 0.5;

/// A few binary prototypes with independent bit flips, standing in for a
/// real dataset.
fn synthetic_patterns(rng: &mut SmallRng) -> ArrayD<f32> {
    let prototypes: Vec<Vec<f32>> = (0..4)
        .map(|_| {
            (0..INPUT_SIZE)
                .map(|_| if rng.gen_bool(0.5) { 1.0 } else { 0.0 })
                .collect()
        })
        .collect();
    ArrayD::from_shape_fn(IxDyn(&[ROWS, INPUT_SIZE]), |ix| {
        let bit = prototypes[ix[0] % prototypes.len()][ix[1]];
        if rand::thread_rng().gen_bool(0.05) {
            1.0 - bit
        } else {
            bit
        }
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let mut rng = SmallRng::seed_from_u64(0xDAE);
    let data = synthetic_patterns(&mut rng);

    let dae = DenoisingAutoencoder::builder()
        .input_size(INPUT_SIZE)
        .hidden_size(HIDDEN_SIZE)
        .corruption_level(0.3)
        .build()?;
    let params = dae.params();
    let train_cost = dae
        .train_cost()
        .context("the autoencoder defines a training cost")?;
    let cost_fn = Function::new(dae.inputs(), vec![train_cost])?;

    for epoch in 0..EPOCHS {
        let mut total = 0.0;
        let mut batches = 0;
        for start in (0..ROWS).step_by(BATCH_SIZE) {
            let batch = data
                .slice_axis(Axis(0), Slice::from(start..start + BATCH_SIZE))
                .to_owned();
            let (cost, grads) = cost_fn.grad(&[batch], &params)?;
            for (param, grad) in params.iter().zip(&grads) {
                param.update(|value| value.scaled_add(-LEARNING_RATE, grad));
            }
            total += cost;
            batches += 1;
        }
        info!(epoch, cost = total / batches as f32, "epoch finished");
    }

    let held_out = data.slice_axis(Axis(0), Slice::from(0..8)).to_owned();
    let reconstruction = dae.predict(&held_out)?;
    let error = (&reconstruction - &held_out).mapv(f32::abs).mean().unwrap_or(f32::NAN);
    info!(mean_abs_error = error, "reconstruction of held-out rows");
    Ok(())
}
