// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{VqError, VqResult};
use crate::hierarchy::VqVae;
use crate::module::Parameterized;
use crate::vq::validate_commitment;
use hvq_tensor::Tensor;
use tracing::{debug, info};

/// Summary of one optimisation step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepStats {
    pub step: usize,
    pub loss: f32,
    pub final_mse: f32,
    /// Codebook entries revived after this step.
    pub revived: usize,
}

/// Averages over a pass through a batch iterator.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EpochStats {
    pub batches: usize,
    pub average_loss: f32,
    pub average_final_mse: f32,
    pub revived: usize,
}

/// Zero-grad, forward, backward, SGD step; dead codebook entries are revived
/// every `revive_every` steps. Without an explicit commitment the model's own
/// weight is used.
#[derive(Debug, Clone, Copy)]
pub struct VqVaeTrainer {
    learning_rate: f32,
    commitment: Option<f32>,
    revive_every: Option<usize>,
    steps: usize,
}

impl VqVaeTrainer {
    pub fn new(learning_rate: f32) -> VqResult<Self> {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(VqError::config(format!(
                "learning rate must be finite and positive, got {learning_rate}"
            )));
        }
        Ok(Self {
            learning_rate,
            commitment: None,
            revive_every: None,
            steps: 0,
        })
    }

    pub fn with_commitment(mut self, commitment: f32) -> VqResult<Self> {
        self.commitment = Some(validate_commitment(commitment)?);
        Ok(self)
    }

    /// Revives dead entries after every `every`-th step; `0` disables revival.
    pub fn with_revive_every(mut self, every: usize) -> Self {
        self.revive_every = (every > 0).then_some(every);
        self
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn commitment(&self) -> Option<f32> {
        self.commitment
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn step(&mut self, model: &mut VqVae, batch: &Tensor) -> VqResult<StepStats> {
        model.zero_accumulators()?;
        let losses = model.forward(batch, self.commitment)?;
        losses.loss.backward()?;
        model.apply_step(self.learning_rate)?;
        self.steps += 1;

        let revived = match self.revive_every {
            Some(every) if self.steps % every == 0 => model.revive_dead_entries()?,
            _ => 0,
        };
        let stats = StepStats {
            step: self.steps,
            loss: losses.loss.item()?,
            final_mse: losses.final_mse.item()?,
            revived,
        };
        debug!(
            step = stats.step,
            loss = stats.loss,
            final_mse = stats.final_mse,
            revived,
            "vq-vae step"
        );
        Ok(stats)
    }

    /// Runs [`VqVaeTrainer::step`] over every batch.
    pub fn train_epoch<I>(&mut self, model: &mut VqVae, batches: I) -> VqResult<EpochStats>
    where
        I: IntoIterator<Item = Tensor>,
    {
        let mut epoch = EpochStats::default();
        let mut loss_sum = 0.0f32;
        let mut mse_sum = 0.0f32;
        for batch in batches {
            let stats = self.step(model, &batch)?;
            epoch.batches += 1;
            epoch.revived += stats.revived;
            loss_sum += stats.loss;
            mse_sum += stats.final_mse;
        }
        if epoch.batches > 0 {
            epoch.average_loss = loss_sum / epoch.batches as f32;
            epoch.average_final_mse = mse_sum / epoch.batches as f32;
        }
        info!(
            batches = epoch.batches,
            average_loss = epoch.average_loss,
            average_final_mse = epoch.average_final_mse,
            revived = epoch.revived,
            "vq-vae epoch"
        );
        Ok(epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecoderKind, EncoderKind, LevelConfig, VqVaeConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_model() -> VqVae {
        VqVaeConfig {
            commitment: 0.25,
            levels: vec![LevelConfig {
                encoder: EncoderKind::Half,
                decoder: DecoderKind::Half,
                in_channels: 1,
                latent_channels: 2,
                num_latents: 4,
                dead_rate: 1,
                seed: Some(3),
            }],
        }
        .build()
        .unwrap()
    }

    #[test]
    fn rejects_bad_hyperparameters() {
        assert!(VqVaeTrainer::new(0.0).is_err());
        assert!(VqVaeTrainer::new(f32::INFINITY).is_err());
        assert!(VqVaeTrainer::new(0.1).unwrap().with_commitment(-1.0).is_err());
        assert!(tiny_model().with_commitment(f32::NAN).is_err());
    }

    #[test]
    fn step_updates_parameters_and_clears_gradients() {
        let mut model = tiny_model();
        let before = model.state_dict().unwrap();
        let mut trainer = VqVaeTrainer::new(0.05).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let batch = Tensor::randn(&[2, 1, 4, 4], &mut rng);
        let stats = trainer.step(&mut model, &batch).unwrap();
        assert_eq!(stats.step, 1);
        assert!(stats.loss.is_finite());

        let after = model.state_dict().unwrap();
        let changed = before
            .iter()
            .filter(|(name, tensor)| tensor.to_vec() != after[*name].to_vec())
            .count();
        assert!(changed > 0);
        model
            .visit_parameters(&mut |param| {
                assert!(param.gradient().is_none(), "{}", param.name());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn model_commitment_applies_unless_overridden() {
        let batch = Tensor::randn(&[2, 1, 4, 4], &mut StdRng::seed_from_u64(5));
        let expected = |commitment: f32| {
            let model = tiny_model().with_commitment(commitment).unwrap();
            model.forward(&batch, None).unwrap().loss.item().unwrap()
        };

        let mut model = tiny_model().with_commitment(3.0).unwrap();
        let mut trainer = VqVaeTrainer::new(0.01).unwrap();
        assert_eq!(trainer.commitment(), None);
        let stats = trainer.step(&mut model, &batch).unwrap();
        assert_eq!(stats.loss, expected(3.0));

        let mut model = tiny_model().with_commitment(3.0).unwrap();
        let mut trainer = VqVaeTrainer::new(0.01).unwrap().with_commitment(0.0).unwrap();
        let stats = trainer.step(&mut model, &batch).unwrap();
        assert_eq!(stats.loss, expected(0.0));
    }

    #[test]
    fn revival_runs_on_schedule() {
        let mut model = tiny_model();
        let mut trainer = VqVaeTrainer::new(0.01).unwrap().with_revive_every(2);
        let batch = Tensor::zeros(&[1, 1, 2, 2]);
        let first = trainer.step(&mut model, &batch).unwrap();
        assert_eq!(first.revived, 0);
        let epoch = trainer
            .train_epoch(&mut model, vec![batch.clone(), batch])
            .unwrap();
        assert_eq!(epoch.batches, 2);
        assert_eq!(trainer.steps(), 3);
        assert!(epoch.average_loss.is_finite());
    }
}
