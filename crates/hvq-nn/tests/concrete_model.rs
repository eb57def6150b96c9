// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use hvq_nn::{
    load_bincode, save_bincode, DecoderKind, EncoderKind, LevelConfig, Parameterized, Tensor,
    VqVae, VqVaeConfig, VqVaeTrainer,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::tempdir;

fn small_config(seed: u64) -> VqVaeConfig {
    VqVaeConfig {
        levels: vec![
            LevelConfig {
                encoder: EncoderKind::Quarter,
                decoder: DecoderKind::HalfQuarter,
                in_channels: 3,
                latent_channels: 4,
                num_latents: 8,
                seed: Some(seed),
                ..LevelConfig::default()
            },
            LevelConfig {
                encoder: EncoderKind::Half,
                decoder: DecoderKind::Half,
                in_channels: 4,
                latent_channels: 4,
                num_latents: 8,
                seed: Some(seed + 10),
                ..LevelConfig::default()
            },
        ],
        ..VqVaeConfig::default()
    }
}

fn images(seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    Tensor::randn(&[2, 3, 8, 8], &mut rng)
}

#[test]
fn two_level_model_produces_codes_at_each_scale() {
    let model = small_config(1).build().unwrap();
    let codes = model.encode_indices(&images(2)).unwrap();
    assert_eq!(codes.len(), 2);
    assert_eq!(codes[0].dim(), (2, 2, 2));
    assert_eq!(codes[1].dim(), (2, 1, 1));
    assert!(codes.iter().flatten().all(|&index| index < 8));

    let decoded = model.decode_indices(&codes).unwrap();
    assert_eq!(decoded.shape(), vec![2, 3, 8, 8]);
}

#[test]
fn full_reconstructions_match_the_input_shape() {
    let model = small_config(3).build().unwrap();
    let x = images(4);
    let before = model.encoders()[0].quantizer().usage_counts();
    let reconstructions = model.full_reconstructions(&x).unwrap();
    assert_eq!(reconstructions.len(), 2);
    for reconstruction in &reconstructions {
        assert_eq!(reconstruction.shape(), x.shape());
    }
    assert_eq!(model.encoders()[0].quantizer().usage_counts(), before);
}

#[test]
fn trainer_step_updates_parameters() {
    let mut model = small_config(5).build().unwrap();
    let before = model.state_dict().unwrap();
    let mut trainer = VqVaeTrainer::new(0.05).unwrap();
    let stats = trainer.step(&mut model, &images(6)).unwrap();
    assert_eq!(stats.step, 1);
    assert!(stats.loss.is_finite());
    assert!(stats.final_mse <= stats.loss);

    let after = model.state_dict().unwrap();
    let codebook = "encoder0::vq::codebook";
    assert_ne!(before[codebook].to_vec(), after[codebook].to_vec());
}

#[test]
fn checkpoint_restores_identical_codes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.bin");
    let trained = small_config(7).build().unwrap();
    save_bincode(&trained, &path).unwrap();

    let mut restored: VqVae = small_config(99).build().unwrap();
    load_bincode(&mut restored, &path).unwrap();

    let x = images(8);
    assert_eq!(
        trained.encode_indices(&x).unwrap(),
        restored.encode_indices(&x).unwrap()
    );
    let expected = trained.forward(&x, None).unwrap().loss.item().unwrap();
    let got = restored.forward(&x, None).unwrap().loss.item().unwrap();
    assert_eq!(expected, got);
}
