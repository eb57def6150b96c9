// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::Loss;
use hvq_tensor::ops::mse;
use hvq_tensor::{PureResult, Tensor, TensorError};

/// Mean squared error with mean reduction.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanSquaredError;

impl MeanSquaredError {
    pub fn new() -> Self {
        Self
    }
}

impl Loss for MeanSquaredError {
    fn forward(&self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        if prediction.shape() != target.shape() {
            return Err(TensorError::ShapeMismatch {
                left: prediction.shape(),
                right: target.shape(),
            });
        }
        mse(prediction, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mse_forward_backward() {
        let loss = MeanSquaredError::new();
        let prediction = Tensor::from_vec(&[1, 3], vec![0.5, -0.5, 1.0])
            .unwrap()
            .requires_grad(true);
        let target = Tensor::from_vec(&[1, 3], vec![0.0, 0.0, 1.5]).unwrap();
        let value = loss.forward(&prediction, &target).unwrap();
        assert!((value.item().unwrap() - 0.25).abs() < 1e-6);

        value.backward().unwrap();
        let grad: Vec<f32> = prediction.grad().unwrap().iter().copied().collect();
        assert_eq!(grad.len(), 3);
        assert!(grad[0] > 0.0);
        assert!(grad[1] < 0.0);
        assert!(target.grad().is_none());
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let loss = MeanSquaredError::new();
        let err = loss
            .forward(&Tensor::zeros(&[2, 2]), &Tensor::zeros(&[4]))
            .unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }
}
