// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::autograd::BackwardNode;
use crate::error::{PureResult, TensorError};
use crate::tensor::Tensor;
use ndarray::{ArrayD, IxDyn};

fn reduce_scaled(x: &Tensor, factor: f32, name: &'static str) -> PureResult<Tensor> {
    let total: f32 = x.with_data(|data| data.iter().copied().sum());
    let y = ArrayD::from_elem(IxDyn(&[]), total * factor);
    struct Node {
        x: Tensor,
        factor: f32,
        name: &'static str,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            self.name
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.x.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            let upstream: f32 = go.iter().copied().sum();
            let shape = self.x.shape();
            Ok(vec![Some(ArrayD::from_elem(
                IxDyn(&shape),
                upstream * self.factor,
            ))])
        }
    }
    Ok(Tensor::from_op(y, &[x], || Node {
        x: x.clone(),
        factor,
        name,
    }))
}

/// Sum of every element, as a rank-0 tensor.
pub fn sum(x: &Tensor) -> PureResult<Tensor> {
    reduce_scaled(x, 1.0, "sum")
}

/// Mean of every element, as a rank-0 tensor.
pub fn mean(x: &Tensor) -> PureResult<Tensor> {
    let len = x.len();
    if len == 0 {
        return Err(TensorError::EmptyInput("mean input"));
    }
    reduce_scaled(x, 1.0 / len as f32, "mean")
}

/// Mean squared error between two tensors of identical shape.
pub fn mse(prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
    mean(&prediction.sub(target)?.square()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_spreads_gradient_evenly() {
        let x = Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 6.0])
            .unwrap()
            .requires_grad(true);
        let m = mean(&x).unwrap();
        assert!(m.shape().is_empty());
        assert!((m.item().unwrap() - 3.0).abs() < 1e-6);
        m.backward().unwrap();
        assert!(x.grad().unwrap().iter().all(|g| (*g - 0.25).abs() < 1e-6));
    }

    #[test]
    fn mse_matches_hand_computation() {
        let prediction = Tensor::from_vec(&[3], vec![0.5, -0.5, 1.0])
            .unwrap()
            .requires_grad(true);
        let target = Tensor::from_vec(&[3], vec![0.0, 0.0, 1.5]).unwrap();
        let value = mse(&prediction, &target).unwrap();
        assert!((value.item().unwrap() - 0.25).abs() < 1e-6);
        value.backward().unwrap();
        let grad: Vec<f32> = prediction.grad().unwrap().iter().copied().collect();
        let expected = [1.0 / 3.0, -1.0 / 3.0, -1.0 / 3.0];
        for (g, e) in grad.iter().zip(expected) {
            assert!((g - e).abs() < 1e-6);
        }
    }

    #[test]
    fn mean_of_empty_tensor_fails() {
        assert_eq!(
            mean(&Tensor::zeros(&[0])).unwrap_err(),
            TensorError::EmptyInput("mean input")
        );
    }
}
