// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::ensure_same_shape;
use crate::autograd::BackwardNode;
use crate::error::PureResult;
use crate::tensor::Tensor;
use ndarray::ArrayD;

/// Elementwise `a + b`. Shapes must match exactly.
pub fn add(a: &Tensor, b: &Tensor) -> PureResult<Tensor> {
    ensure_same_shape(&a.shape(), &b.shape())?;
    let y = a.with_data(|lhs| b.with_data(|rhs| lhs + rhs));
    struct Node {
        a: Tensor,
        b: Tensor,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "add"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.a.clone(), self.b.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            Ok(vec![Some(go.clone()), Some(go.clone())])
        }
    }
    Ok(Tensor::from_op(y, &[a, b], || Node {
        a: a.clone(),
        b: b.clone(),
    }))
}

/// Elementwise `a - b`. Shapes must match exactly.
pub fn sub(a: &Tensor, b: &Tensor) -> PureResult<Tensor> {
    ensure_same_shape(&a.shape(), &b.shape())?;
    let y = a.with_data(|lhs| b.with_data(|rhs| lhs - rhs));
    struct Node {
        a: Tensor,
        b: Tensor,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "sub"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.a.clone(), self.b.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            Ok(vec![Some(go.clone()), Some(go.mapv(|g| -g))])
        }
    }
    Ok(Tensor::from_op(y, &[a, b], || Node {
        a: a.clone(),
        b: b.clone(),
    }))
}

/// Elementwise `a * b`. Shapes must match exactly.
pub fn mul(a: &Tensor, b: &Tensor) -> PureResult<Tensor> {
    ensure_same_shape(&a.shape(), &b.shape())?;
    let y = a.with_data(|lhs| b.with_data(|rhs| lhs * rhs));
    struct Node {
        a: Tensor,
        b: Tensor,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "mul"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.a.clone(), self.b.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            let ga = self.b.with_data(|b| go * b);
            let gb = self.a.with_data(|a| go * a);
            Ok(vec![Some(ga), Some(gb)])
        }
    }
    Ok(Tensor::from_op(y, &[a, b], || Node {
        a: a.clone(),
        b: b.clone(),
    }))
}

/// Multiplies every element by a constant.
pub fn scale(x: &Tensor, factor: f32) -> PureResult<Tensor> {
    let y = x.with_data(|data| data.mapv(|v| v * factor));
    struct Node {
        x: Tensor,
        factor: f32,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "scale"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.x.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            let factor = self.factor;
            Ok(vec![Some(go.mapv(|g| g * factor))])
        }
    }
    Ok(Tensor::from_op(y, &[x], || Node {
        x: x.clone(),
        factor,
    }))
}

/// Elementwise `x²`.
pub fn square(x: &Tensor) -> PureResult<Tensor> {
    let y = x.with_data(|data| data.mapv(|v| v * v));
    struct Node {
        x: Tensor,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "square"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.x.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            let gx = self.x.with_data(|x| go * &x.mapv(|v| 2.0 * v));
            Ok(vec![Some(gx)])
        }
    }
    Ok(Tensor::from_op(y, &[x], || Node { x: x.clone() }))
}

/// Elementwise `max(x, 0)`.
pub fn relu(x: &Tensor) -> PureResult<Tensor> {
    let y = x.with_data(|data| data.mapv(|v| if v > 0.0 { v } else { 0.0 }));
    struct Node {
        x: Tensor,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "relu"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.x.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            let mask = self
                .x
                .with_data(|x| x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }));
            Ok(vec![Some(go * &mask)])
        }
    }
    Ok(Tensor::from_op(y, &[x], || Node { x: x.clone() }))
}
