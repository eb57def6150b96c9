// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Autograd core: the node trait, the shared node handle, and the engine.

use crate::error::{PureResult, TensorError};
use crate::tensor::Tensor;
use ndarray::ArrayD;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Ops implement this trait to participate in backprop.
pub trait BackwardNode {
    fn name(&self) -> &'static str;

    /// Inputs of the op, in the order `backward` reports their gradients.
    fn parents(&self) -> Vec<Tensor>;

    /// Maps the gradient of the output onto one gradient per parent.
    /// `None` means the parent receives nothing from this op.
    fn backward(&self, grad_output: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>>;
}

/// Shared handle to a recorded op.
#[derive(Clone)]
pub struct GradFn(Rc<dyn BackwardNode>);

impl GradFn {
    pub fn new<N: BackwardNode + 'static>(node: N) -> Self {
        GradFn(Rc::new(node))
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    #[inline]
    pub fn parents(&self) -> Vec<Tensor> {
        self.0.parents()
    }

    #[inline]
    pub fn backward(&self, grad_output: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
        self.0.backward(grad_output)
    }
}

/// Tracked tensors reachable from `root`, inputs before consumers.
fn topological_order(root: &Tensor) -> Vec<Tensor> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(root.clone(), false)];
    while let Some((tensor, expanded)) = stack.pop() {
        if expanded {
            order.push(tensor);
            continue;
        }
        if !visited.insert(tensor.id()) {
            continue;
        }
        let parents = tensor
            .grad_fn()
            .map(|node| node.parents())
            .unwrap_or_default();
        stack.push((tensor, true));
        for parent in parents {
            if parent.is_tracked() && !visited.contains(&parent.id()) {
                stack.push((parent, false));
            }
        }
    }
    order
}

/// Propagates `seed` from `root` through the recorded graph.
///
/// Every tracked tensor on the way accumulates its gradient, so repeated calls
/// sum their contributions until the caller clears them.
pub fn run_backward(root: &Tensor, seed: ArrayD<f32>) -> PureResult<()> {
    if seed.shape() != root.shape().as_slice() {
        return Err(TensorError::shapes(seed.shape(), &root.shape()));
    }
    if !root.is_tracked() {
        return Ok(());
    }

    let order = topological_order(root);
    let mut pending: HashMap<usize, ArrayD<f32>> = HashMap::new();
    pending.insert(root.id(), seed);

    for tensor in order.iter().rev() {
        let Some(grad) = pending.remove(&tensor.id()) else {
            continue;
        };
        if let Some(node) = tensor.grad_fn() {
            let parents = node.parents();
            let grads = node.backward(&grad)?;
            for (parent, parent_grad) in parents.iter().zip(grads) {
                let Some(parent_grad) = parent_grad else {
                    continue;
                };
                if !parent.is_tracked() {
                    continue;
                }
                if parent_grad.shape() != parent.shape().as_slice() {
                    return Err(TensorError::shapes(parent_grad.shape(), &parent.shape()));
                }
                match pending.entry(parent.id()) {
                    Entry::Occupied(mut slot) => *slot.get_mut() += &parent_grad,
                    Entry::Vacant(slot) => {
                        slot.insert(parent_grad);
                    }
                }
            }
        }
        tensor.accumulate_grad(&grad)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_inputs_accumulate_from_every_path() {
        // y = x * x + 3x, dy/dx = 2x + 3.
        let x = Tensor::from_vec(&[3], vec![1.0, -2.0, 0.5])
            .unwrap()
            .requires_grad(true);
        let y = x.mul(&x).unwrap().add(&x.scale(3.0).unwrap()).unwrap();
        y.sum().unwrap().backward().unwrap();
        let grad = x.grad().unwrap();
        assert_eq!(grad.iter().copied().collect::<Vec<_>>(), vec![5.0, -1.0, 4.0]);
    }

    #[test]
    fn untracked_inputs_receive_nothing() {
        let x = Tensor::from_vec(&[2], vec![1.0, 2.0])
            .unwrap()
            .requires_grad(true);
        let c = Tensor::from_vec(&[2], vec![4.0, 5.0]).unwrap();
        x.mul(&c).unwrap().sum().unwrap().backward().unwrap();
        assert!(c.grad().is_none());
        assert_eq!(
            x.grad().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![4.0, 5.0]
        );
    }

    #[test]
    fn detach_blocks_the_path() {
        // y = x + detach(x), dy/dx = 1.
        let x = Tensor::from_vec(&[2], vec![0.5, 1.5])
            .unwrap()
            .requires_grad(true);
        let y = x.add(&x.detach()).unwrap();
        y.sum().unwrap().backward().unwrap();
        assert_eq!(
            x.grad().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![1.0, 1.0]
        );
    }

    #[test]
    fn backward_requires_single_element() {
        let x = Tensor::zeros(&[2]).requires_grad(true);
        let y = x.scale(2.0).unwrap();
        assert!(matches!(
            y.backward(),
            Err(TensorError::NonScalarBackward { .. })
        ));
    }
}
