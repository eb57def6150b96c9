// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::{array, flat};
use crate::autograd::BackwardNode;
use crate::error::{PureResult, TensorError};
use crate::tensor::Tensor;
use ndarray::{ArrayD, IxDyn};

/// Reinterprets the row-major values under a new shape with equal volume.
pub fn reshape(x: &Tensor, shape: &[usize]) -> PureResult<Tensor> {
    let from = x.shape();
    let volume: usize = shape.iter().product();
    if volume != x.len() {
        return Err(TensorError::shapes(&from, shape));
    }
    let y = array(shape, x.to_vec())?;
    struct Node {
        x: Tensor,
        from: Vec<usize>,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "reshape"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.x.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            Ok(vec![Some(array(&self.from, flat(go))?)])
        }
    }
    Ok(Tensor::from_op(y, &[x], || Node {
        x: x.clone(),
        from,
    }))
}

/// Reorders axes: output axis `i` is input axis `axes[i]`.
pub fn permute(x: &Tensor, axes: &[usize]) -> PureResult<Tensor> {
    let ndim = x.ndim();
    let mut seen = vec![false; ndim];
    if axes.len() != ndim {
        return Err(TensorError::InvalidValue {
            label: "permutation",
        });
    }
    for &axis in axes {
        if axis >= ndim || seen[axis] {
            return Err(TensorError::InvalidValue {
                label: "permutation",
            });
        }
        seen[axis] = true;
    }
    let mut inverse = vec![0usize; ndim];
    for (position, &axis) in axes.iter().enumerate() {
        inverse[axis] = position;
    }
    let y = x.with_data(|data| {
        data.clone()
            .permuted_axes(IxDyn(axes))
            .as_standard_layout()
            .into_owned()
    });
    struct Node {
        x: Tensor,
        inverse: Vec<usize>,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "permute"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.x.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            let gx = go
                .clone()
                .permuted_axes(IxDyn(&self.inverse))
                .as_standard_layout()
                .into_owned();
            Ok(vec![Some(gx)])
        }
    }
    Ok(Tensor::from_op(y, &[x], || Node {
        x: x.clone(),
        inverse,
    }))
}

/// Zero-pads the spatial axes of an NCHW tensor. `padding` is
/// `(left, right, top, bottom)`.
pub fn pad2d(x: &Tensor, padding: (usize, usize, usize, usize)) -> PureResult<Tensor> {
    let (n, c, h, w) = x.dims4()?;
    let (left, right, top, bottom) = padding;
    let (oh, ow) = (h + top + bottom, w + left + right);
    let src = x.to_vec();
    let mut out = vec![0.0f32; n * c * oh * ow];
    for plane in 0..n * c {
        for row in 0..h {
            let from = plane * h * w + row * w;
            let to = plane * oh * ow + (row + top) * ow + left;
            out[to..to + w].copy_from_slice(&src[from..from + w]);
        }
    }
    let y = array(&[n, c, oh, ow], out)?;
    struct Node {
        x: Tensor,
        dims: (usize, usize, usize, usize),
        top: usize,
        left: usize,
        ow: usize,
        oh: usize,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "pad2d"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.x.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            let (n, c, h, w) = self.dims;
            let go = flat(go);
            let mut gx = vec![0.0f32; n * c * h * w];
            for plane in 0..n * c {
                for row in 0..h {
                    let to = plane * h * w + row * w;
                    let from = plane * self.oh * self.ow + (row + self.top) * self.ow + self.left;
                    gx[to..to + w].copy_from_slice(&go[from..from + w]);
                }
            }
            Ok(vec![Some(array(&[n, c, h, w], gx)?)])
        }
    }
    Ok(Tensor::from_op(y, &[x], || Node {
        x: x.clone(),
        dims: (n, c, h, w),
        top,
        left,
        ow,
        oh,
    }))
}

/// Concatenates NCHW tensors along the channel axis.
pub fn concat_channels(inputs: &[Tensor]) -> PureResult<Tensor> {
    let first = inputs
        .first()
        .ok_or(TensorError::EmptyInput("concat_channels inputs"))?;
    let (n, _, h, w) = first.dims4()?;
    let mut channels = Vec::with_capacity(inputs.len());
    for tensor in inputs {
        let (tn, tc, th, tw) = tensor.dims4()?;
        if (tn, th, tw) != (n, h, w) {
            return Err(TensorError::shapes(&first.shape(), &tensor.shape()));
        }
        channels.push(tc);
    }
    let total: usize = channels.iter().sum();
    let spatial = h * w;
    let mut out = vec![0.0f32; n * total * spatial];
    let mut offset = 0;
    for (tensor, &tc) in inputs.iter().zip(&channels) {
        let src = tensor.to_vec();
        for b in 0..n {
            let from = b * tc * spatial;
            let to = (b * total + offset) * spatial;
            out[to..to + tc * spatial].copy_from_slice(&src[from..from + tc * spatial]);
        }
        offset += tc;
    }
    let y = array(&[n, total, h, w], out)?;
    struct Node {
        inputs: Vec<Tensor>,
        channels: Vec<usize>,
        batch: usize,
        spatial: usize,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "concat_channels"
        }
        fn parents(&self) -> Vec<Tensor> {
            self.inputs.clone()
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            let go = flat(go);
            let total: usize = self.channels.iter().sum();
            let mut grads = Vec::with_capacity(self.inputs.len());
            let mut offset = 0;
            for (tensor, &tc) in self.inputs.iter().zip(&self.channels) {
                let mut gx = vec![0.0f32; self.batch * tc * self.spatial];
                for b in 0..self.batch {
                    let to = b * tc * self.spatial;
                    let from = (b * total + offset) * self.spatial;
                    gx[to..to + tc * self.spatial]
                        .copy_from_slice(&go[from..from + tc * self.spatial]);
                }
                grads.push(Some(array(&tensor.shape(), gx)?));
                offset += tc;
            }
            Ok(grads)
        }
    }
    let refs: Vec<&Tensor> = inputs.iter().collect();
    Ok(Tensor::from_op(y, &refs, || Node {
        inputs: inputs.to_vec(),
        channels,
        batch: n,
        spatial,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permute_round_trips_values_and_gradients() {
        let x = Tensor::from_vec(&[1, 2, 1, 3], (0..6).map(|v| v as f32).collect())
            .unwrap()
            .requires_grad(true);
        let channels_last = permute(&x, &[0, 2, 3, 1]).unwrap();
        assert_eq!(channels_last.shape(), vec![1, 1, 3, 2]);
        assert_eq!(channels_last.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        let weights = Tensor::from_vec(&[1, 1, 3, 2], (1..=6).map(|v| v as f32).collect()).unwrap();
        channels_last.mul(&weights).unwrap().sum().unwrap().backward().unwrap();
        let grad: Vec<f32> = x.grad().unwrap().iter().copied().collect();
        assert_eq!(grad, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn permute_rejects_repeated_axes() {
        let x = Tensor::zeros(&[2, 2]);
        assert!(permute(&x, &[0, 0]).is_err());
        assert!(permute(&x, &[0]).is_err());
    }

    #[test]
    fn pad2d_places_input_with_uneven_margins() {
        let x = Tensor::from_vec(&[1, 1, 1, 1], vec![7.0]).unwrap().requires_grad(true);
        let y = pad2d(&x, (1, 2, 1, 2)).unwrap();
        assert_eq!(y.shape(), vec![1, 1, 4, 4]);
        let values = y.to_vec();
        assert_eq!(values[5], 7.0);
        assert_eq!(values.iter().sum::<f32>(), 7.0);
        y.sum().unwrap().backward().unwrap();
        assert_eq!(x.grad().unwrap().iter().copied().collect::<Vec<_>>(), vec![1.0]);
    }

    #[test]
    fn concat_splits_gradients_back() {
        let a = Tensor::ones(&[2, 1, 1, 2]).requires_grad(true);
        let b = Tensor::full(&[2, 2, 1, 2], 2.0).requires_grad(true);
        let y = concat_channels(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(y.shape(), vec![2, 3, 1, 2]);
        assert_eq!(
            y.to_vec(),
            vec![1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0]
        );
        let weights = Tensor::from_vec(&[2, 3, 1, 2], (0..12).map(|v| v as f32).collect()).unwrap();
        y.mul(&weights).unwrap().sum().unwrap().backward().unwrap();
        let ga: Vec<f32> = a.grad().unwrap().iter().copied().collect();
        let gb: Vec<f32> = b.grad().unwrap().iter().copied().collect();
        assert_eq!(ga, vec![0.0, 1.0, 6.0, 7.0]);
        assert_eq!(gb, vec![2.0, 3.0, 4.0, 5.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn reshape_checks_volume() {
        let x = Tensor::zeros(&[2, 3]);
        assert!(reshape(&x, &[4]).is_err());
        assert_eq!(reshape(&x, &[3, 2]).unwrap().shape(), vec![3, 2]);
    }
}
