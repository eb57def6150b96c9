// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::autograd::{self, BackwardNode, GradFn};
use crate::error::{PureResult, TensorError};
use crate::ops;
use ndarray::{ArrayD, IxDyn};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rand_distr::StandardNormal;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

struct Inner {
    id: usize,
    data: ArrayD<f32>,
    requires_grad: bool,
    grad: Option<ArrayD<f32>>,
    grad_fn: Option<GradFn>,
}

/// Shared handle to a dense `f32` array plus its autograd bookkeeping.
///
/// Cloning the handle is cheap and aliases the same storage; use
/// [`Tensor::detach`] to obtain an independent, untracked copy.
#[derive(Clone)]
pub struct Tensor(Rc<RefCell<Inner>>);

impl core::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.0.borrow();
        write!(
            f,
            "Tensor(id={},shape={:?},requires_grad={},op={})",
            inner.id,
            inner.data.shape(),
            inner.requires_grad,
            inner
                .grad_fn
                .as_ref()
                .map(|node| node.name())
                .unwrap_or("leaf")
        )
    }
}

impl Tensor {
    /// Wraps an owned array as an untracked leaf.
    pub fn from_array(data: ArrayD<f32>) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Tensor(Rc::new(RefCell::new(Inner {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            data,
            requires_grad: false,
            grad: None,
            grad_fn: None,
        })))
    }

    /// Builds a tensor from row-major data.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> PureResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TensorError::DataLength {
                expected,
                got: data.len(),
            });
        }
        let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| {
            TensorError::DataLength {
                expected,
                got: expected,
            }
        })?;
        Ok(Self::from_array(array))
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::from_array(ArrayD::zeros(IxDyn(shape)))
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    pub fn full(shape: &[usize], value: f32) -> Self {
        Self::from_array(ArrayD::from_elem(IxDyn(shape), value))
    }

    /// Rank-0 tensor holding a single value.
    pub fn scalar(value: f32) -> Self {
        Self::full(&[], value)
    }

    /// Samples every entry from the standard normal distribution.
    pub fn randn<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Self {
        let len: usize = shape.iter().product();
        let data: Vec<f32> = (0..len).map(|_| StandardNormal.sample(rng)).collect();
        Self::from_array(ArrayD::from_shape_vec(IxDyn(shape), data).unwrap_or_else(|_| {
            ArrayD::zeros(IxDyn(shape))
        }))
    }

    /// Samples every entry uniformly from `[-bound, bound)`.
    pub fn uniform<R: Rng + ?Sized>(shape: &[usize], bound: f32, rng: &mut R) -> PureResult<Self> {
        if !(bound.is_finite() && bound > 0.0) {
            return Err(TensorError::InvalidValue {
                label: "uniform bound",
            });
        }
        let dist = Uniform::new(-bound, bound);
        let len: usize = shape.iter().product();
        let data: Vec<f32> = (0..len).map(|_| dist.sample(rng)).collect();
        Self::from_vec(shape, data)
    }

    /// Unique identifier of this tensor node.
    pub fn id(&self) -> usize {
        self.0.borrow().id
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.borrow().data.shape().to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.0.borrow().data.ndim()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.0.borrow().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the underlying array.
    pub fn data(&self) -> ArrayD<f32> {
        self.0.borrow().data.clone()
    }

    /// Runs `f` against the underlying array without copying it.
    pub fn with_data<T>(&self, f: impl FnOnce(&ArrayD<f32>) -> T) -> T {
        f(&self.0.borrow().data)
    }

    /// Row-major copy of the values.
    pub fn to_vec(&self) -> Vec<f32> {
        self.0.borrow().data.iter().copied().collect()
    }

    /// Returns the value of a single-element tensor.
    pub fn item(&self) -> PureResult<f32> {
        let inner = self.0.borrow();
        if inner.data.len() != 1 {
            return Err(TensorError::shapes(inner.data.shape(), &[1]));
        }
        Ok(inner.data.iter().copied().sum())
    }

    /// Splits a rank-4 shape into `(batch, channels, height, width)`.
    pub fn dims4(&self) -> PureResult<(usize, usize, usize, usize)> {
        let shape = self.shape();
        match shape.as_slice() {
            &[n, c, h, w] => Ok((n, c, h, w)),
            _ => Err(TensorError::RankMismatch {
                op: "dims4",
                expected: 4,
                shape,
            }),
        }
    }

    /// Marks the tensor as a gradient sink. Only leaves should be flagged
    /// manually; op outputs inherit tracking from their inputs.
    pub fn requires_grad(self, flag: bool) -> Self {
        self.0.borrow_mut().requires_grad = flag;
        self
    }

    /// Whether gradients flow into this tensor.
    pub fn is_tracked(&self) -> bool {
        self.0.borrow().requires_grad
    }

    /// Whether this tensor was produced by a recorded op.
    pub fn is_leaf(&self) -> bool {
        self.0.borrow().grad_fn.is_none()
    }

    /// Gradient accumulated by the most recent backward passes.
    pub fn grad(&self) -> Option<ArrayD<f32>> {
        self.0.borrow().grad.clone()
    }

    pub fn zero_grad(&self) {
        self.0.borrow_mut().grad = None;
    }

    /// Replaces the values in place, keeping identity and tracking intact.
    pub fn set_data(&self, data: ArrayD<f32>) -> PureResult<()> {
        let mut inner = self.0.borrow_mut();
        if inner.data.shape() != data.shape() {
            return Err(TensorError::shapes(inner.data.shape(), data.shape()));
        }
        inner.data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Ok(())
    }

    /// Mutates the values in place.
    pub fn update_data(&self, f: impl FnOnce(&mut ArrayD<f32>)) {
        f(&mut self.0.borrow_mut().data);
    }

    pub fn grad_fn(&self) -> Option<GradFn> {
        self.0.borrow().grad_fn.clone()
    }

    /// Returns an untracked copy of the values: the stop-gradient primitive.
    pub fn detach(&self) -> Tensor {
        Tensor::from_array(self.data())
    }

    /// Backpropagates from a single-element tensor.
    pub fn backward(&self) -> PureResult<()> {
        let shape = self.shape();
        if self.len() != 1 {
            return Err(TensorError::NonScalarBackward { shape });
        }
        autograd::run_backward(self, ArrayD::from_elem(IxDyn(&shape), 1.0))
    }

    /// Backpropagates an explicit upstream gradient.
    pub fn backward_with_grad(&self, grad: ArrayD<f32>) -> PureResult<()> {
        autograd::run_backward(self, grad)
    }

    pub(crate) fn accumulate_grad(&self, grad: &ArrayD<f32>) -> PureResult<()> {
        let mut inner = self.0.borrow_mut();
        if inner.data.shape() != grad.shape() {
            return Err(TensorError::shapes(inner.data.shape(), grad.shape()));
        }
        match inner.grad.as_mut() {
            Some(existing) => *existing += grad,
            None => inner.grad = Some(grad.clone()),
        }
        Ok(())
    }

    /// Wraps an op result, recording `node` when any input is tracked.
    pub(crate) fn from_op<N, F>(data: ArrayD<f32>, inputs: &[&Tensor], node: F) -> Tensor
    where
        N: BackwardNode + 'static,
        F: FnOnce() -> N,
    {
        let out = Tensor::from_array(data);
        if inputs.iter().any(|tensor| tensor.is_tracked()) {
            let grad_fn = GradFn::new(node());
            let mut inner = out.0.borrow_mut();
            inner.requires_grad = true;
            inner.grad_fn = Some(grad_fn);
        }
        out
    }

    pub fn add(&self, other: &Tensor) -> PureResult<Tensor> {
        ops::elementwise::add(self, other)
    }

    pub fn sub(&self, other: &Tensor) -> PureResult<Tensor> {
        ops::elementwise::sub(self, other)
    }

    pub fn mul(&self, other: &Tensor) -> PureResult<Tensor> {
        ops::elementwise::mul(self, other)
    }

    pub fn scale(&self, factor: f32) -> PureResult<Tensor> {
        ops::elementwise::scale(self, factor)
    }

    pub fn square(&self) -> PureResult<Tensor> {
        ops::elementwise::square(self)
    }

    pub fn relu(&self) -> PureResult<Tensor> {
        ops::elementwise::relu(self)
    }

    pub fn sum(&self) -> PureResult<Tensor> {
        ops::reduce::sum(self)
    }

    pub fn mean(&self) -> PureResult<Tensor> {
        ops::reduce::mean(self)
    }

    pub fn reshape(&self, shape: &[usize]) -> PureResult<Tensor> {
        ops::shape::reshape(self, shape)
    }

    pub fn permute(&self, axes: &[usize]) -> PureResult<Tensor> {
        ops::shape::permute(self, axes)
    }
}
