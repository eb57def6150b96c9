// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use hvq_tensor::{PureResult, Tensor, TensorError};
use ndarray::ArrayD;
use std::collections::HashMap;

/// Trainable tensor registered under a stable name.
///
/// The wrapped tensor is a tracked autograd leaf, so every op that reads it
/// during a forward pass routes gradient back into [`Parameter::gradient`].
pub struct Parameter {
    name: String,
    value: Tensor,
}

impl core::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Parameter(name={},shape={:?},has_grad={})",
            self.name,
            self.value.shape(),
            self.value.grad().is_some()
        )
    }
}

impl Parameter {
    /// Creates a new parameter and marks the tensor as a gradient sink.
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        Self {
            name: name.into(),
            value: value.requires_grad(true),
        }
    }

    /// Returns the identifier assigned to the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overrides the parameter name.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// Gradient accumulated since the last step or reset.
    pub fn gradient(&self) -> Option<ArrayD<f32>> {
        self.value.grad()
    }

    pub fn zero_gradient(&mut self) {
        self.value.zero_grad();
    }

    /// Plain SGD update followed by a gradient reset. Parameters that never
    /// received a gradient are left untouched.
    pub fn apply_step(&mut self, learning_rate: f32) -> PureResult<()> {
        if !learning_rate.is_finite() {
            return Err(TensorError::InvalidValue {
                label: "learning_rate",
            });
        }
        if let Some(grad) = self.value.grad() {
            self.value
                .update_data(|data| data.scaled_add(-learning_rate, &grad));
            self.value.zero_grad();
        }
        Ok(())
    }

    /// Copies values from `value`, which must have the same shape.
    pub fn load_value(&mut self, value: &Tensor) -> PureResult<()> {
        self.value.set_data(value.data())
    }

    pub fn numel(&self) -> usize {
        self.value.len()
    }
}

/// Anything that owns named parameters.
pub trait Parameterized {
    /// Visits immutable parameters.
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Visits mutable parameters.
    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Applies an SGD step to every parameter.
    fn apply_step(&mut self, learning_rate: f32) -> PureResult<()> {
        self.visit_parameters_mut(&mut |param| param.apply_step(learning_rate))
    }

    /// Clears accumulated gradients across every parameter.
    fn zero_accumulators(&mut self) -> PureResult<()> {
        self.visit_parameters_mut(&mut |param| {
            param.zero_gradient();
            Ok(())
        })
    }

    /// Total number of trainable scalars.
    fn parameter_count(&self) -> PureResult<usize> {
        let mut total = 0usize;
        self.visit_parameters(&mut |param| {
            total += param.numel();
            Ok(())
        })?;
        Ok(total)
    }

    /// Captures a detached copy of every parameter keyed by its name.
    fn state_dict(&self) -> PureResult<HashMap<String, Tensor>> {
        let mut state = HashMap::new();
        self.visit_parameters(&mut |param| {
            state.insert(param.name().to_string(), param.value().detach());
            Ok(())
        })?;
        Ok(state)
    }

    /// Restores parameters from a state dictionary produced by
    /// [`Parameterized::state_dict`].
    fn load_state_dict(&mut self, state: &HashMap<String, Tensor>) -> PureResult<()> {
        self.visit_parameters_mut(&mut |param| {
            let Some(value) = state.get(param.name()) else {
                return Err(TensorError::MissingParameter {
                    name: param.name().to_string(),
                });
            };
            param.load_value(value)
        })
    }
}

/// Single-input, single-output network block.
pub trait Module: Parameterized {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair {
        left: Parameter,
        right: Parameter,
    }

    impl Parameterized for Pair {
        fn visit_parameters(
            &self,
            visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
        ) -> PureResult<()> {
            visitor(&self.left)?;
            visitor(&self.right)
        }

        fn visit_parameters_mut(
            &mut self,
            visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
        ) -> PureResult<()> {
            visitor(&mut self.left)?;
            visitor(&mut self.right)
        }
    }

    fn pair() -> Pair {
        Pair {
            left: Parameter::new("left", Tensor::from_vec(&[2], vec![1.0, 2.0]).unwrap()),
            right: Parameter::new("right", Tensor::from_vec(&[1], vec![3.0]).unwrap()),
        }
    }

    #[test]
    fn apply_step_descends_along_gradient() {
        let mut params = pair();
        let loss = params
            .left
            .value()
            .square()
            .unwrap()
            .sum()
            .unwrap();
        loss.backward().unwrap();
        params.apply_step(0.25).unwrap();
        // d/dx x^2 = 2x, so x - 0.25 * 2x = 0.5x
        assert_eq!(params.left.value().to_vec(), vec![0.5, 1.0]);
        assert!(params.left.gradient().is_none());
        assert_eq!(params.right.value().to_vec(), vec![3.0]);
    }

    #[test]
    fn state_dict_is_a_snapshot() {
        let mut params = pair();
        let state = params.state_dict().unwrap();
        params
            .left
            .value()
            .update_data(|data| data.fill(0.0));
        assert_eq!(state["left"].to_vec(), vec![1.0, 2.0]);
        params.load_state_dict(&state).unwrap();
        assert_eq!(params.left.value().to_vec(), vec![1.0, 2.0]);
        assert_eq!(params.parameter_count().unwrap(), 3);
    }

    #[test]
    fn load_state_dict_reports_missing_and_misshapen_entries() {
        let mut params = pair();
        let mut state = params.state_dict().unwrap();
        state.remove("right");
        assert_eq!(
            params.load_state_dict(&state).unwrap_err(),
            TensorError::MissingParameter {
                name: "right".into()
            }
        );
        state.insert("right".into(), Tensor::zeros(&[2]));
        assert!(matches!(
            params.load_state_dict(&state),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn non_finite_learning_rate_is_rejected() {
        let mut params = pair();
        assert!(params.apply_step(f32::NAN).is_err());
    }
}
