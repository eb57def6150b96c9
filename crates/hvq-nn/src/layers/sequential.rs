// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter, Parameterized};
use hvq_tensor::{PureResult, Tensor};

/// Runs its layers one after another.
#[derive(Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl core::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Sequential(num_layers={})", self.layers.len())
    }
}

impl Sequential {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Appends a new layer to the sequence.
    pub fn push<M>(&mut self, layer: M)
    where
        M: Module + 'static,
    {
        self.layers.push(Box::new(layer));
    }

    /// Builder-style [`Sequential::push`].
    pub fn with<M>(mut self, layer: M) -> Self
    where
        M: Module + 'static,
    {
        self.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Parameterized for Sequential {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for layer in &self.layers {
            layer.visit_parameters(visitor)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for layer in &mut self.layers {
            layer.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut activ = input.clone();
        for layer in &self.layers {
            activ = layer.forward(&activ)?;
        }
        Ok(activ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::conv::Conv2d;
    use crate::layers::Relu;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn empty_sequence_is_identity() {
        let seq = Sequential::new();
        let x = Tensor::from_vec(&[1, 1, 1, 2], vec![-1.0, 2.0]).unwrap();
        assert_eq!(seq.forward(&x).unwrap().to_vec(), x.to_vec());
        assert!(seq.is_empty());
    }

    #[test]
    fn collects_parameters_from_every_layer() {
        let mut rng = StdRng::seed_from_u64(5);
        let seq = Sequential::new()
            .with(Conv2d::new("a", 1, 2, (1, 1), (1, 1), (0, 0), &mut rng).unwrap())
            .with(Relu::new())
            .with(Conv2d::new("b", 2, 1, (1, 1), (1, 1), (0, 0), &mut rng).unwrap());
        assert_eq!(seq.len(), 3);
        let y = seq.forward(&Tensor::ones(&[1, 1, 2, 2])).unwrap();
        assert_eq!(y.shape(), vec![1, 1, 2, 2]);
        let mut names = seq.state_dict().unwrap().into_keys().collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["a::bias", "a::weight", "b::bias", "b::weight"]);
    }
}
