//! Fully connected layer with accumulated gradients.

use crate::model::TensorState;
use horizon_core::HorizonError;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::Rng;

/// `y = x W^T + b` over row-major batches, with gradient buffers that
/// accumulate until explicitly cleared.
#[derive(Debug, Clone)]
pub(crate) struct Linear {
    /// `(out_dim, in_dim)`
    pub weight: Array2<f64>,
    /// `(out_dim,)`
    pub bias: Array1<f64>,
    pub grad_weight: Array2<f64>,
    pub grad_bias: Array1<f64>,
}

impl Linear {
    /// Every weight set to `value`, biases zero.
    pub fn constant(out_dim: usize, in_dim: usize, value: f64) -> Self {
        Self {
            weight: Array2::from_elem((out_dim, in_dim), value),
            bias: Array1::zeros(out_dim),
            grad_weight: Array2::zeros((out_dim, in_dim)),
            grad_bias: Array1::zeros(out_dim),
        }
    }

    /// Uniform init in `±1/sqrt(in_dim)`, biases included.
    pub fn uniform(out_dim: usize, in_dim: usize, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (in_dim as f64).sqrt();
        Self {
            weight: Array2::from_shape_fn((out_dim, in_dim), |_| rng.gen_range(-bound..bound)),
            bias: Array1::from_shape_fn(out_dim, |_| rng.gen_range(-bound..bound)),
            grad_weight: Array2::zeros((out_dim, in_dim)),
            grad_bias: Array1::zeros(out_dim),
        }
    }

    /// `x` is `(batch, in_dim)`; returns `(batch, out_dim)`.
    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.weight.t()) + &self.bias
    }

    /// Accumulate parameter gradients and return the gradient with respect
    /// to the input.
    pub fn backward(&mut self, x: &Array2<f64>, grad_out: &Array2<f64>) -> Array2<f64> {
        self.grad_weight += &grad_out.t().dot(x);
        self.grad_bias += &grad_out.sum_axis(Axis(0));
        grad_out.dot(&self.weight)
    }

    pub fn zero_grad(&mut self) {
        self.grad_weight.fill(0.0);
        self.grad_bias.fill(0.0);
    }

    pub fn param_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    /// Push parameters into a flat vector, weight first.
    pub fn collect_params(&self, out: &mut Vec<f64>) {
        out.extend(self.weight.iter());
        out.extend(self.bias.iter());
    }

    /// Push gradients into a flat vector, same order as `collect_params`.
    pub fn collect_grads(&self, out: &mut Vec<f64>) {
        out.extend(self.grad_weight.iter());
        out.extend(self.grad_bias.iter());
    }

    /// Consume this layer's slice of a flat update vector.
    pub fn apply_update<'a>(&mut self, delta: &mut impl Iterator<Item = &'a f64>) {
        for w in self.weight.iter_mut() {
            *w += delta.next().copied().unwrap_or(0.0);
        }
        for b in self.bias.iter_mut() {
            *b += delta.next().copied().unwrap_or(0.0);
        }
    }

    pub fn weight_state(&self) -> TensorState {
        TensorState {
            shape: self.weight.shape().to_vec(),
            data: self.weight.iter().copied().collect(),
        }
    }

    pub fn bias_state(&self) -> TensorState {
        TensorState {
            shape: vec![self.bias.len()],
            data: self.bias.iter().copied().collect(),
        }
    }

    /// Restore weight and bias from serialized tensors, shape-checked.
    pub fn load(&mut self, weight: &TensorState, bias: &TensorState) -> Result<(), HorizonError> {
        if weight.shape != self.weight.shape().to_vec() {
            return Err(HorizonError::shape(format!(
                "weight shape {:?} does not match {:?}",
                weight.shape,
                self.weight.shape()
            )));
        }
        if bias.shape != vec![self.bias.len()] {
            return Err(HorizonError::shape(format!(
                "bias shape {:?} does not match [{}]",
                bias.shape,
                self.bias.len()
            )));
        }
        for (dst, src) in self.weight.iter_mut().zip(weight.data.iter()) {
            *dst = *src;
        }
        for (dst, src) in self.bias.iter_mut().zip(bias.data.iter()) {
            *dst = *src;
        }
        Ok(())
    }
}
