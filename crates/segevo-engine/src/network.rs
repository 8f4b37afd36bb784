//! Fully-connected feed-forward network.
//!
//! The network is the trainable core of the neural criteria. It is never
//! trained by gradient descent: its parameters are exposed as one flat vector
//! so that the genetic trainer can read and overwrite them in a single pass.
//!
//! Every layer computes `tanh(W·x + b)`, so outputs always lie in `[-1, 1]`.
//!
//! # Parameter layout
//!
//! Layers are stored in order. For a layer with `n` inputs and `m` outputs the
//! flat vector holds `m` rows of `n + 1` values: the bias followed by the `n`
//! input weights.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Range every network parameter is searched in.
pub const PARAM_RANGE: RangeInclusive<f32> = -1.0..=1.0;

/// A feed-forward network with `tanh` activations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    nb_input: usize,
    nb_output: usize,
    hidden_layers: Vec<usize>,
    params: Vec<f32>,
}

/// Reusable buffers for [`Network::eval_into`].
#[derive(Debug, Default, Clone)]
pub struct Scratch {
    front: Vec<f32>,
    back: Vec<f32>,
}

impl Network {
    /// Creates a network with all parameters set to zero.
    #[must_use]
    pub fn new(nb_input: usize, hidden_layers: Vec<usize>, nb_output: usize) -> Self {
        let param_count = Self::param_count_for(nb_input, &hidden_layers, nb_output);
        Self {
            nb_input,
            nb_output,
            hidden_layers,
            params: vec![0.0; param_count],
        }
    }

    /// Number of parameters of a network with the given topology.
    #[must_use]
    pub fn param_count_for(nb_input: usize, hidden_layers: &[usize], nb_output: usize) -> usize {
        layer_sizes(nb_input, hidden_layers, nb_output)
            .windows(2)
            .map(|w| (w[0] + 1) * w[1])
            .sum()
    }

    #[must_use]
    pub fn nb_input(&self) -> usize {
        self.nb_input
    }

    #[must_use]
    pub fn nb_output(&self) -> usize {
        self.nb_output
    }

    #[must_use]
    pub fn hidden_layers(&self) -> &[usize] {
        &self.hidden_layers
    }

    #[must_use]
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Overwrites every parameter.
    ///
    /// # Panics
    ///
    /// Panics if `params` does not have exactly [`Self::params`]`.len()` values.
    pub fn set_params(&mut self, params: &[f32]) {
        assert_eq!(params.len(), self.params.len(), "network parameter count");
        self.params.copy_from_slice(params);
    }

    /// Checks that the stored parameter vector matches the topology.
    ///
    /// Used after deserialization, where the two are decoded independently.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.nb_input > 0
            && self.nb_output > 0
            && self.hidden_layers.iter().all(|&n| n > 0)
            && self.params.len()
                == Self::param_count_for(self.nb_input, &self.hidden_layers, self.nb_output)
            && self.params.iter().all(|p| p.is_finite())
    }

    /// Evaluates the network on `input`, writing the result into `output`.
    ///
    /// # Panics
    ///
    /// Panics if `input` or `output` lengths do not match the topology.
    pub fn eval_into(&self, input: &[f32], scratch: &mut Scratch, output: &mut [f32]) {
        assert_eq!(input.len(), self.nb_input);
        assert_eq!(output.len(), self.nb_output);

        let Scratch { front, back } = scratch;
        front.clear();
        front.extend_from_slice(input);

        let mut params = self.params.as_slice();
        let sizes = layer_sizes(self.nb_input, &self.hidden_layers, self.nb_output);
        for w in sizes.windows(2) {
            let (n, m) = (w[0], w[1]);
            back.clear();
            for _ in 0..m {
                let (row, rest) = params.split_at(n + 1);
                params = rest;
                let sum = row[0]
                    + row[1..]
                        .iter()
                        .zip(front.iter())
                        .map(|(w, x)| w * x)
                        .sum::<f32>();
                back.push(sum.tanh());
            }
            std::mem::swap(front, back);
        }
        output.copy_from_slice(front);
    }

    /// Convenience wrapper around [`Self::eval_into`] allocating its buffers.
    #[must_use]
    pub fn eval(&self, input: &[f32]) -> Vec<f32> {
        let mut output = vec![0.0; self.nb_output];
        self.eval_into(input, &mut Scratch::default(), &mut output);
        output
    }
}

fn layer_sizes(nb_input: usize, hidden_layers: &[usize], nb_output: usize) -> Vec<usize> {
    let mut sizes = Vec::with_capacity(hidden_layers.len() + 2);
    sizes.push(nb_input);
    sizes.extend_from_slice(hidden_layers);
    sizes.push(nb_output);
    sizes
}
