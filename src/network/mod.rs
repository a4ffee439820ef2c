//! Dense network kernel.
//!
//! A fully-connected ReLU network with a linear output layer, `f64`
//! throughout and single-threaded, so two runs from the same seed produce
//! bitwise-identical weights. The kernel exposes exactly what the learner
//! needs: forward, backward (sparse in the output because the Q loss only
//! touches one action per sample), parameter snapshot/load, and an
//! optimizer with serializable state.

pub mod optimizer;
pub mod serialize;

use ndarray::{Array1, Array2};
use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, Normal};

pub use optimizer::{Optimizer, OptimizerState};
pub use serialize::NetworkParams;

/// One fully-connected layer: `weights` is out × in.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    pub weights: Array2<f64>,
    pub biases: Array1<f64>,
}

/// Fully-connected network. Hidden layers use ReLU; the output is linear.
#[derive(Debug, Clone)]
pub struct DenseNet {
    sizes: Vec<usize>,
    layers: Vec<DenseLayer>,
}

/// Cached activations from a forward pass, consumed by `backward`.
pub struct ForwardTrace {
    /// Input plus post-activation output of every layer.
    activations: Vec<Array1<f64>>,
}

impl ForwardTrace {
    /// The network output (the Q row).
    pub fn output(&self) -> &Array1<f64> {
        self.activations.last().expect("trace has an output")
    }
}

/// Per-layer gradient accumulator matching a network's shapes.
#[derive(Debug, Clone)]
pub struct GradientSet {
    pub layers: Vec<(Array2<f64>, Array1<f64>)>,
}

impl GradientSet {
    pub fn zeros_like(net: &DenseNet) -> Self {
        GradientSet {
            layers: net
                .layers
                .iter()
                .map(|l| {
                    (
                        Array2::zeros(l.weights.dim()),
                        Array1::zeros(l.biases.len()),
                    )
                })
                .collect(),
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for (w, b) in &mut self.layers {
            w.mapv_inplace(|x| x * factor);
            b.mapv_inplace(|x| x * factor);
        }
    }

    /// Global L2 norm over every gradient entry.
    pub fn l2_norm(&self) -> f64 {
        let mut sum = 0.0;
        for (w, b) in &self.layers {
            sum += w.iter().map(|x| x * x).sum::<f64>();
            sum += b.iter().map(|x| x * x).sum::<f64>();
        }
        sum.sqrt()
    }

    /// Scale the whole set down so its global L2 norm is at most `ceiling`.
    /// Returns the pre-clip norm.
    pub fn clip_global_norm(&mut self, ceiling: f64) -> f64 {
        let norm = self.l2_norm();
        if norm > ceiling && norm > 0.0 {
            self.scale(ceiling / norm);
        }
        norm
    }

    pub fn has_non_finite(&self) -> bool {
        self.layers
            .iter()
            .any(|(w, b)| w.iter().any(|x| !x.is_finite()) || b.iter().any(|x| !x.is_finite()))
    }
}

impl DenseNet {
    /// Build a network with He-initialized weights drawn from the given
    /// stream. `sizes` lists input, hidden..., output widths.
    pub fn new(sizes: &[usize], rng: &mut ChaCha12Rng) -> Self {
        assert!(sizes.len() >= 2, "network needs input and output sizes");
        let mut layers = Vec::with_capacity(sizes.len() - 1);
        for window in sizes.windows(2) {
            let (fan_in, fan_out) = (window[0], window[1]);
            let std = (2.0 / fan_in as f64).sqrt();
            let normal = Normal::new(0.0, std).expect("valid init distribution");
            let mut weights = Array2::zeros((fan_out, fan_in));
            for value in weights.iter_mut() {
                *value = normal.sample(rng);
            }
            layers.push(DenseLayer {
                weights,
                biases: Array1::zeros(fan_out),
            });
        }
        DenseNet {
            sizes: sizes.to_vec(),
            layers,
        }
    }

    pub(crate) fn from_parts(sizes: Vec<usize>, layers: Vec<DenseLayer>) -> Self {
        DenseNet { sizes, layers }
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Forward pass without caching. The hot path for action selection.
    pub fn forward(&self, input: &Array1<f64>) -> Array1<f64> {
        let mut current = input.clone();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let mut z = layer.weights.dot(&current) + &layer.biases;
            if i < last {
                z.mapv_inplace(|x| x.max(0.0));
            }
            current = z;
        }
        current
    }

    /// Forward pass keeping the per-layer activations for `backward`.
    pub fn forward_cached(&self, input: &Array1<f64>) -> ForwardTrace {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.clone());
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let mut z = layer.weights.dot(activations.last().expect("non-empty")) + &layer.biases;
            if i < last {
                z.mapv_inplace(|x| x.max(0.0));
            }
            activations.push(z);
        }
        ForwardTrace { activations }
    }

    /// Accumulate gradients for a loss that touches a single output slot:
    /// `d_output` is dL/dQ(s, action). Exploits the one-hot output gradient
    /// so the top layer costs O(hidden) instead of O(hidden × outputs).
    pub fn backward_single(
        &self,
        trace: &ForwardTrace,
        action: usize,
        d_output: f64,
        grads: &mut GradientSet,
    ) {
        let last = self.layers.len() - 1;

        // Top layer: gradient only on the selected action's row.
        let prev_activation = &trace.activations[last];
        {
            let (w_grad, b_grad) = &mut grads.layers[last];
            w_grad.row_mut(action).scaled_add(d_output, prev_activation);
            b_grad[action] += d_output;
        }

        // Delta flowing into the last hidden layer.
        let mut delta: Array1<f64> = self.layers[last]
            .weights
            .row(action)
            .mapv(|w| w * d_output);

        // Hidden layers, highest first.
        for i in (0..last).rev() {
            // Mask by ReLU activity of this layer's output.
            let output = &trace.activations[i + 1];
            for (d, &a) in delta.iter_mut().zip(output.iter()) {
                if a <= 0.0 {
                    *d = 0.0;
                }
            }

            let input = &trace.activations[i];
            let (w_grad, b_grad) = &mut grads.layers[i];
            for (row, &d) in delta.iter().enumerate() {
                if d != 0.0 {
                    w_grad.row_mut(row).scaled_add(d, input);
                }
            }
            *b_grad += &delta;

            if i > 0 {
                delta = self.layers[i].weights.t().dot(&delta);
            }
        }
    }

    /// Deep-copy the parameters.
    pub fn params(&self) -> NetworkParams {
        NetworkParams::from_net(self)
    }

    /// Replace the parameters from a snapshot. Shapes must match.
    pub fn load_params(&mut self, params: &NetworkParams) -> crate::error::Result<()> {
        params.apply_to(self)
    }

    pub(crate) fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }
}
