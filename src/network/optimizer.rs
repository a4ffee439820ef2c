//! Adam and SGD-with-momentum over [`DenseNet`] parameters, with state that
//! snapshots into checkpoints so a resumed run continues the exact same
//! optimizer trajectory.

use crate::config::OptimizerKind;
use crate::error::{Result, TrainError};
use crate::network::{DenseNet, GradientSet};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;
const SGD_MOMENTUM: f64 = 0.9;

/// Per-layer moment buffers. Adam uses both slots, SGD only the first.
#[derive(Debug, Clone)]
struct MomentBuffers {
    first: Vec<(Array2<f64>, Array1<f64>)>,
    second: Vec<(Array2<f64>, Array1<f64>)>,
}

impl MomentBuffers {
    fn zeros_like(net: &DenseNet) -> Self {
        let zeros = || {
            net.layers()
                .iter()
                .map(|l| {
                    (
                        Array2::zeros(l.weights.dim()),
                        Array1::zeros(l.biases.len()),
                    )
                })
                .collect::<Vec<_>>()
        };
        MomentBuffers {
            first: zeros(),
            second: zeros(),
        }
    }
}

/// Gradient-descent driver owning the moment state.
#[derive(Debug, Clone)]
pub struct Optimizer {
    kind: OptimizerKind,
    learning_rate: f64,
    step: u64,
    buffers: MomentBuffers,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: f64, net: &DenseNet) -> Self {
        Optimizer {
            kind,
            learning_rate,
            step: 0,
            buffers: MomentBuffers::zeros_like(net),
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Apply one update from accumulated gradients.
    pub fn apply(&mut self, net: &mut DenseNet, grads: &GradientSet) {
        self.step += 1;
        match self.kind {
            OptimizerKind::Adam => self.apply_adam(net, grads),
            OptimizerKind::Sgd => self.apply_sgd(net, grads),
        }
    }

    fn apply_adam(&mut self, net: &mut DenseNet, grads: &GradientSet) {
        let bias1 = 1.0 - ADAM_BETA1.powi(self.step as i32);
        let bias2 = 1.0 - ADAM_BETA2.powi(self.step as i32);
        let lr = self.learning_rate;

        for (layer_idx, layer) in net.layers_mut().iter_mut().enumerate() {
            let (g_w, g_b) = &grads.layers[layer_idx];
            let (m_w, m_b) = &mut self.buffers.first[layer_idx];
            let (v_w, v_b) = &mut self.buffers.second[layer_idx];

            for ((w, m), (v, g)) in layer
                .weights
                .iter_mut()
                .zip(m_w.iter_mut())
                .zip(v_w.iter_mut().zip(g_w.iter()))
            {
                *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
                *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *w -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
            }
            for ((b, m), (v, g)) in layer
                .biases
                .iter_mut()
                .zip(m_b.iter_mut())
                .zip(v_b.iter_mut().zip(g_b.iter()))
            {
                *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
                *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *b -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
            }
        }
    }

    fn apply_sgd(&mut self, net: &mut DenseNet, grads: &GradientSet) {
        let lr = self.learning_rate;
        for (layer_idx, layer) in net.layers_mut().iter_mut().enumerate() {
            let (g_w, g_b) = &grads.layers[layer_idx];
            let (m_w, m_b) = &mut self.buffers.first[layer_idx];

            for ((w, m), g) in layer
                .weights
                .iter_mut()
                .zip(m_w.iter_mut())
                .zip(g_w.iter())
            {
                *m = SGD_MOMENTUM * *m + g;
                *w -= lr * *m;
            }
            for ((b, m), g) in layer.biases.iter_mut().zip(m_b.iter_mut()).zip(g_b.iter()) {
                *m = SGD_MOMENTUM * *m + g;
                *b -= lr * *m;
            }
        }
    }

    /// Snapshot the full optimizer state.
    pub fn state(&self) -> OptimizerState {
        let flatten = |slot: &Vec<(Array2<f64>, Array1<f64>)>| {
            slot.iter()
                .map(|(w, b)| MomentData {
                    weights: w.iter().copied().collect(),
                    biases: b.iter().copied().collect(),
                })
                .collect()
        };
        OptimizerState {
            kind: self.kind,
            learning_rate: self.learning_rate,
            step: self.step,
            first: flatten(&self.buffers.first),
            second: flatten(&self.buffers.second),
        }
    }

    /// Rebuild an optimizer from a snapshot against a matching network.
    pub fn from_state(state: &OptimizerState, net: &DenseNet) -> Result<Self> {
        let mut optimizer = Optimizer::new(state.kind, state.learning_rate, net);
        optimizer.step = state.step;
        restore_slot(&mut optimizer.buffers.first, &state.first)?;
        restore_slot(&mut optimizer.buffers.second, &state.second)?;
        Ok(optimizer)
    }
}

fn restore_slot(
    target: &mut [(Array2<f64>, Array1<f64>)],
    source: &[MomentData],
) -> Result<()> {
    if target.len() != source.len() {
        return Err(TrainError::CheckpointCorrupt(format!(
            "optimizer state has {} layers, network has {}",
            source.len(),
            target.len()
        )));
    }
    for ((w, b), data) in target.iter_mut().zip(source) {
        if w.len() != data.weights.len() || b.len() != data.biases.len() {
            return Err(TrainError::CheckpointCorrupt(
                "optimizer moment shape does not match the network".to_string(),
            ));
        }
        for (slot, value) in w.iter_mut().zip(&data.weights) {
            *slot = *value;
        }
        for (slot, value) in b.iter_mut().zip(&data.biases) {
            *slot = *value;
        }
    }
    Ok(())
}

/// Serializable moment buffers for one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentData {
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
}

/// Serializable optimizer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
    pub step: u64,
    pub first: Vec<MomentData>,
    pub second: Vec<MomentData>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::DenseNet;
    use crate::rng::SeedConfig;
    use ndarray::Array1;

    fn net_and_grads() -> (DenseNet, GradientSet) {
        let mut rng = SeedConfig::new(5).nn_init_rng();
        let net = DenseNet::new(&[3, 6, 4], &mut rng);
        let input = Array1::from_vec(vec![0.5, -0.2, 1.0]);
        let trace = net.forward_cached(&input);
        let mut grads = GradientSet::zeros_like(&net);
        net.backward_single(&trace, 1, 0.7, &mut grads);
        (net, grads)
    }

    #[test]
    fn test_adam_step_moves_parameters() {
        let (mut net, grads) = net_and_grads();
        let before = net.params();
        let mut optimizer = Optimizer::new(OptimizerKind::Adam, 1e-2, &net);
        optimizer.apply(&mut net, &grads);
        assert_ne!(net.params(), before);
        assert_eq!(optimizer.step_count(), 1);
    }

    #[test]
    fn test_sgd_momentum_accumulates() {
        let (mut net, grads) = net_and_grads();
        let mut optimizer = Optimizer::new(OptimizerKind::Sgd, 1e-2, &net);
        optimizer.apply(&mut net, &grads);
        let after_one = net.params();
        optimizer.apply(&mut net, &grads);
        // Momentum makes the second identical-gradient step larger.
        assert_ne!(net.params(), after_one);
    }

    #[test]
    fn test_state_roundtrip_continues_identically() {
        let (mut net, grads) = net_and_grads();
        let mut optimizer = Optimizer::new(OptimizerKind::Adam, 1e-2, &net);
        optimizer.apply(&mut net, &grads);

        let mut net_copy = net.clone();
        let restored_state = optimizer.state();
        let mut restored = Optimizer::from_state(&restored_state, &net_copy).unwrap();

        optimizer.apply(&mut net, &grads);
        restored.apply(&mut net_copy, &grads);
        assert_eq!(net.params(), net_copy.params());
    }

    #[test]
    fn test_state_shape_mismatch_is_rejected() {
        let (net, _) = net_and_grads();
        let mut rng = SeedConfig::new(6).nn_init_rng();
        let other = DenseNet::new(&[3, 7, 4], &mut rng);
        let state = Optimizer::new(OptimizerKind::Adam, 1e-2, &other).state();
        assert!(Optimizer::from_state(&state, &net).is_err());
    }
}
