//! Parameter snapshots.
//!
//! [`NetworkParams`] is the opaque value other components exchange: a deep
//! copy of every weight and bias, serializable through serde into both
//! checkpoint families. Two snapshots compare equal iff every bit agrees,
//! which is what the checkpoint round-trip invariant tests against.

use crate::error::{Result, TrainError};
use crate::network::{DenseLayer, DenseNet};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// One layer's parameters in serializable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerParams {
    pub rows: usize,
    pub cols: usize,
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
}

/// A deep copy of a network's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkParams {
    pub sizes: Vec<usize>,
    pub layers: Vec<LayerParams>,
}

impl NetworkParams {
    pub fn from_net(net: &DenseNet) -> Self {
        NetworkParams {
            sizes: net.sizes().to_vec(),
            layers: net
                .layers()
                .iter()
                .map(|l| LayerParams {
                    rows: l.weights.nrows(),
                    cols: l.weights.ncols(),
                    weights: l.weights.iter().copied().collect(),
                    biases: l.biases.iter().copied().collect(),
                })
                .collect(),
        }
    }

    /// Copy these parameters into a network of matching shape.
    pub fn apply_to(&self, net: &mut DenseNet) -> Result<()> {
        if self.sizes != net.sizes() {
            return Err(TrainError::CheckpointCorrupt(format!(
                "parameter shapes {:?} do not match network {:?}",
                self.sizes,
                net.sizes()
            )));
        }
        for (layer, data) in net.layers_mut().iter_mut().zip(&self.layers) {
            for (slot, value) in layer.weights.iter_mut().zip(&data.weights) {
                *slot = *value;
            }
            for (slot, value) in layer.biases.iter_mut().zip(&data.biases) {
                *slot = *value;
            }
        }
        Ok(())
    }

    /// Build a network directly from a snapshot, validating every shape.
    pub fn into_net(&self) -> Result<DenseNet> {
        if self.sizes.len() < 2 || self.layers.len() != self.sizes.len() - 1 {
            return Err(TrainError::CheckpointCorrupt(
                "parameter snapshot has inconsistent layer counts".to_string(),
            ));
        }
        let mut layers = Vec::with_capacity(self.layers.len());
        for (i, data) in self.layers.iter().enumerate() {
            if data.rows != self.sizes[i + 1]
                || data.cols != self.sizes[i]
                || data.weights.len() != data.rows * data.cols
                || data.biases.len() != data.rows
            {
                return Err(TrainError::CheckpointCorrupt(format!(
                    "layer {} shape does not match declared sizes",
                    i
                )));
            }
            let weights =
                Array2::from_shape_vec((data.rows, data.cols), data.weights.clone()).map_err(
                    |e| TrainError::CheckpointCorrupt(format!("layer {} weights: {}", i, e)),
                )?;
            layers.push(DenseLayer {
                weights,
                biases: Array1::from_vec(data.biases.clone()),
            });
        }
        Ok(DenseNet::from_parts(self.sizes.clone(), layers))
    }
}
