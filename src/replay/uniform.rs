//! Uniform replay: a bounded FIFO deque sampled without replacement.

use crate::replay::{Batch, Experience};
use rand::seq::index::sample as index_sample;
use rand_chacha::ChaCha12Rng;
use std::collections::VecDeque;

pub struct UniformReplay {
    entries: VecDeque<Experience>,
    capacity: usize,
}

impl UniformReplay {
    pub fn new(capacity: usize) -> Self {
        UniformReplay {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, experience: Experience) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(experience);
    }

    /// Draw `batch_size` distinct entries uniformly. The caller has already
    /// checked `batch_size <= len`.
    pub fn sample(&self, batch_size: usize, rng: &mut ChaCha12Rng) -> Batch {
        let picked = index_sample(rng, self.entries.len(), batch_size);
        let mut samples = Vec::with_capacity(batch_size);
        let mut indices = Vec::with_capacity(batch_size);
        for idx in picked {
            samples.push(self.entries[idx].clone());
            indices.push(idx);
        }
        let weights = vec![1.0; batch_size];
        Batch {
            samples,
            indices,
            weights,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries in FIFO order (oldest first), for checkpointing.
    pub fn entries(&self) -> impl Iterator<Item = &Experience> {
        self.entries.iter()
    }
}
