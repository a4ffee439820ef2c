//! Prioritized replay over a sum tree.
//!
//! Entries live in a ring (FIFO eviction); the tree keeps `priority^α` per
//! slot so a proportional draw is O(log capacity). New entries take the
//! running-max raw priority so they are eligible for sampling at least once
//! before their first TD error arrives.

use crate::replay::{Batch, Experience};
use rand::Rng;
use rand_chacha::ChaCha12Rng;

struct ReplayEntry {
    experience: Experience,
    priority: f64,
}

pub struct PrioritizedReplay {
    entries: Vec<Option<ReplayEntry>>,
    /// Binary sum tree over `priority^α`; leaves start at `tree_base`.
    tree: Vec<f64>,
    tree_base: usize,
    capacity: usize,
    /// Next ring slot to write; wraps at capacity.
    cursor: usize,
    len: usize,
    alpha: f64,
    beta: f64,
    max_priority: f64,
}

impl PrioritizedReplay {
    pub fn new(capacity: usize, alpha: f64, beta: f64) -> Self {
        let tree_base = capacity.next_power_of_two();
        PrioritizedReplay {
            entries: (0..capacity).map(|_| None).collect(),
            tree: vec![0.0; 2 * tree_base],
            tree_base,
            capacity,
            cursor: 0,
            len: 0,
            alpha,
            beta,
            max_priority: 1.0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn set_leaf(&mut self, slot: usize, scaled_priority: f64) {
        let mut node = self.tree_base + slot;
        self.tree[node] = scaled_priority;
        while node > 1 {
            node /= 2;
            self.tree[node] = self.tree[2 * node] + self.tree[2 * node + 1];
        }
    }

    fn total(&self) -> f64 {
        self.tree[1]
    }

    /// Descend the tree to the leaf covering `target` mass. The clamp
    /// guards the rare float-boundary descent into an empty leaf.
    fn find_leaf(&self, mut target: f64) -> usize {
        let mut node = 1;
        while node < self.tree_base {
            let left = 2 * node;
            if target < self.tree[left] {
                node = left;
            } else {
                target -= self.tree[left];
                node = left + 1;
            }
        }
        (node - self.tree_base).min(self.len.saturating_sub(1))
    }

    pub fn push(&mut self, experience: Experience) {
        let slot = self.cursor;
        let priority = self.max_priority;
        self.entries[slot] = Some(ReplayEntry {
            experience,
            priority,
        });
        let scaled = priority.powf(self.alpha);
        self.set_leaf(slot, scaled);
        self.cursor = (self.cursor + 1) % self.capacity;
        if self.len < self.capacity {
            self.len += 1;
        }
    }

    /// Proportional draw with importance-sampling weights normalized by the
    /// batch maximum. The caller has already checked `batch_size <= len`.
    pub fn sample(&self, batch_size: usize, rng: &mut ChaCha12Rng) -> Batch {
        let total = self.total();
        let n = self.len as f64;
        let mut samples = Vec::with_capacity(batch_size);
        let mut indices = Vec::with_capacity(batch_size);
        let mut weights = Vec::with_capacity(batch_size);

        for _ in 0..batch_size {
            let target = rng.random::<f64>() * total;
            let slot = self.find_leaf(target);
            let entry = self.entries[slot]
                .as_ref()
                .expect("sum tree only covers occupied slots");
            let probability = (self.tree[self.tree_base + slot] / total).max(f64::MIN_POSITIVE);
            weights.push((n * probability).powf(-self.beta));
            samples.push(entry.experience.clone());
            indices.push(slot);
        }

        let max_weight = weights.iter().cloned().fold(f64::MIN_POSITIVE, f64::max);
        for weight in &mut weights {
            *weight /= max_weight;
        }

        Batch {
            samples,
            indices,
            weights,
        }
    }

    /// Apply fresh `|TD error| + ε` priorities to previously sampled slots.
    pub fn update_priorities(&mut self, indices: &[usize], priorities: &[f64]) {
        for (&slot, &priority) in indices.iter().zip(priorities) {
            if slot >= self.capacity {
                continue;
            }
            let priority = priority.max(f64::MIN_POSITIVE);
            if let Some(entry) = self.entries[slot].as_mut() {
                entry.priority = priority;
                self.max_priority = self.max_priority.max(priority);
                let scaled = priority.powf(self.alpha);
                self.set_leaf(slot, scaled);
            }
        }
    }

    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        for node in &mut self.tree {
            *node = 0.0;
        }
        self.cursor = 0;
        self.len = 0;
        self.max_priority = 1.0;
    }

    /// Ring slots with raw priorities, plus cursor and running max, for
    /// checkpointing.
    pub fn slots(&self) -> (Vec<Option<(&Experience, f64)>>, usize, f64) {
        let slots = self
            .entries
            .iter()
            .map(|slot| slot.as_ref().map(|e| (&e.experience, e.priority)))
            .collect();
        (slots, self.cursor, self.max_priority)
    }

    /// Rebuild the exact ring layout from checkpointed slots.
    pub fn restore_slots(
        &mut self,
        slots: Vec<Option<(Experience, f64)>>,
        cursor: usize,
        max_priority: f64,
    ) {
        self.clear();
        self.max_priority = max_priority;
        for (slot_index, slot) in slots.into_iter().enumerate().take(self.capacity) {
            if let Some((experience, priority)) = slot {
                self.entries[slot_index] = Some(ReplayEntry {
                    experience,
                    priority,
                });
                let scaled = priority.powf(self.alpha);
                self.set_leaf(slot_index, scaled);
                self.len += 1;
            }
        }
        self.cursor = cursor.min(self.capacity.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::test_experience;
    use crate::rng::SeedConfig;

    #[test]
    fn test_new_entries_take_running_max_priority() {
        let mut store = PrioritizedReplay::new(8, 0.6, 0.4);
        store.push(test_experience(0, 0, 0.0));
        store.update_priorities(&[0], &[5.0]);
        store.push(test_experience(0, 1, 0.0));
        // The fresh entry inherits the running max of 5.0.
        assert!((store.entries[1].as_ref().unwrap().priority - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_eviction_overwrites_oldest_slot() {
        let mut store = PrioritizedReplay::new(3, 0.6, 0.4);
        for i in 0..5 {
            store.push(test_experience(0, i, 0.0));
        }
        assert_eq!(store.len(), 3);
        let survivors: Vec<u32> = store
            .entries
            .iter()
            .flatten()
            .map(|e| e.experience.meta.move_number)
            .collect();
        // Ring order: slot 0 and 1 were overwritten by 3 and 4.
        assert!(survivors.contains(&2));
        assert!(survivors.contains(&3));
        assert!(survivors.contains(&4));
    }

    #[test]
    fn test_weights_are_max_normalized() {
        let mut store = PrioritizedReplay::new(8, 0.6, 0.4);
        for i in 0..8 {
            store.push(test_experience(0, i, 0.0));
        }
        store.update_priorities(&[0, 1, 2, 3, 4, 5, 6, 7], &[8.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let mut rng = SeedConfig::new(3).replay_rng();
        let batch = store.sample(8, &mut rng);
        let max = batch.weights.iter().cloned().fold(0.0f64, f64::max);
        assert!((max - 1.0).abs() < 1e-12);
        assert!(batch.weights.iter().all(|&w| w > 0.0 && w <= 1.0));
    }

    #[test]
    fn test_sum_tree_total_tracks_updates() {
        let mut store = PrioritizedReplay::new(4, 1.0, 0.4);
        for i in 0..4 {
            store.push(test_experience(0, i, 0.0));
        }
        assert!((store.total() - 4.0).abs() < 1e-12);
        store.update_priorities(&[2], &[3.0]);
        assert!((store.total() - 6.0).abs() < 1e-12);
    }
}
