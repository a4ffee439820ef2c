//! Bounded experience replay.
//!
//! One store, two sampling modes. Uniform draws distinct indices without
//! replacement; prioritized draws proportionally to `priority^α` through a
//! sum tree and returns max-normalized importance-sampling weights. In both
//! modes the capacity is a hard bound with FIFO-by-insertion eviction, and
//! every `push`/`sample`/`update_priorities` call is atomic with respect to
//! the others.

pub mod dump;
mod prioritized;
mod uniform;

use crate::encoding::{ActionIndex, StateVector};
use crate::error::{Result, TrainError};
use crate::rng::SeedConfig;
pub use dump::{DumpedExperience, ReplayDump};
pub use prioritized::PrioritizedReplay;
use rand_chacha::ChaCha12Rng;
use shakmaty::Color;
use std::sync::Mutex;
pub use uniform::UniformReplay;

use crate::config::{ReplayConfig, ReplayKind};

/// Per-experience bookkeeping carried alongside the transition.
#[derive(Debug, Clone)]
pub struct ExperienceMeta {
    pub game_id: u64,
    pub move_number: u32,
    /// Outcome-derived quality in [0, 1].
    pub quality: f64,
    /// The color that made the recorded move.
    pub color: Color,
}

/// One transition from the mover's perspective. `next_state` is the next
/// position with the same player to move, or the absorbing terminal
/// encoding; `next_legal` carries that position's legal action indices
/// (empty when terminal) for the masked double-Q target.
#[derive(Debug, Clone)]
pub struct Experience {
    pub state: StateVector,
    pub action: ActionIndex,
    pub reward: f64,
    pub next_state: StateVector,
    pub next_legal: Vec<ActionIndex>,
    pub terminal: bool,
    pub meta: ExperienceMeta,
}

/// A sampled minibatch. `weights` are all 1.0 under uniform sampling;
/// `indices` feed `update_priorities` after the learner computes TD errors.
#[derive(Debug)]
pub struct Batch {
    pub samples: Vec<Experience>,
    pub indices: Vec<usize>,
    pub weights: Vec<f64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

enum ReplayInner {
    Uniform(UniformReplay),
    Prioritized(PrioritizedReplay),
}

/// Thread-safe bounded replay store.
pub struct ReplayStore {
    inner: Mutex<ReplayInner>,
    rng: Mutex<ChaCha12Rng>,
    capacity: usize,
}

impl ReplayStore {
    /// Build from config; the sampling stream derives from the master seed.
    pub fn new(config: &ReplayConfig, seeds: &SeedConfig) -> Self {
        Self::with_rng(config, seeds.replay_rng())
    }

    pub fn with_rng(config: &ReplayConfig, rng: ChaCha12Rng) -> Self {
        let inner = match config.kind {
            ReplayKind::Uniform => ReplayInner::Uniform(UniformReplay::new(config.capacity)),
            ReplayKind::Prioritized => ReplayInner::Prioritized(PrioritizedReplay::new(
                config.capacity,
                config.alpha,
                config.beta,
            )),
        };
        ReplayStore {
            inner: Mutex::new(inner),
            rng: Mutex::new(rng),
            capacity: config.capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        match &*self.inner.lock().expect("replay lock") {
            ReplayInner::Uniform(store) => store.len(),
            ReplayInner::Prioritized(store) => store.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, experience: Experience) {
        match &mut *self.inner.lock().expect("replay lock") {
            ReplayInner::Uniform(store) => store.push(experience),
            ReplayInner::Prioritized(store) => store.push(experience),
        }
    }

    /// Draw a minibatch. Fails with `InsufficientData` when the store holds
    /// fewer entries than requested; callers gate on a warm-up threshold.
    pub fn sample(&self, batch_size: usize) -> Result<Batch> {
        let mut inner = self.inner.lock().expect("replay lock");
        let available = match &*inner {
            ReplayInner::Uniform(store) => store.len(),
            ReplayInner::Prioritized(store) => store.len(),
        };
        if batch_size == 0 || batch_size > available {
            return Err(TrainError::InsufficientData {
                requested: batch_size,
                available,
            });
        }
        let mut rng = self.rng.lock().expect("replay rng lock");
        match &mut *inner {
            ReplayInner::Uniform(store) => Ok(store.sample(batch_size, &mut rng)),
            ReplayInner::Prioritized(store) => Ok(store.sample(batch_size, &mut rng)),
        }
    }

    /// Feed back `|TD error| + ε` priorities for a sampled batch. A no-op
    /// under uniform sampling.
    pub fn update_priorities(&self, indices: &[usize], priorities: &[f64]) {
        if let ReplayInner::Prioritized(store) = &mut *self.inner.lock().expect("replay lock") {
            store.update_priorities(indices, priorities);
        }
    }

    pub fn clear(&self) {
        match &mut *self.inner.lock().expect("replay lock") {
            ReplayInner::Uniform(store) => store.clear(),
            ReplayInner::Prioritized(store) => store.clear(),
        }
    }

    /// Capture the sampling stream for checkpointing.
    pub fn rng_state(&self) -> crate::rng::RngState {
        crate::rng::RngState::capture(&self.rng.lock().expect("replay rng lock"))
    }

    /// Restore the sampling stream from a checkpoint.
    pub fn restore_rng(&self, state: &crate::rng::RngState) {
        *self.rng.lock().expect("replay rng lock") = state.restore();
    }

    /// Dump the full contents for a checkpoint. Uniform stores dump in FIFO
    /// order; prioritized stores preserve their exact ring layout.
    pub fn dump(&self, state_len: usize) -> ReplayDump {
        match &*self.inner.lock().expect("replay lock") {
            ReplayInner::Uniform(store) => ReplayDump {
                state_len,
                slots: store
                    .entries()
                    .map(|e| Some((DumpedExperience::from_experience(e), 1.0)))
                    .collect(),
                cursor: 0,
                max_priority: 1.0,
            },
            ReplayInner::Prioritized(store) => {
                let (slots, cursor, max_priority) = store.slots();
                ReplayDump {
                    state_len,
                    slots: slots
                        .into_iter()
                        .map(|slot| {
                            slot.map(|(e, p)| (DumpedExperience::from_experience(e), p))
                        })
                        .collect(),
                    cursor,
                    max_priority,
                }
            }
        }
    }

    /// Rebuild the contents from a checkpoint dump.
    pub fn restore_contents(&self, dump: &ReplayDump) -> Result<()> {
        let mut inner = self.inner.lock().expect("replay lock");
        match &mut *inner {
            ReplayInner::Uniform(store) => {
                store.clear();
                for slot in dump.slots.iter().flatten() {
                    store.push(slot.0.to_experience(dump.state_len)?);
                }
            }
            ReplayInner::Prioritized(store) => {
                let mut slots = Vec::with_capacity(dump.slots.len());
                for slot in &dump.slots {
                    slots.push(match slot {
                        Some((dumped, priority)) => {
                            Some((dumped.to_experience(dump.state_len)?, *priority))
                        }
                        None => None,
                    });
                }
                store.restore_slots(slots, dump.cursor, dump.max_priority);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_experience(game_id: u64, move_number: u32, reward: f64) -> Experience {
    use ndarray::Array1;
    Experience {
        state: Array1::from_elem(4, move_number as f64),
        action: (move_number % 4096) as ActionIndex,
        reward,
        next_state: Array1::zeros(4),
        next_legal: vec![0, 1],
        terminal: false,
        meta: ExperienceMeta {
            game_id,
            move_number,
            quality: 0.5,
            color: Color::White,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn store(kind: ReplayKind, capacity: usize) -> ReplayStore {
        let config = ReplayConfig {
            capacity,
            kind,
            alpha: 0.6,
            beta: 0.4,
        };
        ReplayStore::new(&config, &SeedConfig::new(42))
    }

    #[test]
    fn test_capacity_is_a_hard_bound() {
        for kind in [ReplayKind::Uniform, ReplayKind::Prioritized] {
            let store = store(kind, 8);
            assert_eq!(store.capacity(), 8);
            assert!(store.is_empty());
            for i in 0..50 {
                store.push(test_experience(0, i, 0.0));
                assert!(store.len() <= 8);
            }
            assert_eq!(store.len(), 8);
        }
    }

    #[test]
    fn test_fifo_eviction_keeps_newest() {
        let store = store(ReplayKind::Uniform, 4);
        for i in 0..10 {
            store.push(test_experience(0, i, 0.0));
        }
        // Only move numbers 6..=9 survive.
        let batch = store.sample(4).unwrap();
        let mut numbers: Vec<u32> = batch.samples.iter().map(|e| e.meta.move_number).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_insufficient_data() {
        let store = store(ReplayKind::Uniform, 16);
        store.push(test_experience(0, 0, 0.0));
        let err = store.sample(2).unwrap_err();
        assert_matches!(
            err,
            TrainError::InsufficientData {
                requested: 2,
                available: 1
            }
        );
    }

    #[test]
    fn test_uniform_sample_is_distinct() {
        let store = store(ReplayKind::Uniform, 32);
        for i in 0..32 {
            store.push(test_experience(0, i, 0.0));
        }
        for _ in 0..20 {
            let batch = store.sample(16).unwrap();
            let mut indices = batch.indices.clone();
            indices.sort_unstable();
            indices.dedup();
            assert_eq!(indices.len(), 16);
            assert!(batch.weights.iter().all(|&w| w == 1.0));
        }
    }

    #[test]
    fn test_clear_empties_the_store() {
        let store = store(ReplayKind::Prioritized, 16);
        for i in 0..10 {
            store.push(test_experience(0, i, 0.0));
        }
        store.clear();
        assert_eq!(store.len(), 0);
        assert!(store.sample(1).is_err());
    }

    #[test]
    fn test_priority_discipline() {
        // After update_priorities, the marginal draw probability of an index
        // tracks p^α / Σ p^α.
        let store = store(ReplayKind::Prioritized, 4);
        for i in 0..4 {
            store.push(test_experience(0, i, 0.0));
        }
        // Index 0 gets priority 9, the rest 1. With α = 0.6:
        // P(0) = 9^0.6 / (9^0.6 + 3) ≈ 0.5624.
        store.update_priorities(&[0, 1, 2, 3], &[9.0, 1.0, 1.0, 1.0]);
        let draws = 20_000;
        let mut hits = 0usize;
        for _ in 0..draws {
            let batch = store.sample(1).unwrap();
            if batch.indices[0] == 0 {
                hits += 1;
            }
        }
        let expected = 9f64.powf(0.6) / (9f64.powf(0.6) + 3.0);
        let observed = hits as f64 / draws as f64;
        assert!(
            (observed - expected).abs() < 0.02,
            "observed {} expected {}",
            observed,
            expected
        );
    }

    #[test]
    fn test_dump_restore_preserves_contents_and_sampling() {
        for kind in [ReplayKind::Uniform, ReplayKind::Prioritized] {
            let config = ReplayConfig {
                capacity: 8,
                kind,
                alpha: 0.6,
                beta: 0.4,
            };
            let original = ReplayStore::new(&config, &SeedConfig::new(42));
            for i in 0..12 {
                original.push(test_experience(0, i, i as f64 / 10.0));
            }
            original.update_priorities(&[0, 1], &[4.0, 2.0]);
            let dump = original.dump(4);

            let restored = ReplayStore::new(&config, &SeedConfig::new(42));
            restored.restore_contents(&dump).unwrap();
            assert_eq!(restored.len(), original.len());
            assert_eq!(restored.dump(4), dump);

            // Identical rng state + contents means identical draws.
            let state = original.rng_state();
            restored.restore_rng(&state);
            let a = original.sample(4).unwrap();
            let b = restored.sample(4).unwrap();
            assert_eq!(a.indices, b.indices);
            assert_eq!(a.weights, b.weights);
        }
    }

    #[test]
    fn test_rng_state_roundtrip_reproduces_draws() {
        let store = store(ReplayKind::Uniform, 32);
        for i in 0..32 {
            store.push(test_experience(0, i, 0.0));
        }
        let _ = store.sample(8).unwrap();
        let state = store.rng_state();
        let first = store.sample(8).unwrap().indices;
        store.restore_rng(&state);
        let second = store.sample(8).unwrap().indices;
        assert_eq!(first, second);
    }
}
