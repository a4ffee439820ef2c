//! Exploration strategies behind one `select` contract.
//!
//! Three families: ε-greedy, Boltzmann (softmax with temperature) and UCB.
//! The policy itself is configuration; the only mutable schedule parameter
//! decays geometrically to a floor, applied exactly once per training
//! iteration by the controller. UCB visit counts are per-selector-instance,
//! so every self-play game starts its own tally.

use crate::config::{ExplorationConfig, ExplorationStrategy};
use crate::encoding::ActionIndex;
use ndarray::Array1;
use rand::Rng;
use rand_chacha::ChaCha12Rng;
use std::collections::HashMap;

/// One exploration strategy with its live schedule parameter.
#[derive(Debug, Clone)]
pub enum ExplorationPolicy {
    EpsilonGreedy {
        epsilon: f64,
        decay: f64,
        floor: f64,
    },
    Softmax {
        temperature: f64,
        decay: f64,
        floor: f64,
    },
    Ucb {
        c: f64,
        counts: HashMap<ActionIndex, u64>,
        total: u64,
    },
}

impl ExplorationPolicy {
    pub fn from_config(config: &ExplorationConfig) -> Self {
        match config.strategy {
            ExplorationStrategy::EpsilonGreedy => ExplorationPolicy::EpsilonGreedy {
                epsilon: config.rate,
                decay: config.decay,
                floor: config.floor,
            },
            ExplorationStrategy::Boltzmann => ExplorationPolicy::Softmax {
                temperature: config.rate.max(1e-6),
                decay: config.decay,
                floor: config.floor.max(1e-6),
            },
            ExplorationStrategy::Ucb => ExplorationPolicy::Ucb {
                c: config.rate,
                counts: HashMap::new(),
                total: 0,
            },
        }
    }

    /// Rebuild the schedule parameter for a given iteration ordinal. Used on
    /// resume so the parameter is a pure function of the iteration count.
    pub fn schedule_for_iteration(config: &ExplorationConfig, iteration: u64) -> Self {
        let mut policy = Self::from_config(config);
        for _ in 0..iteration {
            policy.decay_step();
        }
        policy
    }

    /// The live schedule parameter (ε, τ, or the UCB constant).
    pub fn current_rate(&self) -> f64 {
        match self {
            ExplorationPolicy::EpsilonGreedy { epsilon, .. } => *epsilon,
            ExplorationPolicy::Softmax { temperature, .. } => *temperature,
            ExplorationPolicy::Ucb { c, .. } => *c,
        }
    }

    /// Apply one geometric decay step toward the floor. Called once per
    /// training iteration.
    pub fn decay_step(&mut self) {
        match self {
            ExplorationPolicy::EpsilonGreedy {
                epsilon,
                decay,
                floor,
            } => {
                *epsilon = (*epsilon * *decay).max(*floor);
            }
            ExplorationPolicy::Softmax {
                temperature,
                decay,
                floor,
            } => {
                *temperature = (*temperature * *decay).max(*floor);
            }
            ExplorationPolicy::Ucb { .. } => {}
        }
    }

    /// Pick one of `legal` given the full Q row. `legal` is never empty.
    pub fn select(
        &mut self,
        legal: &[ActionIndex],
        q_values: &Array1<f64>,
        rng: &mut ChaCha12Rng,
    ) -> ActionIndex {
        debug_assert!(!legal.is_empty());
        match self {
            ExplorationPolicy::EpsilonGreedy { epsilon, .. } => {
                if rng.random::<f64>() < *epsilon {
                    legal[rng.random_range(0..legal.len())]
                } else {
                    greedy(legal, q_values)
                }
            }
            ExplorationPolicy::Softmax { temperature, .. } => {
                softmax_draw(legal, q_values, *temperature, rng)
            }
            ExplorationPolicy::Ucb { c, counts, total } => {
                // Untried actions first, in legal order, so the opening
                // sweep is deterministic.
                let untried = legal
                    .iter()
                    .copied()
                    .find(|a| counts.get(a).copied().unwrap_or(0) == 0);
                let choice = match untried {
                    Some(untried) => untried,
                    None => {
                        let ln_total = (*total as f64).max(1.0).ln();
                        let mut best = legal[0];
                        let mut best_score = f64::NEG_INFINITY;
                        for &action in legal {
                            let n = counts[&action] as f64;
                            let score =
                                q_values[action as usize] + *c * (ln_total / n).sqrt();
                            if score > best_score {
                                best_score = score;
                                best = action;
                            }
                        }
                        best
                    }
                };
                *counts.entry(choice).or_insert(0) += 1;
                *total += 1;
                choice
            }
        }
    }
}

/// Argmax of the Q row restricted to `legal`, first-wins on ties.
pub fn greedy(legal: &[ActionIndex], q_values: &Array1<f64>) -> ActionIndex {
    let mut best = legal[0];
    let mut best_q = f64::NEG_INFINITY;
    for &action in legal {
        let q = q_values[action as usize];
        if q > best_q {
            best_q = q;
            best = action;
        }
    }
    best
}

fn softmax_draw(
    legal: &[ActionIndex],
    q_values: &Array1<f64>,
    temperature: f64,
    rng: &mut ChaCha12Rng,
) -> ActionIndex {
    let tau = temperature.max(1e-6);
    let max_q = legal
        .iter()
        .map(|&a| q_values[a as usize])
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = legal
        .iter()
        .map(|&a| ((q_values[a as usize] - max_q) / tau).exp())
        .collect();
    let total: f64 = exps.iter().sum();
    let mut target = rng.random::<f64>() * total;
    for (i, &mass) in exps.iter().enumerate() {
        target -= mass;
        if target <= 0.0 {
            return legal[i];
        }
    }
    legal[legal.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeedConfig;

    fn q_row(values: &[(usize, f64)]) -> Array1<f64> {
        let mut q = Array1::zeros(16);
        for &(i, v) in values {
            q[i] = v;
        }
        q
    }

    fn config(strategy: ExplorationStrategy, rate: f64) -> ExplorationConfig {
        ExplorationConfig {
            strategy,
            rate,
            decay: 0.5,
            floor: 0.1,
        }
    }

    #[test]
    fn test_epsilon_zero_is_pure_greedy() {
        let mut policy = ExplorationPolicy::EpsilonGreedy {
            epsilon: 0.0,
            decay: 0.5,
            floor: 0.0,
        };
        let q = q_row(&[(3, 5.0), (7, 1.0)]);
        let mut rng = SeedConfig::new(1).game_rng(0);
        for _ in 0..50 {
            assert_eq!(policy.select(&[3, 7, 9], &q, &mut rng), 3);
        }
    }

    #[test]
    fn test_epsilon_one_explores_legal_only() {
        let mut policy = ExplorationPolicy::EpsilonGreedy {
            epsilon: 1.0,
            decay: 0.5,
            floor: 0.0,
        };
        let q = q_row(&[]);
        let legal = [2u16, 5, 11];
        let mut rng = SeedConfig::new(2).game_rng(0);
        for _ in 0..100 {
            assert!(legal.contains(&policy.select(&legal, &q, &mut rng)));
        }
    }

    #[test]
    fn test_geometric_decay_to_floor() {
        let mut policy =
            ExplorationPolicy::from_config(&config(ExplorationStrategy::EpsilonGreedy, 0.8));
        let mut expected = 0.8;
        for _ in 0..10 {
            policy.decay_step();
            expected = (expected * 0.5f64).max(0.1);
            assert!((policy.current_rate() - expected).abs() < 1e-12);
        }
        assert!((policy.current_rate() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_schedule_for_iteration_matches_stepping() {
        let cfg = config(ExplorationStrategy::EpsilonGreedy, 0.9);
        let mut stepped = ExplorationPolicy::from_config(&cfg);
        for _ in 0..7 {
            stepped.decay_step();
        }
        let rebuilt = ExplorationPolicy::schedule_for_iteration(&cfg, 7);
        assert!((stepped.current_rate() - rebuilt.current_rate()).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_prefers_high_q_at_low_temperature() {
        let mut policy = ExplorationPolicy::Softmax {
            temperature: 0.01,
            decay: 1.0,
            floor: 0.01,
        };
        let q = q_row(&[(4, 10.0), (6, 0.0)]);
        let mut rng = SeedConfig::new(3).game_rng(0);
        let mut hits = 0;
        for _ in 0..200 {
            if policy.select(&[4, 6], &q, &mut rng) == 4 {
                hits += 1;
            }
        }
        assert!(hits >= 199);
    }

    #[test]
    fn test_ucb_sweeps_untried_actions_first() {
        let mut policy = ExplorationPolicy::Ucb {
            c: 1.4,
            counts: HashMap::new(),
            total: 0,
        };
        let q = q_row(&[(1, 1.0)]);
        let legal = [1u16, 2, 3];
        let mut rng = SeedConfig::new(4).game_rng(0);
        let first: Vec<ActionIndex> = (0..3).map(|_| policy.select(&legal, &q, &mut rng)).collect();
        assert_eq!(first, vec![1, 2, 3]);
        // Every action tried once; now the Q term dominates with equal counts.
        assert_eq!(policy.select(&legal, &q, &mut rng), 1);
    }
}
