//! Parallel game generation for one iteration.
//!
//! Up to `W` rayon workers draw games from the pool's shared queue; results
//! funnel through a channel to the single consumer in completion order
//! (order inside each game is preserved by the worker). Each game's agents
//! are built by the caller from the game's ordinal, which also keys its RNG
//! stream, so per-game sequences are deterministic regardless of scheduling
//! and the whole byte stream is deterministic when `W = 1`.

use crate::agent::Agent;
use crate::config::{RewardConfig, SelfPlayConfig};
use crate::selfplay::worker::{play_game, GameResult, TerminationReason};
use shakmaty::Color;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

/// One queued game: ordinal (global across the run) and the learner's color.
#[derive(Debug, Clone, Copy)]
pub struct GameTask {
    pub ordinal: u64,
    pub learner_color: Color,
}

impl GameTask {
    /// Colors alternate across consecutive ordinals so every game pair is
    /// color-symmetric.
    pub fn for_ordinal(ordinal: u64) -> Self {
        GameTask {
            ordinal,
            learner_color: if ordinal % 2 == 0 {
                Color::White
            } else {
                Color::Black
            },
        }
    }
}

pub struct SelfPlayOrchestrator {
    pool: rayon::ThreadPool,
    stop: Arc<AtomicBool>,
}

impl SelfPlayOrchestrator {
    /// Build a pool with exactly `workers` threads.
    pub fn new(workers: usize, stop: Arc<AtomicBool>) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("selfplay-{}", i))
            .build()
            .expect("self-play thread pool");
        SelfPlayOrchestrator { pool, stop }
    }

    /// Cooperative stop: workers finish their current game and exit; queued
    /// games are discarded.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Run `tasks` through the pool. `make_agents` builds the (learner,
    /// opponent) pair for one task; it runs on worker threads. Results come
    /// back in completion order. A stop raised mid-run lets in-flight games
    /// complete (their experiences stay valid) but tags their results
    /// `Manual`; games that have not started are discarded.
    pub fn run_games<F>(
        &self,
        tasks: &[GameTask],
        make_agents: F,
        collect: bool,
        selfplay: &SelfPlayConfig,
        rewards: &RewardConfig,
    ) -> Vec<GameResult>
    where
        F: Fn(GameTask) -> (Box<dyn Agent>, Box<dyn Agent>) + Sync,
    {
        let (sender, receiver) = mpsc::channel::<GameResult>();
        let stop = &self.stop;
        let make_agents = &make_agents;

        self.pool.scope(|scope| {
            for &task in tasks {
                let sender = sender.clone();
                scope.spawn(move |_| {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    let (mut learner, mut opponent) = make_agents(task);
                    let mut result = play_game(
                        task.ordinal,
                        learner.as_mut(),
                        opponent.as_mut(),
                        task.learner_color,
                        collect,
                        selfplay,
                        rewards,
                    );
                    // The stop arrived while this game was in flight: the
                    // game still ran to completion, but its result carries
                    // the interruption.
                    if stop.load(Ordering::SeqCst) {
                        result.termination = TerminationReason::Manual;
                    }
                    // The receiver outlives the scope; a send only fails on
                    // shutdown races, which discard the game by design.
                    let _ = sender.send(result);
                });
            }
            drop(sender);
        });

        receiver.into_iter().collect()
    }
}
