//! The outer training loop.
//!
//! Strict per-iteration phase order: SelfPlaying → Training → Evaluating →
//! Checkpointing, until the iteration cap, an early-stop criterion or the
//! operator's stop flag. The controller owns the master RNG stream and the
//! seed configuration; every component receives its partitioned stream at
//! construction and nothing else in the process draws randomness.

use crate::agent::{Agent, NetAgent};
use crate::checkpoint::{CheckpointMeta, CheckpointPayload, CheckpointStore};
use crate::config::TrainingConfig;
use crate::encoding::{ACTION_SPACE, STATE_SIZE};
use crate::error::{Result, TrainError};
use crate::eval::harness::{CompareReport, EvalReport, EvaluationHarness};
use crate::eval::stats::variance;
use crate::exploration::ExplorationPolicy;
use crate::learner::DQNLearner;
use crate::metrics::{IterationMetrics, MetricsHistory};
use crate::network::NetworkParams;
use crate::opponents::OpponentSpec;
use crate::replay::ReplayStore;
use crate::rng::{RngState, SeedConfig};
use crate::selfplay::{GameResult, GameTask, SelfPlayOrchestrator, TerminationReason};
use rand::Rng;
use rand_chacha::ChaCha12Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Priority floor added to |TD error| so no sampled entry starves.
const PRIORITY_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    SelfPlaying,
    Training,
    Evaluating,
    Checkpointing,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured iteration cap was reached.
    Completed,
    /// Rolling win-rate variance stayed below the threshold.
    Stagnation,
    /// Stability score cleared the bar with a non-negative trend.
    Converged,
    /// Numeric instability persisted across consecutive iterations.
    Unstable,
    /// No new best within the patience budget.
    Patience,
    /// Operator stop signal.
    Operator,
}

/// What a finished run reports back to the caller.
#[derive(Debug)]
pub struct RunSummary {
    pub iterations_completed: u64,
    pub stop_reason: StopReason,
    pub best: Option<CheckpointMeta>,
    pub final_eval: Option<EvalReport>,
}

pub struct TrainingController {
    config: TrainingConfig,
    seeds: SeedConfig,
    learner: DQNLearner,
    replay: ReplayStore,
    store: CheckpointStore,
    orchestrator: SelfPlayOrchestrator,
    harness: EvaluationHarness,
    history: MetricsHistory,
    exploration: ExplorationPolicy,
    master_rng: ChaCha12Rng,
    state: ControllerState,
    /// Completed iterations; also the ordinal of the next one.
    iteration: u64,
    games_played_total: u64,
    best_score: Option<f64>,
    best_iteration: Option<u64>,
    /// Primary eval scores per completed iteration, rebuilt from the
    /// history file on resume so early-stop windows survive restarts.
    eval_scores: Vec<f64>,
    unstable_streak: u32,
    stop_flag: Arc<AtomicBool>,
}

impl TrainingController {
    /// Fresh run. Fails fast on invalid configuration.
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;

        let master_seed = match config.seed {
            Some(seed) => seed,
            None => {
                let seed = rand::rng().random();
                log::info!("[Controller] no seed configured, using {}", seed);
                seed
            }
        };
        let seeds = SeedConfig::new(master_seed);

        let mut init_rng = seeds.nn_init_rng();
        let learner = DQNLearner::new(&config.learner, STATE_SIZE, ACTION_SPACE, &mut init_rng);
        log::info!(
            "[Controller] online network: {} inputs, hidden {:?}, {} actions",
            STATE_SIZE,
            config.learner.hidden_layers,
            ACTION_SPACE
        );

        let replay = ReplayStore::new(&config.replay, &seeds);
        let store = CheckpointStore::open(
            &config.checkpoint.dir,
            config.checkpoint.format,
            config.checkpoint.max_versions,
        )?;
        let stop_flag = Arc::new(AtomicBool::new(false));
        let orchestrator =
            SelfPlayOrchestrator::new(config.effective_workers(), stop_flag.clone());
        let harness = EvaluationHarness::new(
            seeds,
            config.selfplay.clone(),
            config.rewards.clone(),
        );
        let history = MetricsHistory::new(&config.checkpoint.dir);
        let exploration = ExplorationPolicy::from_config(&config.exploration);
        let master_rng = seeds.master_rng();

        Ok(TrainingController {
            config,
            seeds,
            learner,
            replay,
            store,
            orchestrator,
            harness,
            history,
            exploration,
            master_rng,
            state: ControllerState::Idle,
            iteration: 0,
            games_played_total: 0,
            best_score: None,
            best_iteration: None,
            eval_scores: Vec::new(),
            unstable_streak: 0,
            stop_flag,
        })
    }

    /// Rebuild a controller from a checkpoint blob and continue the run it
    /// came from. With identical config the remaining iterations reproduce
    /// the original run byte-identically.
    pub fn resume(config: TrainingConfig, checkpoint_path: &std::path::Path) -> Result<Self> {
        let payload =
            CheckpointStore::load_by_path(checkpoint_path, config.checkpoint.format)?;
        let mut controller = Self::new(config)?;

        controller.learner.restore(&payload.snapshot)?;
        controller.master_rng = payload.rng_master.restore();
        controller.replay.restore_contents(&payload.replay)?;
        controller.replay.restore_rng(&payload.rng_replay);
        controller.iteration = payload.iteration;
        controller.games_played_total = payload.games_played_total;
        controller.best_score = payload.best_score;
        controller.best_iteration = payload.best_iteration;
        controller.unstable_streak = payload.unstable_streak;
        controller.exploration = ExplorationPolicy::schedule_for_iteration(
            &controller.config.exploration,
            payload.iteration,
        );
        controller.eval_scores = controller
            .history
            .read_all()?
            .into_iter()
            .filter(|m| m.iteration <= payload.iteration)
            .map(|m| m.eval_score)
            .collect();

        log::info!(
            "[Controller] resumed at iteration {} ({} games played, {} replay entries)",
            payload.iteration,
            payload.games_played_total,
            controller.replay.len()
        );
        Ok(controller)
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Handle for the operator's stop signal (shared with the worker pool).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    /// Run until the iteration cap, early stop, or operator stop.
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut final_eval = None;
        let mut stop_reason = StopReason::Completed;

        while self.iteration < self.config.iterations {
            if self.stop_flag.load(Ordering::SeqCst) {
                stop_reason = StopReason::Operator;
                break;
            }
            let (report, metrics) = self.run_iteration()?;
            final_eval = Some(report);
            metrics.log();

            if let Some(reason) = self.early_stop_reason() {
                log::info!("[Controller] early stop: {:?}", reason);
                stop_reason = reason;
                break;
            }
        }

        self.state = ControllerState::Stopped;
        Ok(RunSummary {
            iterations_completed: self.iteration,
            stop_reason,
            best: self.store.best().cloned(),
            final_eval,
        })
    }

    /// One full iteration. Returns the primary evaluation report and the
    /// appended metrics row.
    fn run_iteration(&mut self) -> Result<(EvalReport, IterationMetrics)> {
        let ordinal = self.iteration;
        let mut metrics = IterationMetrics {
            iteration: ordinal + 1,
            ..IterationMetrics::default()
        };

        // ---- Self-play ----
        self.state = ControllerState::SelfPlaying;
        let selfplay_start = Instant::now();
        let results = self.selfplay_phase()?;
        metrics.selfplay_secs = selfplay_start.elapsed().as_secs_f64();

        metrics.games_played = results.len() as u64;
        for result in &results {
            metrics.experiences_collected += result.experiences.len() as u64;
            metrics.avg_game_length += f64::from(result.length);
            metrics.fallbacks += result.fallbacks;
            if result.termination == TerminationReason::StepLimit {
                metrics.step_limit_games += 1;
            }
        }
        if !results.is_empty() {
            metrics.avg_game_length /= results.len() as f64;
        }
        for result in results {
            // Completion order between games, generation order within one.
            for experience in result.experiences {
                self.replay.push(experience);
            }
            self.games_played_total += 1;
        }
        metrics.replay_len = self.replay.len() as u64;

        // ---- Training ----
        self.state = ControllerState::Training;
        let train_start = Instant::now();
        let unstable_before = self.learner.unstable_batches();
        self.training_phase(metrics.games_played as usize, &mut metrics)?;
        metrics.unstable_batches = self.learner.unstable_batches() - unstable_before;
        metrics.train_secs = train_start.elapsed().as_secs_f64();

        // ---- Evaluation ----
        self.state = ControllerState::Evaluating;
        let eval_start = Instant::now();
        let report = self.evaluation_phase(ordinal, &mut metrics)?;
        metrics.eval_secs = eval_start.elapsed().as_secs_f64();

        // ---- Checkpoint ----
        self.state = ControllerState::Checkpointing;
        self.iteration += 1;
        let score = report.score;
        let is_best = self.best_score.map_or(true, |best| score > best);
        if is_best {
            self.best_score = Some(score);
            self.best_iteration = Some(self.iteration);
        }
        metrics.eval_score = score;
        metrics.exploration_rate = self.exploration.current_rate();

        let due = self.iteration % self.config.checkpoint.every == 0
            || is_best
            || self.iteration == self.config.iterations;
        if due {
            let payload = self.payload();
            let meta = self.store.save(
                &payload,
                score,
                &format!("iteration {} vs {}", self.iteration, report.opponent),
                &self.seeds.fingerprint(),
            )?;
            log::info!(
                "[Controller] saved {}{}",
                meta.id,
                if meta.is_best { " (new best)" } else { "" }
            );
        }

        self.eval_scores.push(score);
        if metrics.unstable_batches > 0 {
            self.unstable_streak += 1;
        } else {
            self.unstable_streak = 0;
        }
        self.exploration.decay_step();
        self.history.append(&metrics)?;

        Ok((report, metrics))
    }

    /// Generate this iteration's games against an opponent drawn from the
    /// snapshot pool (latest best, mixed with random historical snapshots),
    /// or the heuristic baseline while the pool is still empty.
    fn selfplay_phase(&mut self) -> Result<Vec<GameResult>> {
        let (opponent_spec, opponent_params) = self.pick_opponent()?;
        log::debug!(
            "[SelfPlay] iteration {} opponent {}",
            self.iteration + 1,
            opponent_spec
        );

        let online = Arc::new(self.learner.online_params().into_net()?);
        let seeds = self.seeds;
        let exploration = self.exploration.clone();
        let opponent_params = opponent_params.as_ref();

        let tasks: Vec<GameTask> = (0..self.config.selfplay.games_per_iteration as u64)
            .map(|i| GameTask::for_ordinal(self.games_played_total + i))
            .collect();

        let results = self.orchestrator.run_games(
            &tasks,
            |task| {
                let learner_rng = seeds.game_rng(task.ordinal);
                let opponent_rng = seeds.game_rng(task.ordinal ^ u64::MAX);
                let learner: Box<dyn Agent> = Box::new(NetAgent::new(
                    "learner",
                    online.clone(),
                    Some(exploration.clone()),
                    learner_rng,
                ));
                let opponent =
                    crate::opponents::build_opponent(&opponent_spec, opponent_params, opponent_rng)
                        .expect("opponent resolved before the phase started");
                (learner, opponent)
            },
            true,
            &self.config.selfplay,
            &self.config.rewards,
        );
        Ok(results)
    }

    /// Opponent-pool policy: latest best with probability `1 - p_mix`, a
    /// random historical snapshot with probability `p_mix`.
    fn pick_opponent(&mut self) -> Result<(OpponentSpec, Option<NetworkParams>)> {
        let pool: Vec<CheckpointMeta> = self.store.list().to_vec();
        if pool.is_empty() {
            return Ok((OpponentSpec::Heuristic, None));
        }
        let mix = self.master_rng.random::<f64>() < self.config.selfplay.opponent_mix;
        let meta = if mix {
            &pool[self.master_rng.random_range(0..pool.len())]
        } else {
            self.store.best().unwrap_or(&pool[pool.len() - 1])
        };
        let payload = self.store.load(&meta.id, self.config.checkpoint.format)?;
        Ok((
            OpponentSpec::Snapshot(meta.id.clone()),
            Some(payload.snapshot.online),
        ))
    }

    /// Batched learner updates, gated on warm-up. Priorities are refreshed
    /// from |TD error| after every consumed batch.
    fn training_phase(&mut self, games: usize, metrics: &mut IterationMetrics) -> Result<()> {
        if self.replay.len() < self.config.learner.warmup {
            log::debug!(
                "[Training] skipping: replay {} below warm-up {}",
                self.replay.len(),
                self.config.learner.warmup
            );
            return Ok(());
        }

        let updates = self.config.updates_for_iteration(games);
        let mut loss_sum = 0.0;
        let mut loss_sq_sum = 0.0;
        let mut entropy_sum = 0.0;
        let mut grad_sum = 0.0;
        let mut applied = 0u64;

        for _ in 0..updates {
            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }
            let batch = match self.replay.sample(self.config.learner.batch_size) {
                Ok(batch) => batch,
                Err(TrainError::InsufficientData { .. }) => break,
                Err(error) => return Err(error),
            };
            let stats = self.learner.train_batch(&batch);
            if stats.numeric_fault {
                continue;
            }
            let priorities: Vec<f64> =
                stats.td_abs.iter().map(|d| d + PRIORITY_EPSILON).collect();
            self.replay.update_priorities(&batch.indices, &priorities);

            loss_sum += stats.loss_mean;
            loss_sq_sum += stats.loss_mean * stats.loss_mean;
            entropy_sum += stats.policy_entropy;
            grad_sum += stats.grad_norm;
            applied += 1;
        }

        if applied > 0 {
            let n = applied as f64;
            metrics.loss_mean = loss_sum / n;
            metrics.loss_variance = (loss_sq_sum / n - metrics.loss_mean * metrics.loss_mean)
                .max(0.0);
            metrics.policy_entropy = entropy_sum / n;
            metrics.grad_norm = grad_sum / n;
        }
        metrics.updates_applied = applied;
        Ok(())
    }

    /// Evaluate against every configured reference opponent; the first one
    /// supplies the promotion score.
    fn evaluation_phase(
        &mut self,
        ordinal: u64,
        metrics: &mut IterationMetrics,
    ) -> Result<EvalReport> {
        let params = self.learner.online_params();
        let mut primary: Option<EvalReport> = None;
        let opponents = self.config.eval.opponents.clone();
        for spec in &opponents {
            let snapshot_params = self.resolve_snapshot(spec)?;
            let report = self.harness.evaluate(
                &self.orchestrator,
                &params,
                spec,
                snapshot_params.as_ref(),
                self.config.eval.games,
                ordinal,
            )?;
            // Fallbacks are a first-class metric: every opponent's count
            // lands in the iteration row, not just the scored one's.
            metrics.fallbacks += report.fallbacks;
            if primary.is_none() {
                metrics.wins = report.wins;
                metrics.draws = report.draws;
                metrics.losses = report.losses;
                primary = Some(report);
            }
        }
        primary.ok_or_else(|| TrainError::ConfigInvalid {
            issues: vec!["eval.opponents must name at least one opponent".to_string()],
        })
    }

    fn resolve_snapshot(&self, spec: &OpponentSpec) -> Result<Option<NetworkParams>> {
        if let OpponentSpec::Snapshot(id) = spec {
            let payload = self.store.load(id, self.config.checkpoint.format)?;
            Ok(Some(payload.snapshot.online))
        } else {
            Ok(None)
        }
    }

    fn payload(&self) -> CheckpointPayload {
        CheckpointPayload {
            iteration: self.iteration,
            games_played_total: self.games_played_total,
            best_score: self.best_score,
            best_iteration: self.best_iteration,
            unstable_streak: self.unstable_streak,
            snapshot: self.learner.snapshot(),
            replay: self.replay.dump(STATE_SIZE),
            rng_master: RngState::capture(&self.master_rng),
            rng_replay: self.replay.rng_state(),
        }
    }

    /// Early-stop criteria in priority order.
    fn early_stop_reason(&self) -> Option<StopReason> {
        let stopping = &self.config.stopping;

        if self.unstable_streak >= stopping.instability_limit {
            return Some(StopReason::Unstable);
        }

        if self.eval_scores.len() >= stopping.window {
            let window = &self.eval_scores[self.eval_scores.len() - stopping.window..];
            let var = variance(window);
            let stability = 1.0 / (1.0 + var);
            let trend = window[window.len() - 1] - window[0];

            if stability > stopping.convergence_score && trend >= 0.0 {
                return Some(StopReason::Converged);
            }
            if var < stopping.stagnation_variance {
                return Some(StopReason::Stagnation);
            }
        }

        if let Some(best_iteration) = self.best_iteration {
            if self.iteration.saturating_sub(best_iteration) >= stopping.patience {
                return Some(StopReason::Patience);
            }
        }

        None
    }
}

/// Evaluate a checkpoint blob against one opponent without a controller
/// (CLI `eval` subcommand).
pub fn evaluate_checkpoint(
    config: &TrainingConfig,
    checkpoint_path: &std::path::Path,
    spec: &OpponentSpec,
    games: usize,
) -> Result<EvalReport> {
    config.validate()?;
    let payload = CheckpointStore::load_by_path(checkpoint_path, config.checkpoint.format)?;
    let seeds = SeedConfig::new(config.seed.unwrap_or(0));
    let orchestrator = SelfPlayOrchestrator::new(
        config.effective_workers(),
        Arc::new(AtomicBool::new(false)),
    );
    let harness = EvaluationHarness::new(seeds, config.selfplay.clone(), config.rewards.clone());
    harness.evaluate(
        &orchestrator,
        &payload.snapshot.online,
        spec,
        None,
        games,
        payload.iteration,
    )
}

/// Head-to-head between two checkpoint blobs (CLI `compare` subcommand).
pub fn compare_checkpoints(
    config: &TrainingConfig,
    path_a: &std::path::Path,
    path_b: &std::path::Path,
    games: usize,
) -> Result<CompareReport> {
    config.validate()?;
    let a = CheckpointStore::load_by_path(path_a, config.checkpoint.format)?;
    let b = CheckpointStore::load_by_path(path_b, config.checkpoint.format)?;
    let seeds = SeedConfig::new(config.seed.unwrap_or(0));
    let orchestrator = SelfPlayOrchestrator::new(
        config.effective_workers(),
        Arc::new(AtomicBool::new(false)),
    );
    let harness = EvaluationHarness::new(seeds, config.selfplay.clone(), config.rewards.clone());
    harness.compare(
        &orchestrator,
        &a.snapshot.online,
        &b.snapshot.online,
        games,
        a.iteration.max(b.iteration),
    )
}
