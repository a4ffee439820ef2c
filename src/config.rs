//! Process-wide training configuration.
//!
//! One record per subsystem, aggregated into [`TrainingConfig`]. The whole
//! tree is immutable after startup: it is loaded from a JSON file (unknown
//! fields rejected), optionally overridden from the CLI, then validated in
//! one pass that collects every problem before the process refuses to start.

use crate::error::{Result, TrainError};
use crate::opponents::OpponentSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Optimizer family for the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    /// SGD with momentum 0.9.
    Sgd,
}

/// Replay sampling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayKind {
    Uniform,
    Prioritized,
}

/// Exploration strategy family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationStrategy {
    EpsilonGreedy,
    Boltzmann,
    Ucb,
}

/// Serializer family for checkpoint parameter blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamsFormat {
    /// Compact length-prefixed little-endian binary. Default.
    Binary,
    /// JSON debug family; larger, diffable.
    Json,
}

impl ParamsFormat {
    pub fn tag_byte(self) -> u8 {
        match self {
            ParamsFormat::Binary => b'B',
            ParamsFormat::Json => b'J',
        }
    }

    pub fn from_tag_byte(tag: u8) -> Option<Self> {
        match tag {
            b'B' => Some(ParamsFormat::Binary),
            b'J' => Some(ParamsFormat::Json),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamsFormat::Binary => "binary",
            ParamsFormat::Json => "json",
        }
    }
}

/// Self-play shape for one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelfPlayConfig {
    /// Games generated per iteration.
    pub games_per_iteration: usize,
    /// Hard step cap per game; hitting it triggers material adjudication.
    pub max_steps_per_game: u32,
    /// Worker threads. Forced to 1 in deterministic mode.
    pub workers: usize,
    /// Probability of drawing a random historical snapshot instead of the
    /// current best as the self-play opponent.
    pub opponent_mix: f64,
    /// Material margin (pawn units) above which an adjudicated game is a
    /// win for the stronger side; otherwise a draw. Configured once,
    /// referenced everywhere.
    pub adjudication_material_margin: i32,
}

impl Default for SelfPlayConfig {
    fn default() -> Self {
        Self {
            games_per_iteration: 20,
            max_steps_per_game: 200,
            workers: 4,
            opponent_mix: 0.2,
            adjudication_material_margin: 5,
        }
    }
}

/// Learner hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LearnerConfig {
    /// Minibatch size drawn from replay.
    pub batch_size: usize,
    /// Learner updates per iteration; 0 means games-this-iteration ×
    /// `updates_per_game`.
    pub updates_per_iteration: usize,
    /// Updates per generated game when `updates_per_iteration` is 0.
    pub updates_per_game: usize,
    /// Replay size below which the training phase is skipped.
    pub warmup: usize,
    /// Discount factor.
    pub gamma: f64,
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,
    /// Hidden layer widths of the Q network.
    pub hidden_layers: Vec<usize>,
    /// Decouple action selection from evaluation in the bootstrap target.
    pub double_dqn: bool,
    /// Updates between full target ← online replacements.
    pub target_update_every: u64,
    /// Global gradient L2 ceiling.
    pub grad_clip_norm: f64,
    /// Huber transition point.
    pub huber_delta: f64,
    /// Restrict the bootstrap argmax to the next state's legal actions when
    /// the experience carries them; degrades to all actions when absent.
    pub mask_next_state: bool,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            updates_per_iteration: 0,
            updates_per_game: 4,
            warmup: 500,
            gamma: 0.99,
            learning_rate: 1e-3,
            optimizer: OptimizerKind::Adam,
            hidden_layers: vec![256, 128],
            double_dqn: true,
            target_update_every: 200,
            grad_clip_norm: 10.0,
            huber_delta: 1.0,
            mask_next_state: true,
        }
    }
}

/// Replay store shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplayConfig {
    /// Hard capacity bound; oldest entries are evicted on overflow.
    pub capacity: usize,
    pub kind: ReplayKind,
    /// Prioritization exponent α.
    pub alpha: f64,
    /// Importance-sampling exponent β.
    pub beta: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity: 50_000,
            kind: ReplayKind::Uniform,
            alpha: 0.6,
            beta: 0.4,
        }
    }
}

/// Exploration schedule. `rate` is ε for ε-greedy, τ for Boltzmann and the
/// confidence constant for UCB.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExplorationConfig {
    pub strategy: ExplorationStrategy,
    pub rate: f64,
    /// Geometric decay factor applied once per iteration.
    pub decay: f64,
    /// Decay floor.
    pub floor: f64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            strategy: ExplorationStrategy::EpsilonGreedy,
            rate: 0.2,
            decay: 0.98,
            floor: 0.02,
        }
    }
}

/// Evaluation gate shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvalConfig {
    /// Games per opponent per evaluation round.
    pub games: usize,
    /// Reference opponents; the first one supplies the promotion score.
    pub opponents: Vec<OpponentSpec>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            games: 40,
            opponents: vec![OpponentSpec::Heuristic],
        }
    }
}

/// Terminal reward shape, from the mover's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RewardConfig {
    pub win_reward: f64,
    pub loss_reward: f64,
    pub draw_reward: f64,
    /// Added to every non-terminal step; small and usually negative.
    pub step_penalty: f64,
    /// Added to both terminal rewards when the step cap fires.
    pub step_limit_penalty: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            win_reward: 1.0,
            loss_reward: -1.0,
            draw_reward: 0.0,
            step_penalty: 0.0,
            step_limit_penalty: -0.1,
        }
    }
}

/// Persistence shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
    /// Save cadence in iterations; new-best snapshots are always saved.
    pub every: u64,
    /// Version cap; overflow evicts the worst-performing non-best.
    pub max_versions: usize,
    pub format: ParamsFormat,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("checkpoints"),
            every: 1,
            max_versions: 20,
            format: ParamsFormat::Binary,
        }
    }
}

/// Early-stop criteria for the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoppingConfig {
    /// Rolling window length for stagnation and convergence checks.
    pub window: usize,
    /// Win-rate variance below which the run counts as stagnant.
    pub stagnation_variance: f64,
    /// Stability score above which (with non-negative trend) the run counts
    /// as converged.
    pub convergence_score: f64,
    /// Consecutive unstable iterations before the controller aborts.
    pub instability_limit: u32,
    /// Iterations without a new best before patience fires.
    pub patience: u64,
}

impl Default for StoppingConfig {
    fn default() -> Self {
        Self {
            window: 10,
            stagnation_variance: 1e-4,
            convergence_score: 0.95,
            instability_limit: 3,
            patience: 50,
        }
    }
}

/// The aggregated, process-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Master seed; every stream derives from it. Absent means a
    /// non-reproducible run seeded from entropy.
    pub seed: Option<u64>,
    /// Force `workers = 1` so the experience byte sequence is a pure
    /// function of the master seed.
    pub deterministic_mode: bool,
    /// Outer-loop iteration cap.
    pub iterations: u64,
    pub selfplay: SelfPlayConfig,
    pub learner: LearnerConfig,
    pub replay: ReplayConfig,
    pub exploration: ExplorationConfig,
    pub eval: EvalConfig,
    pub rewards: RewardConfig,
    pub checkpoint: CheckpointConfig,
    pub stopping: StoppingConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: None,
            deterministic_mode: false,
            iterations: 100,
            selfplay: SelfPlayConfig::default(),
            learner: LearnerConfig::default(),
            replay: ReplayConfig::default(),
            exploration: ExplorationConfig::default(),
            eval: EvalConfig::default(),
            rewards: RewardConfig::default(),
            checkpoint: CheckpointConfig::default(),
            stopping: StoppingConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Load from a JSON file. Unknown fields are rejected so typos surface
    /// here rather than as silently ignored options.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: TrainingConfig = serde_json::from_str(&text).map_err(|e| {
            TrainError::ConfigInvalid {
                issues: vec![format!("{}: {}", path.display(), e)],
            }
        })?;
        Ok(config)
    }

    /// Worker count after applying deterministic mode.
    pub fn effective_workers(&self) -> usize {
        if self.deterministic_mode {
            1
        } else {
            self.selfplay.workers.max(1)
        }
    }

    /// Learner updates for an iteration that generated `games` games.
    pub fn updates_for_iteration(&self, games: usize) -> usize {
        if self.learner.updates_per_iteration > 0 {
            self.learner.updates_per_iteration
        } else {
            games * self.learner.updates_per_game
        }
    }

    /// Validate the whole tree, collecting every problem.
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();

        if self.iterations == 0 {
            issues.push("iterations must be at least 1".to_string());
        }
        if self.selfplay.games_per_iteration == 0 {
            issues.push("selfplay.games_per_iteration must be at least 1".to_string());
        }
        if self.selfplay.max_steps_per_game == 0 {
            issues.push("selfplay.max_steps_per_game must be at least 1".to_string());
        }
        if self.selfplay.workers == 0 {
            issues.push("selfplay.workers must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.selfplay.opponent_mix) {
            issues.push("selfplay.opponent_mix must be in [0, 1]".to_string());
        }
        if self.selfplay.adjudication_material_margin < 0 {
            issues.push("selfplay.adjudication_material_margin must be non-negative".to_string());
        }

        if self.learner.batch_size == 0 {
            issues.push("learner.batch_size must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.learner.gamma) || self.learner.gamma == 0.0 {
            issues.push("learner.gamma must be in (0, 1]".to_string());
        }
        if self.learner.learning_rate <= 0.0 {
            issues.push("learner.learning_rate must be positive".to_string());
        }
        if self.learner.target_update_every == 0 {
            issues.push("learner.target_update_every must be at least 1".to_string());
        }
        if self.learner.grad_clip_norm <= 0.0 {
            issues.push("learner.grad_clip_norm must be positive".to_string());
        }
        if self.learner.huber_delta <= 0.0 {
            issues.push("learner.huber_delta must be positive".to_string());
        }
        if self.learner.warmup < self.learner.batch_size {
            issues.push("learner.warmup must be at least learner.batch_size".to_string());
        }

        if self.replay.capacity == 0 {
            issues.push("replay.capacity must be at least 1".to_string());
        }
        if self.replay.capacity < self.learner.batch_size {
            issues.push("replay.capacity must be at least learner.batch_size".to_string());
        }
        if self.replay.alpha < 0.0 {
            issues.push("replay.alpha must be non-negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.replay.beta) {
            issues.push("replay.beta must be in [0, 1]".to_string());
        }

        if self.exploration.rate < 0.0 {
            issues.push("exploration.rate must be non-negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.exploration.decay) || self.exploration.decay == 0.0 {
            issues.push("exploration.decay must be in (0, 1]".to_string());
        }
        if self.exploration.floor < 0.0 || self.exploration.floor > self.exploration.rate {
            issues.push("exploration.floor must be in [0, exploration.rate]".to_string());
        }
        if self.exploration.strategy == ExplorationStrategy::EpsilonGreedy
            && self.exploration.rate > 1.0
        {
            issues.push("exploration.rate must be in [0, 1] for epsilon_greedy".to_string());
        }

        if self.eval.games == 0 {
            issues.push("eval.games must be at least 1".to_string());
        }
        if self.eval.opponents.is_empty() {
            issues.push("eval.opponents must name at least one opponent".to_string());
        }

        if self.checkpoint.every == 0 {
            issues.push("checkpoint.every must be at least 1".to_string());
        }
        if self.checkpoint.max_versions == 0 {
            issues.push("checkpoint.max_versions must be at least 1".to_string());
        }

        if self.stopping.window == 0 {
            issues.push("stopping.window must be at least 1".to_string());
        }
        if self.stopping.instability_limit == 0 {
            issues.push("stopping.instability_limit must be at least 1".to_string());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(TrainError::ConfigInvalid { issues })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrainingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_issues() {
        let mut config = TrainingConfig::default();
        config.iterations = 0;
        config.learner.gamma = 1.5;
        config.replay.capacity = 0;
        let err = config.validate().unwrap_err();
        assert_matches!(err, TrainError::ConfigInvalid { ref issues } if issues.len() >= 3);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_deterministic_mode_forces_single_worker() {
        let mut config = TrainingConfig::default();
        config.selfplay.workers = 8;
        assert_eq!(config.effective_workers(), 8);
        config.deterministic_mode = true;
        assert_eq!(config.effective_workers(), 1);
    }

    #[test]
    fn test_updates_for_iteration() {
        let mut config = TrainingConfig::default();
        config.learner.updates_per_iteration = 0;
        config.learner.updates_per_game = 4;
        assert_eq!(config.updates_for_iteration(20), 80);
        config.learner.updates_per_iteration = 13;
        assert_eq!(config.updates_for_iteration(20), 13);
    }

    #[test]
    fn test_json_roundtrip_and_unknown_field_rejection() {
        let config = TrainingConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: TrainingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.learner.batch_size, config.learner.batch_size);

        let bad = r#"{ "lerner": { "batch_size": 8 } }"#;
        assert!(serde_json::from_str::<TrainingConfig>(bad).is_err());
    }

    #[test]
    fn test_format_tag_bytes() {
        assert_eq!(ParamsFormat::from_tag_byte(b'B'), Some(ParamsFormat::Binary));
        assert_eq!(ParamsFormat::from_tag_byte(b'J'), Some(ParamsFormat::Json));
        assert_eq!(ParamsFormat::from_tag_byte(b'X'), None);
    }
}
