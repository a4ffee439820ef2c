//! Plays N games between an agent and a fixed opponent and reports the
//! result with confidence intervals.
//!
//! The harness never updates the learner: it receives a value-copied
//! parameter snapshot, runs greedy (no exploration), and draws randomness
//! only from the evaluation stream keyed by `(master, "eval", iteration,
//! opponent_tag)`. Colors alternate strictly per game, so the white/black
//! split differs by at most one for any N.

use crate::agent::{Agent, NetAgent};
use crate::config::{RewardConfig, SelfPlayConfig};
use crate::error::Result;
use crate::eval::stats;
use crate::network::NetworkParams;
use crate::opponents::{build_opponent, OpponentSpec};
use crate::rng::SeedConfig;
use crate::selfplay::{GameTask, SelfPlayOrchestrator};
use std::sync::Arc;

/// Result of one evaluation round against a single opponent.
#[derive(Debug, Clone)]
pub struct EvalReport {
    pub opponent: String,
    pub games: u64,
    pub wins: u64,
    pub draws: u64,
    pub losses: u64,
    /// Strict win proportion.
    pub win_rate: f64,
    /// Score proportion counting draws as half.
    pub score: f64,
    pub wilson_low: f64,
    pub wilson_high: f64,
    /// `H0: win rate = 0.5` rejected at α = 0.05.
    pub significant: bool,
    pub avg_game_length: f64,
    pub fallbacks: u64,
}

impl EvalReport {
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{}: {}-{}-{} (score {:.3}, win rate {:.3}, 95% CI [{:.3}, {:.3}]{})",
            self.opponent,
            self.wins,
            self.draws,
            self.losses,
            self.score,
            self.win_rate,
            self.wilson_low,
            self.wilson_high,
            if self.significant { ", significant" } else { "" }
        );
        if self.fallbacks > 0 {
            text.push_str(&format!(", {} fallbacks", self.fallbacks));
        }
        text
    }
}

/// Head-to-head comparison between two parameter snapshots.
#[derive(Debug, Clone)]
pub struct CompareReport {
    pub report_a: EvalReport,
    /// Cohen's h between the two agents' win rates (A minus B perspective).
    pub cohen_h: f64,
}

pub struct EvaluationHarness {
    seeds: SeedConfig,
    selfplay: SelfPlayConfig,
    rewards: RewardConfig,
}

impl EvaluationHarness {
    pub fn new(seeds: SeedConfig, selfplay: SelfPlayConfig, rewards: RewardConfig) -> Self {
        EvaluationHarness {
            seeds,
            selfplay,
            rewards,
        }
    }

    /// Play `games` games of `params` (greedy) against `spec`, alternating
    /// colors. Reuses the self-play pool after its queue has drained;
    /// experiences are not collected.
    pub fn evaluate(
        &self,
        orchestrator: &SelfPlayOrchestrator,
        params: &NetworkParams,
        spec: &OpponentSpec,
        snapshot_params: Option<&NetworkParams>,
        games: usize,
        iteration: u64,
    ) -> Result<EvalReport> {
        let net = Arc::new(params.into_net()?);
        let tag = spec.tag();
        // Fail fast on an unresolvable opponent before spawning games.
        build_opponent(spec, snapshot_params, self.seeds.eval_rng(iteration, &tag))?;

        let tasks: Vec<GameTask> = (0..games as u64).map(GameTask::for_ordinal).collect();
        let seeds = self.seeds;
        let results = orchestrator.run_games(
            &tasks,
            |task| {
                // Two disjoint eval sub-streams per game: one for each side.
                let agent_rng =
                    seeds.eval_rng(iteration, &format!("{}#agent{}", tag, task.ordinal));
                let opponent_rng =
                    seeds.eval_rng(iteration, &format!("{}#opp{}", tag, task.ordinal));
                let agent: Box<dyn Agent> =
                    Box::new(NetAgent::new("eval", net.clone(), None, agent_rng));
                let opponent = build_opponent(spec, snapshot_params, opponent_rng)
                    .expect("opponent spec validated above");
                (agent, opponent)
            },
            false,
            &self.selfplay,
            &self.rewards,
        );

        let mut wins = 0u64;
        let mut draws = 0u64;
        let mut losses = 0u64;
        let mut total_length = 0u64;
        let mut fallbacks = 0u64;
        for result in &results {
            match result.learner_score() {
                s if s == 1.0 => wins += 1,
                s if s == 0.0 => losses += 1,
                _ => draws += 1,
            }
            total_length += u64::from(result.length);
            fallbacks += result.fallbacks;
        }

        let games_played = results.len() as u64;
        let (wilson_low, wilson_high) = stats::wilson_interval(wins, games_played);
        let win_rate = if games_played > 0 {
            wins as f64 / games_played as f64
        } else {
            0.0
        };
        let score = if games_played > 0 {
            (wins as f64 + draws as f64 * 0.5) / games_played as f64
        } else {
            0.0
        };

        let report = EvalReport {
            opponent: tag,
            games: games_played,
            wins,
            draws,
            losses,
            win_rate,
            score,
            wilson_low,
            wilson_high,
            significant: stats::significant_vs_half(wins, games_played),
            avg_game_length: if games_played > 0 {
                total_length as f64 / games_played as f64
            } else {
                0.0
            },
            fallbacks,
        };
        log::info!("[Eval] {}", report.summary());
        Ok(report)
    }

    /// Head-to-head: snapshot A as the agent, snapshot B as the opponent,
    /// with Cohen's h between their win rates.
    pub fn compare(
        &self,
        orchestrator: &SelfPlayOrchestrator,
        params_a: &NetworkParams,
        params_b: &NetworkParams,
        games: usize,
        iteration: u64,
    ) -> Result<CompareReport> {
        let spec = OpponentSpec::Snapshot("head-to-head".to_string());
        let report_a = self.evaluate(
            orchestrator,
            params_a,
            &spec,
            Some(params_b),
            games,
            iteration,
        )?;
        let loss_rate = report_a.losses as f64 / report_a.games.max(1) as f64;
        let cohen_h = stats::cohen_h(report_a.win_rate, loss_rate);
        Ok(CompareReport { report_a, cohen_h })
    }
}
