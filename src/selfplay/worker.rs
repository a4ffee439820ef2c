//! One complete game between two agents, emitting experiences.
//!
//! The encoder normalizes side-to-move, so every ply yields a transition
//! from the mover's perspective: `next_state` is the next position with the
//! same player to move (two plies later), finalized when that turn arrives
//! or the game ends. Rewards are terminal-only, plus the configured step
//! penalties. A hard step cap adjudicates unfinished games on material.

use crate::agent::Agent;
use crate::chess::{adjudicate_material, GameOutcome, GamePosition};
use crate::config::{RewardConfig, SelfPlayConfig};
use crate::encoding::{legal_actions, ActionIndex, StateEncoder, StateVector};
use crate::replay::{Experience, ExperienceMeta};
use shakmaty::Color;
use std::collections::HashMap;

/// How a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Checkmate, stalemate, insufficient material, fifty-move or
    /// threefold repetition.
    Natural,
    /// The step cap fired and the game was adjudicated on material.
    StepLimit,
    /// The operator's stop signal arrived while the game was in flight; the
    /// game still completed, so its experiences remain valid.
    Manual,
}

/// Everything one finished game hands back to the aggregator.
#[derive(Debug)]
pub struct GameResult {
    pub id: u64,
    pub outcome: GameOutcome,
    pub length: u32,
    pub experiences: Vec<Experience>,
    pub final_fen: String,
    pub termination: TerminationReason,
    pub learner_color: Color,
    /// Illegal-action fallbacks both agents hit during this game.
    pub fallbacks: u64,
}

impl GameResult {
    /// Outcome score in [0, 1] from the learner's side.
    pub fn learner_score(&self) -> f64 {
        self.outcome.score_for(self.learner_color)
    }
}

/// A transition waiting for the mover's next turn.
struct PendingStep {
    state: StateVector,
    action: ActionIndex,
    move_number: u32,
}

/// Play one game. `learner` holds `learner_color`; `opponent` the other
/// side. With `collect` false (evaluation) no experiences are emitted.
pub fn play_game(
    game_id: u64,
    learner: &mut dyn Agent,
    opponent: &mut dyn Agent,
    learner_color: Color,
    collect: bool,
    selfplay: &SelfPlayConfig,
    rewards: &RewardConfig,
) -> GameResult {
    let encoder = StateEncoder::new();
    let mut pos = GamePosition::startpos();
    let mut repetitions: HashMap<String, u32> = HashMap::new();
    repetitions.insert(pos.repetition_key(), 1);

    let mut experiences = Vec::new();
    let mut pending: [Option<PendingStep>; 2] = [None, None];
    let mut fallbacks = 0u64;
    let mut steps = 0u32;
    let mut outcome;
    let mut termination = TerminationReason::Natural;

    loop {
        outcome = pos.outcome();
        if outcome.is_decided() {
            break;
        }
        if repetitions.get(&pos.repetition_key()).copied().unwrap_or(0) >= 3 {
            outcome = GameOutcome::Draw;
            break;
        }
        if steps >= selfplay.max_steps_per_game {
            outcome = adjudicate_material(&pos, selfplay.adjudication_material_margin);
            termination = TerminationReason::StepLimit;
            break;
        }

        let mover = pos.active_color();
        let agent: &mut dyn Agent = if mover == learner_color {
            learner
        } else {
            opponent
        };
        let decision = match agent.select(&pos) {
            Some(decision) => decision,
            // No legal moves without a decided outcome; the engine's view of
            // the position stands.
            None => break,
        };
        if decision.fallback {
            fallbacks += 1;
        }

        if collect {
            let state = encoder.encode(&pos);
            let slot = color_slot(mover);
            // The mover is on turn again: their previous transition is
            // complete with this position as its successor.
            if let Some(step) = pending[slot].take() {
                experiences.push(finalize_step(
                    step,
                    rewards.step_penalty,
                    state.clone(),
                    next_legal_of(&pos),
                    false,
                    game_id,
                    mover,
                ));
            }
            pending[slot] = Some(PendingStep {
                state,
                action: decision.action,
                move_number: steps,
            });
        }

        match pos.apply(&decision.mv) {
            Ok(next) => pos = next,
            Err(error) => {
                // An agent handed back a move the engine rejects; the game
                // cannot continue meaningfully.
                log::error!("[SelfPlay] game {}: {}", game_id, error);
                outcome = GameOutcome::Draw;
                break;
            }
        }
        *repetitions.entry(pos.repetition_key()).or_insert(0) += 1;
        steps += 1;
    }

    if collect {
        let step_limit_extra = if termination == TerminationReason::StepLimit {
            rewards.step_limit_penalty
        } else {
            0.0
        };
        for color in [Color::White, Color::Black] {
            if let Some(step) = pending[color_slot(color)].take() {
                let reward = terminal_reward(outcome, color, rewards) + step_limit_extra;
                experiences.push(finalize_step(
                    step,
                    reward,
                    encoder.terminal_state(),
                    Vec::new(),
                    true,
                    game_id,
                    color,
                ));
            }
        }

        // Order within the game follows move number; quality is known only
        // now that the outcome is.
        experiences.sort_by_key(|e| e.meta.move_number);
        for experience in &mut experiences {
            experience.meta.quality = quality_of(outcome, experience.meta.color);
        }
    }

    log::debug!(
        "[SelfPlay] game {} finished {} after {} plies",
        game_id,
        outcome,
        steps
    );

    GameResult {
        id: game_id,
        outcome,
        length: steps,
        experiences,
        final_fen: pos.to_fen(),
        termination,
        learner_color,
        fallbacks,
    }
}

fn color_slot(color: Color) -> usize {
    match color {
        Color::White => 0,
        Color::Black => 1,
    }
}

fn next_legal_of(pos: &GamePosition) -> Vec<ActionIndex> {
    legal_actions(pos).iter().map(|(index, _)| *index).collect()
}

fn finalize_step(
    step: PendingStep,
    reward: f64,
    next_state: StateVector,
    next_legal: Vec<ActionIndex>,
    terminal: bool,
    game_id: u64,
    color: Color,
) -> Experience {
    Experience {
        state: step.state,
        action: step.action,
        reward,
        next_state,
        next_legal,
        terminal,
        meta: ExperienceMeta {
            game_id,
            move_number: step.move_number,
            quality: 0.5,
            color,
        },
    }
}

/// Terminal reward from `color`'s perspective.
fn terminal_reward(outcome: GameOutcome, color: Color, rewards: &RewardConfig) -> f64 {
    match outcome.winner() {
        Some(winner) if winner == color => rewards.win_reward,
        Some(_) => rewards.loss_reward,
        None => rewards.draw_reward,
    }
}

/// Outcome-derived experience quality: winner's moves 1.0, draws 0.5,
/// loser's moves 0.25.
fn quality_of(outcome: GameOutcome, color: Color) -> f64 {
    match outcome.winner() {
        Some(winner) if winner == color => 1.0,
        Some(_) => 0.25,
        None => 0.5,
    }
}
