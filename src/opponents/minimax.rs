//! Fixed-depth alpha-beta opponent.
//!
//! Negamax over a material + mobility evaluation, deterministic move
//! ordering (generation order), mate-distance aware scores. Depth is small
//! (1–6); this opponent exists as an evaluation wall, not as an engine.

use crate::agent::{Agent, AgentDecision};
use crate::chess::{material_balance, GameOutcome, GamePosition};
use crate::encoding::encode_move;
use shakmaty::Color;

const MATE_SCORE: f64 = 10_000.0;
const MOBILITY_WEIGHT: f64 = 0.05;

pub struct MinimaxAgent {
    depth: u8,
    name: String,
}

impl MinimaxAgent {
    pub fn new(depth: u8) -> Self {
        MinimaxAgent {
            depth: depth.max(1),
            name: format!("minimax:{}", depth.max(1)),
        }
    }
}

/// Static evaluation from the side to move's perspective.
fn leaf_value(pos: &GamePosition) -> f64 {
    let material = f64::from(material_balance(pos));
    let signed = match pos.active_color() {
        Color::White => material,
        Color::Black => -material,
    };
    signed + pos.legal_moves().len() as f64 * MOBILITY_WEIGHT
}

/// Negamax with alpha-beta. `ply` makes mate scores prefer the shortest
/// mate and the longest defense.
fn negamax(pos: &GamePosition, depth: u8, mut alpha: f64, beta: f64, ply: u8) -> f64 {
    match pos.outcome() {
        GameOutcome::Ongoing => {}
        GameOutcome::Draw => return 0.0,
        // A decided outcome with the side to move means the mover is mated.
        _ => return -MATE_SCORE + f64::from(ply),
    }
    if depth == 0 {
        return leaf_value(pos);
    }

    let mut best = f64::NEG_INFINITY;
    for mv in &pos.legal_moves() {
        let next = match pos.apply(mv) {
            Ok(next) => next,
            Err(_) => continue,
        };
        let value = -negamax(&next, depth - 1, -beta, -alpha, ply + 1);
        if value > best {
            best = value;
        }
        if best > alpha {
            alpha = best;
        }
        if alpha >= beta {
            break;
        }
    }
    best
}

impl Agent for MinimaxAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn select(&mut self, pos: &GamePosition) -> Option<AgentDecision> {
        let moves = pos.legal_moves();
        if moves.is_empty() {
            return None;
        }

        let mut best: Option<(f64, shakmaty::Move)> = None;
        let mut alpha = f64::NEG_INFINITY;
        for mv in &moves {
            let next = match pos.apply(mv) {
                Ok(next) => next,
                Err(_) => continue,
            };
            let value = -negamax(&next, self.depth - 1, f64::NEG_INFINITY, -alpha, 1);
            if best.as_ref().map_or(true, |(b, _)| value > *b) {
                best = Some((value, mv.clone()));
            }
            if value > alpha {
                alpha = value;
            }
        }

        let (_, mv) = best?;
        let action = encode_move(&mv);
        Some(AgentDecision {
            mv,
            action,
            fallback: false,
        })
    }
}
