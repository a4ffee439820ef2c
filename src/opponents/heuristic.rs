//! One-ply heuristic opponent.
//!
//! Scores every legal move by the resulting position: material, mobility
//! and pawn advancement, with checkmate and draws resolved exactly. Ties
//! break on generation order so the agent is fully deterministic.

use crate::agent::{Agent, AgentDecision};
use crate::chess::{material_balance, GameOutcome, GamePosition};
use crate::encoding::encode_move;
use shakmaty::{Color, Position, Role, Square};

const MATE_SCORE: f64 = 1_000.0;
const MOBILITY_WEIGHT: f64 = 0.05;
const PAWN_ADVANCE_WEIGHT: f64 = 0.02;
const CHECK_BONUS: f64 = 0.1;

pub struct HeuristicAgent;

impl HeuristicAgent {
    pub fn new() -> Self {
        HeuristicAgent
    }
}

impl Default for HeuristicAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// Static evaluation of a position from `perspective`'s point of view.
fn evaluate(pos: &GamePosition, perspective: Color) -> f64 {
    match pos.outcome() {
        GameOutcome::WhiteWins => {
            return if perspective == Color::White {
                MATE_SCORE
            } else {
                -MATE_SCORE
            }
        }
        GameOutcome::BlackWins => {
            return if perspective == Color::Black {
                MATE_SCORE
            } else {
                -MATE_SCORE
            }
        }
        GameOutcome::Draw => return 0.0,
        GameOutcome::Ongoing => {}
    }

    let material = f64::from(material_balance(pos));
    let material = if perspective == Color::White {
        material
    } else {
        -material
    };

    // Mobility from the mover's perspective, reoriented.
    let mobility = pos.legal_moves().len() as f64 * MOBILITY_WEIGHT;
    let mobility = if pos.active_color() == perspective {
        mobility
    } else {
        -mobility
    };

    let advancement = pawn_advancement(pos, perspective) * PAWN_ADVANCE_WEIGHT;

    let check = if pos.is_check() && pos.active_color() != perspective {
        CHECK_BONUS
    } else {
        0.0
    };

    material + mobility + advancement + check
}

/// Summed rank progress of `color`'s pawns.
fn pawn_advancement(pos: &GamePosition, color: Color) -> f64 {
    let board = pos.raw().board();
    let mut total = 0.0;
    for sq in Square::ALL {
        if let Some(piece) = board.piece_at(sq) {
            if piece.role == Role::Pawn && piece.color == color {
                let rank = u32::from(sq) / 8;
                total += match color {
                    Color::White => f64::from(rank) - 1.0,
                    Color::Black => 6.0 - f64::from(rank),
                };
            }
        }
    }
    total
}

impl Agent for HeuristicAgent {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn select(&mut self, pos: &GamePosition) -> Option<AgentDecision> {
        let moves = pos.legal_moves();
        if moves.is_empty() {
            return None;
        }
        let mover = pos.active_color();
        let mut best: Option<(f64, shakmaty::Move)> = None;
        for mv in &moves {
            let next = match pos.apply(mv) {
                Ok(next) => next,
                Err(_) => continue,
            };
            let score = evaluate(&next, mover);
            if best.as_ref().map_or(true, |(b, _)| score > *b) {
                best = Some((score, mv.clone()));
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
