//! Material accounting and step-limit adjudication.

use crate::chess::position::{GameOutcome, GamePosition};
use shakmaty::{Color, Position, Role, Square};

/// Fixed piece weights in pawn units. The king carries no material weight.
pub fn piece_weight(role: Role) -> i32 {
    match role {
        Role::Pawn => 1,
        Role::Knight => 3,
        Role::Bishop => 3,
        Role::Rook => 5,
        Role::Queen => 9,
        Role::King => 0,
    }
}

/// Material balance in pawn units, white minus black.
pub fn material_balance(pos: &GamePosition) -> i32 {
    let board = pos.raw().board();
    let mut balance = 0;
    for sq in Square::ALL {
        if let Some(piece) = board.piece_at(sq) {
            let weight = piece_weight(piece.role);
            match piece.color {
                Color::White => balance += weight,
                Color::Black => balance -= weight,
            }
        }
    }
    balance
}

/// Adjudicate a game that hit the step cap: the side ahead by at least
/// `margin` pawn units wins, anything closer is a draw. The margin is policy
/// and comes from configuration; it must never depend on the agent's own
/// evaluation.
pub fn adjudicate_material(pos: &GamePosition, margin: i32) -> GameOutcome {
    let balance = material_balance(pos);
    if balance >= margin {
        GameOutcome::WhiteWins
    } else if balance <= -margin {
        GameOutcome::BlackWins
    } else {
        GameOutcome::Draw
    }
}
