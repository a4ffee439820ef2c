//! Position → dense feature vector.
//!
//! Layout (776 slots, side-to-move normalized):
//!
//! | slots | content |
//! |---|---|
//! | 0..768 | 12 piece planes × 64 squares: roles P N B R Q K for the side to move, then the opponent; squares are rank-flipped when black is to move so the mover always plays "up" |
//! | 768 | raw side to move (1 white, 0 black) |
//! | 769..773 | castling rights: mover kingside, mover queenside, opponent kingside, opponent queenside |
//! | 773 | en-passant target square (mirrored), (index + 1) / 64, 0 when none |
//! | 774 | halfmove clock / 100 |
//! | 775 | fullmove number, capped at 200, / 200 |
//!
//! The encoding is a pure function of the position: identical positions give
//! bitwise-identical vectors, and the raw side-to-move slot keeps mirrored
//! color-swapped positions distinguishable. The absorbing terminal encoding
//! is the zero vector, which no live position can produce (kings always
//! occupy two plane slots).

use crate::chess::GamePosition;
use ndarray::Array1;
use shakmaty::{CastlingSide, Color, EnPassantMode, Position, Role, Square};

/// Length of the encoded state vector.
pub const STATE_SIZE: usize = 776;

/// Dense state vector consumed by the Q network.
pub type StateVector = Array1<f64>;

const PLANE_SQUARES: usize = 64;
const PIECE_PLANES: usize = 12;
const PIECE_SLOTS: usize = PIECE_PLANES * PLANE_SQUARES;

fn role_plane(role: Role) -> usize {
    match role {
        Role::Pawn => 0,
        Role::Knight => 1,
        Role::Bishop => 2,
        Role::Rook => 3,
        Role::Queen => 4,
        Role::King => 5,
    }
}

/// Stateless, thread-safe position encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateEncoder;

impl StateEncoder {
    pub fn new() -> Self {
        StateEncoder
    }

    /// Encode into a caller-provided buffer of exactly [`STATE_SIZE`] slots.
    /// This is the allocation-free hot path.
    pub fn encode_into(&self, pos: &GamePosition, out: &mut [f64]) {
        debug_assert_eq!(out.len(), STATE_SIZE);
        out.fill(0.0);

        let raw = pos.raw();
        let mover = raw.turn();
        let board = raw.board();

        for sq in Square::ALL {
            if let Some(piece) = board.piece_at(sq) {
                let oriented = orient(sq, mover);
                let side = if piece.color == mover { 0 } else { 1 };
                let plane = side * 6 + role_plane(piece.role);
                out[plane * PLANE_SQUARES + oriented as usize] = 1.0;
            }
        }

        out[PIECE_SLOTS] = if mover == Color::White { 1.0 } else { 0.0 };

        let castles = raw.castles();
        let opponent = mover.other();
        out[PIECE_SLOTS + 1] = bool_slot(castles.has(mover, CastlingSide::KingSide));
        out[PIECE_SLOTS + 2] = bool_slot(castles.has(mover, CastlingSide::QueenSide));
        out[PIECE_SLOTS + 3] = bool_slot(castles.has(opponent, CastlingSide::KingSide));
        out[PIECE_SLOTS + 4] = bool_slot(castles.has(opponent, CastlingSide::QueenSide));

        out[PIECE_SLOTS + 5] = match raw.ep_square(EnPassantMode::Legal) {
            Some(sq) => f64::from(orient(sq, mover) + 1) / 64.0,
            None => 0.0,
        };

        out[PIECE_SLOTS + 6] = f64::from(raw.halfmoves().min(100)) / 100.0;
        out[PIECE_SLOTS + 7] = f64::from(u32::from(raw.fullmoves()).min(200)) / 200.0;
    }

    /// Encode into a freshly allocated vector.
    pub fn encode(&self, pos: &GamePosition) -> StateVector {
        let mut out = vec![0.0; STATE_SIZE];
        self.encode_into(pos, &mut out);
        Array1::from_vec(out)
    }

    /// The absorbing terminal encoding.
    pub fn terminal_state(&self) -> StateVector {
        Array1::zeros(STATE_SIZE)
    }
}

fn bool_slot(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Mirror the square vertically when black is to move so the mover's pawns
/// always advance toward higher ranks.
fn orient(sq: Square, mover: Color) -> u32 {
    let oriented = match mover {
        Color::White => sq,
        Color::Black => sq.flip_vertical(),
    };
    u32::from(oriented)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_length_and_purity() {
        let encoder = StateEncoder::new();
        let pos = GamePosition::startpos();
        let a = encoder.encode(&pos);
        let b = encoder.encode(&pos);
        assert_eq!(a.len(), STATE_SIZE);
        assert_eq!(a, b);
    }

    #[test]
    fn test_identical_positions_encode_identically() {
        let encoder = StateEncoder::new();
        let a = GamePosition::from_fen("r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3")
            .unwrap();
        let b = GamePosition::from_fen("r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3")
            .unwrap();
        assert_eq!(encoder.encode(&a), encoder.encode(&b));
    }

    #[test]
    fn test_different_positions_encode_differently() {
        let encoder = StateEncoder::new();
        let pos = GamePosition::startpos();
        let mv = pos.legal_moves()[0].clone();
        let next = pos.apply(&mv).unwrap();
        assert_ne!(encoder.encode(&pos), encoder.encode(&next));
    }

    #[test]
    fn test_side_to_move_slot_preserves_color() {
        let encoder = StateEncoder::new();
        // Color-swapped mirror of the same structure; the piece planes agree
        // after normalization but the raw side-to-move slot must differ.
        let white = GamePosition::from_fen("4k3/8/8/8/8/8/8/4K2R w K - 0 1").unwrap();
        let black = GamePosition::from_fen("4k2r/8/8/8/8/8/8/4K3 b k - 0 1").unwrap();
        let ew = encoder.encode(&white);
        let eb = encoder.encode(&black);
        assert_eq!(
            ew.slice(ndarray::s![..PIECE_SLOTS]),
            eb.slice(ndarray::s![..PIECE_SLOTS])
        );
        assert_ne!(ew[PIECE_SLOTS], eb[PIECE_SLOTS]);
    }

    #[test]
    fn test_castling_rights_are_mover_relative() {
        let encoder = StateEncoder::new();
        let pos = GamePosition::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let v = encoder.encode(&pos);
        assert_eq!(v[PIECE_SLOTS + 1], 1.0);
        assert_eq!(v[PIECE_SLOTS + 2], 1.0);
        assert_eq!(v[PIECE_SLOTS + 3], 1.0);
        assert_eq!(v[PIECE_SLOTS + 4], 1.0);

        let no_white_castles =
            GamePosition::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w kq - 0 1")
                .unwrap();
        let v = encoder.encode(&no_white_castles);
        assert_eq!(v[PIECE_SLOTS + 1], 0.0);
        assert_eq!(v[PIECE_SLOTS + 2], 0.0);
        assert_eq!(v[PIECE_SLOTS + 3], 1.0);
        assert_eq!(v[PIECE_SLOTS + 4], 1.0);
    }

    #[test]
    fn test_en_passant_slot() {
        let encoder = StateEncoder::new();
        // After 1. e4 c5 2. e5 d5, white may capture en passant on d6.
        let pos = GamePosition::from_fen(
            "rnbqkbnr/pp2pppp/8/2ppP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 3",
        )
        .unwrap();
        let v = encoder.encode(&pos);
        assert!(v[PIECE_SLOTS + 5] > 0.0);

        let without = GamePosition::startpos();
        assert_eq!(encoder.encode(&without)[PIECE_SLOTS + 5], 0.0);
    }

    #[test]
    fn test_terminal_state_is_all_zero_and_unreachable() {
        let encoder = StateEncoder::new();
        let terminal = encoder.terminal_state();
        assert!(terminal.iter().all(|&x| x == 0.0));
        // Any live position carries two kings in the piece planes.
        let live = encoder.encode(&GamePosition::startpos());
        assert!(live.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_halfmove_clock_signal() {
        let encoder = StateEncoder::new();
        let fresh = GamePosition::from_fen("8/8/4k3/8/8/4K3/4R3/8 w - - 0 40").unwrap();
        let stale = GamePosition::from_fen("8/8/4k3/8/8/4K3/4R3/8 w - - 60 40").unwrap();
        let ef = encoder.encode(&fresh);
        let es = encoder.encode(&stale);
        assert_eq!(ef[PIECE_SLOTS + 6], 0.0);
        assert_eq!(es[PIECE_SLOTS + 6], 0.6);
    }
}
