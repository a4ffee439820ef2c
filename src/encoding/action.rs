//! Move ↔ action-index codec.
//!
//! The 4096 slots are laid out as from-square × to-square (64 × 64).
//! Promotions collapse onto the pawn's from/to pair and decode as the queen
//! promotion; under-promotions are never produced on the agent's path. The
//! layout is frozen: checkpoints stamp [`ACTION_LAYOUT_FROM_TO_QUEEN`] and
//! weights are not portable across layouts.

use crate::chess::GamePosition;
use shakmaty::{Move, Role};

/// Dense action-space size: 64 from-squares × 64 to-squares.
pub const ACTION_SPACE: usize = 4096;

/// Layout identifier stamped into checkpoints.
pub const ACTION_LAYOUT_FROM_TO_QUEEN: u8 = 1;

/// Integer action in `[0, 4096)`.
pub type ActionIndex = u16;

/// Encode a move. Total over every move the rule engine can produce.
pub fn encode_move(mv: &Move) -> ActionIndex {
    let to = mv.to() as u16;
    let from = mv.from().map(|sq| sq as u16).unwrap_or(to);
    from * 64 + to
}

/// The legal actions of a position as `(index, move)` pairs, deduplicated:
/// when several legal moves share an index (promotion family), the queen
/// promotion survives. Pair order follows the engine's move generation, so
/// it is deterministic for a given position.
pub fn legal_actions(pos: &GamePosition) -> Vec<(ActionIndex, Move)> {
    let moves = pos.legal_moves();
    let mut pairs: Vec<(ActionIndex, Move)> = Vec::with_capacity(moves.len());
    for mv in &moves {
        let index = encode_move(mv);
        match pairs.iter_mut().find(|(existing, _)| *existing == index) {
            Some((_, kept)) => {
                if mv.promotion() == Some(Role::Queen) {
                    *kept = mv.clone();
                }
            }
            None => pairs.push((index, mv.clone())),
        }
    }
    pairs
}

/// Decode an index against a position's current legal set. Partial: returns
/// `None` when the index does not correspond to a legal move. Among a
/// promotion family the queen promotion is returned.
pub fn decode_action(pos: &GamePosition, index: ActionIndex) -> Option<Move> {
    let mut found: Option<Move> = None;
    for mv in &pos.legal_moves() {
        if encode_move(mv) == index {
            if mv.promotion() == Some(Role::Queen) || mv.promotion().is_none() {
                return Some(mv.clone());
            }
            if found.is_none() {
                found = Some(mv.clone());
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_in_range_and_unique() {
        let pos = GamePosition::startpos();
        let pairs = legal_actions(&pos);
        assert_eq!(pairs.len(), 20);
        let mut seen = std::collections::HashSet::new();
        for (index, _) in &pairs {
            assert!((*index as usize) < ACTION_SPACE);
            assert!(seen.insert(*index));
        }
    }

    #[test]
    fn test_decode_encode_roundtrip_over_legal_moves() {
        let fens = [
            // Start position.
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            // Castling both ways available for both sides.
            "r3k2r/pbppqpb1/1pn2np1/7p/7P/1PN2NP1/PBPPQPB1/R3K2R w KQkq - 0 10",
            // En passant available.
            "rnbqkbnr/pp2pppp/8/2ppP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 3",
        ];
        for fen in fens {
            let pos = GamePosition::from_fen(fen).unwrap();
            for (index, mv) in legal_actions(&pos) {
                let decoded = decode_action(&pos, index).expect("legal index must decode");
                assert_eq!(decoded, mv, "fen {}", fen);
            }
        }
    }

    #[test]
    fn test_promotion_family_collapses_to_queen() {
        // White pawn on b7 can promote.
        let pos = GamePosition::from_fen("8/1P6/8/8/8/4k3/8/4K3 w - - 0 1").unwrap();
        let pairs = legal_actions(&pos);
        let promotion = pairs
            .iter()
            .find(|(_, mv)| mv.promotion().is_some())
            .expect("promotion available");
        assert_eq!(promotion.1.promotion(), Some(Role::Queen));

        let decoded = decode_action(&pos, promotion.0).unwrap();
        assert_eq!(decoded.promotion(), Some(Role::Queen));

        // The four promotion pieces share one slot.
        let b7b8: Vec<_> = pairs
            .iter()
            .filter(|(index, _)| *index == promotion.0)
            .collect();
        assert_eq!(b7b8.len(), 1);
    }

    #[test]
    fn test_illegal_index_decodes_to_none() {
        let pos = GamePosition::startpos();
        // a1 → a1 is never a legal move.
        assert!(decode_action(&pos, 0).is_none());
        // h8 → h8 likewise.
        assert!(decode_action(&pos, 4095).is_none());
    }
}
