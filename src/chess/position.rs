//! Game position wrapper.
//!
//! The rule engine is the single source of truth for move legality, terminal
//! detection and FEN; this wrapper pins the exact contract the rest of the
//! platform relies on and resolves the two draw rules the engine leaves to
//! the caller (fifty-move via the halfmove clock; threefold repetition via
//! [`GamePosition::repetition_key`], counted by the game driver).

use crate::error::{Result, TrainError};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, MoveList, Outcome, Position};

/// The single game-outcome type of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    WhiteWins,
    BlackWins,
    Draw,
    Ongoing,
}

impl GameOutcome {
    pub fn winner(self) -> Option<Color> {
        match self {
            GameOutcome::WhiteWins => Some(Color::White),
            GameOutcome::BlackWins => Some(Color::Black),
            _ => None,
        }
    }

    pub fn win_for(color: Color) -> Self {
        match color {
            Color::White => GameOutcome::WhiteWins,
            Color::Black => GameOutcome::BlackWins,
        }
    }

    pub fn is_decided(self) -> bool {
        self != GameOutcome::Ongoing
    }

    /// Score in [0, 1] from `color`'s perspective: win 1, draw ½, loss 0.
    /// `Ongoing` scores ½ so callers can use it on adjudication-free tallies.
    pub fn score_for(self, color: Color) -> f64 {
        match self.winner() {
            Some(winner) if winner == color => 1.0,
            Some(_) => 0.0,
            None => 0.5,
        }
    }
}

impl std::fmt::Display for GameOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            GameOutcome::WhiteWins => "1-0",
            GameOutcome::BlackWins => "0-1",
            GameOutcome::Draw => "1/2-1/2",
            GameOutcome::Ongoing => "*",
        };
        write!(f, "{}", text)
    }
}

/// An immutable chess position. `apply` returns a new position; the wrapped
/// engine state is never mutated in place.
#[derive(Debug, Clone)]
pub struct GamePosition {
    inner: Chess,
}

impl Default for GamePosition {
    fn default() -> Self {
        GamePosition {
            inner: Chess::default(),
        }
    }
}

impl GamePosition {
    /// The standard starting position.
    pub fn startpos() -> Self {
        Self::default()
    }

    pub fn from_fen(fen: &str) -> Result<Self> {
        let parsed: Fen = fen
            .parse()
            .map_err(|e| TrainError::RuleViolation(format!("bad FEN '{}': {}", fen, e)))?;
        let inner: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| TrainError::RuleViolation(format!("illegal position '{}': {}", fen, e)))?;
        Ok(GamePosition { inner })
    }

    pub fn legal_moves(&self) -> MoveList {
        self.inner.legal_moves()
    }

    /// Apply a legal move, producing the successor position.
    pub fn apply(&self, mv: &Move) -> Result<GamePosition> {
        let next = self
            .inner
            .clone()
            .play(mv)
            .map_err(|_| TrainError::RuleViolation(format!("illegal move in {}", self.to_fen())))?;
        Ok(GamePosition { inner: next })
    }

    /// Terminal under engine rules plus the fifty-move rule.
    pub fn is_terminal(&self) -> bool {
        self.inner.is_game_over() || self.inner.halfmoves() >= 100
    }

    pub fn outcome(&self) -> GameOutcome {
        if let Some(outcome) = self.inner.outcome() {
            return match outcome {
                Outcome::Decisive { winner } => GameOutcome::win_for(winner),
                Outcome::Draw => GameOutcome::Draw,
            };
        }
        if self.inner.halfmoves() >= 100 {
            GameOutcome::Draw
        } else {
            GameOutcome::Ongoing
        }
    }

    pub fn active_color(&self) -> Color {
        self.inner.turn()
    }

    pub fn to_fen(&self) -> String {
        Fen::from_position(self.inner.clone(), EnPassantMode::Legal).to_string()
    }

    /// Key for threefold-repetition counting: the FEN with the move counters
    /// stripped, so positions that differ only in clocks collide.
    pub fn repetition_key(&self) -> String {
        let fen = self.to_fen();
        let mut fields = fen.split(' ');
        let mut key = String::with_capacity(fen.len());
        for (i, field) in fields.by_ref().take(4).enumerate() {
            if i > 0 {
                key.push(' ');
            }
            key.push_str(field);
        }
        key
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.inner.halfmoves()
    }

    pub fn is_check(&self) -> bool {
        self.inner.is_check()
    }

    /// Access to the wrapped engine position for encoders and evaluators.
    pub(crate) fn raw(&self) -> &Chess {
        &self.inner
    }
}
