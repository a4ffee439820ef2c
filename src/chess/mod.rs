//! Thin adapter over the external chess rule engine.
//!
//! Everything above this module speaks [`GamePosition`] and [`GameOutcome`];
//! the rule engine itself (move generation, make/unmake, terminal detection,
//! FEN) is an external collaborator.

pub mod material;
pub mod position;

pub use material::{adjudicate_material, material_balance, piece_weight};
pub use position::{GameOutcome, GamePosition};
