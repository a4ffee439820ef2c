//! Fixed encodings between chess positions/moves and the learner's dense
//! state and action spaces. Both layouts are frozen for the life of a model;
//! weights trained against them are not portable across layout changes.

pub mod action;
pub mod state;

pub use action::{
    decode_action, encode_move, legal_actions, ActionIndex, ACTION_LAYOUT_FROM_TO_QUEEN,
    ACTION_SPACE,
};
pub use state::{StateEncoder, StateVector, STATE_SIZE};
