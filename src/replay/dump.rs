//! Serializable replay contents for checkpoints.
//!
//! A checkpoint must be sufficient to resume training byte-identically, so
//! the store's entries travel with it. State vectors are mostly zeros (a
//! chess position occupies at most a few dozen of the 776 slots), so they
//! are stored sparsely as `(index, value)` pairs.

use crate::encoding::ActionIndex;
use crate::error::{Result, TrainError};
use crate::replay::{Experience, ExperienceMeta};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use shakmaty::Color;

/// One experience in sparse, serializable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpedExperience {
    pub state: Vec<(u16, f64)>,
    pub action: ActionIndex,
    pub reward: f64,
    pub next_state: Vec<(u16, f64)>,
    pub next_legal: Vec<ActionIndex>,
    pub terminal: bool,
    pub game_id: u64,
    pub move_number: u32,
    pub quality: f64,
    /// 0 = white, 1 = black.
    pub color: u8,
}

/// One ring slot: the experience plus its raw priority (1.0 under uniform
/// sampling).
pub type DumpedSlot = Option<(DumpedExperience, f64)>;

/// Full replay contents. `slots` preserves ring layout for prioritized
/// stores; uniform stores dump in FIFO order with a zero cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayDump {
    pub state_len: usize,
    pub slots: Vec<DumpedSlot>,
    pub cursor: usize,
    pub max_priority: f64,
}

fn to_sparse(dense: &Array1<f64>) -> Vec<(u16, f64)> {
    dense
        .iter()
        .enumerate()
        .filter(|(_, &v)| v != 0.0)
        .map(|(i, &v)| (i as u16, v))
        .collect()
}

fn to_dense(sparse: &[(u16, f64)], len: usize) -> Result<Array1<f64>> {
    let mut dense = Array1::zeros(len);
    for &(index, value) in sparse {
        let index = index as usize;
        if index >= len {
            return Err(TrainError::CheckpointCorrupt(format!(
                "sparse state index {} outside state length {}",
                index, len
            )));
        }
        dense[index] = value;
    }
    Ok(dense)
}

impl DumpedExperience {
    pub fn from_experience(experience: &Experience) -> Self {
        DumpedExperience {
            state: to_sparse(&experience.state),
            action: experience.action,
            reward: experience.reward,
            next_state: to_sparse(&experience.next_state),
            next_legal: experience.next_legal.clone(),
            terminal: experience.terminal,
            game_id: experience.meta.game_id,
            move_number: experience.meta.move_number,
            quality: experience.meta.quality,
            color: match experience.meta.color {
                Color::White => 0,
                Color::Black => 1,
            },
        }
    }

    pub fn to_experience(&self, state_len: usize) -> Result<Experience> {
        if usize::from(self.action) >= crate::encoding::ACTION_SPACE {
            return Err(TrainError::CheckpointCorrupt(format!(
                "action index {} outside the action space",
                self.action
            )));
        }
        Ok(Experience {
            state: to_dense(&self.state, state_len)?,
            action: self.action,
            reward: self.reward,
            next_state: to_dense(&self.next_state, state_len)?,
            next_legal: self.next_legal.clone(),
            terminal: self.terminal,
            meta: ExperienceMeta {
                game_id: self.game_id,
                move_number: self.move_number,
                quality: self.quality,
                color: if self.color == 0 {
                    Color::White
                } else {
                    Color::Black
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::test_experience;

    #[test]
    fn test_sparse_roundtrip_is_exact() {
        let mut experience = test_experience(3, 17, -0.25);
        experience.state[0] = 0.0;
        experience.state[2] = 0.73;
        let dumped = DumpedExperience::from_experience(&experience);
        let back = dumped.to_experience(experience.state.len()).unwrap();
        assert_eq!(back.state, experience.state);
        assert_eq!(back.next_state, experience.next_state);
        assert_eq!(back.action, experience.action);
        assert_eq!(back.reward, experience.reward);
        assert_eq!(back.meta.game_id, experience.meta.game_id);
        assert_eq!(back.meta.color, experience.meta.color);
    }

    #[test]
    fn test_sparse_skips_zeros() {
        let experience = test_experience(0, 0, 0.0);
        let dumped = DumpedExperience::from_experience(&experience);
        // next_state in the fixture is all zeros.
        assert!(dumped.next_state.is_empty());
    }

    #[test]
    fn test_out_of_range_index_is_corrupt() {
        let mut dumped = DumpedExperience::from_experience(&test_experience(0, 1, 0.0));
        dumped.state = vec![(700, 1.0)];
        assert!(dumped.to_experience(4).is_err());
    }
}
