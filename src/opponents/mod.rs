//! Reference opponents and the single opponent factory.
//!
//! Specs are plain values that serialize as strings (`"heuristic"`,
//! `"minimax:2"`, `"random"`, `"snapshot:<id>"`), so config files and
//! checkpoint metadata share one vocabulary.

pub mod heuristic;
pub mod minimax;

use crate::agent::{Agent, NetAgent, RandomAgent};
use crate::error::{Result, TrainError};
use crate::network::NetworkParams;
use rand_chacha::ChaCha12Rng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use heuristic::HeuristicAgent;
pub use minimax::MinimaxAgent;

/// Which opponent to build. `Snapshot` names a checkpoint id in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpponentSpec {
    Random,
    Heuristic,
    Minimax(u8),
    Snapshot(String),
}

impl OpponentSpec {
    /// Stable tag used for metrics and evaluation stream derivation.
    pub fn tag(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OpponentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpponentSpec::Random => write!(f, "random"),
            OpponentSpec::Heuristic => write!(f, "heuristic"),
            OpponentSpec::Minimax(depth) => write!(f, "minimax:{}", depth),
            OpponentSpec::Snapshot(id) => write!(f, "snapshot:{}", id),
        }
    }
}

impl FromStr for OpponentSpec {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "random" {
            return Ok(OpponentSpec::Random);
        }
        if s == "heuristic" {
            return Ok(OpponentSpec::Heuristic);
        }
        if let Some(depth) = s.strip_prefix("minimax:") {
            let depth: u8 = depth.parse().map_err(|_| TrainError::ConfigInvalid {
                issues: vec![format!("bad minimax depth in opponent '{}'", s)],
            })?;
            if depth == 0 || depth > 6 {
                return Err(TrainError::ConfigInvalid {
                    issues: vec![format!("minimax depth must be in 1..=6, got {}", depth)],
                });
            }
            return Ok(OpponentSpec::Minimax(depth));
        }
        if let Some(id) = s.strip_prefix("snapshot:") {
            return Ok(OpponentSpec::Snapshot(id.to_string()));
        }
        Err(TrainError::ConfigInvalid {
            issues: vec![format!(
                "unknown opponent '{}' (expected random, heuristic, minimax:D or snapshot:<id>)",
                s
            )],
        })
    }
}

impl Serialize for OpponentSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OpponentSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        OpponentSpec::from_str(&text).map_err(D::Error::custom)
    }
}

/// Build an opponent agent. Snapshot opponents need the loaded parameters,
/// resolved by the caller against the checkpoint store; passing `None` for
/// a snapshot spec is a caller bug surfaced as an error.
pub fn build_opponent(
    spec: &OpponentSpec,
    snapshot_params: Option<&NetworkParams>,
    rng: ChaCha12Rng,
) -> Result<Box<dyn Agent>> {
    match spec {
        OpponentSpec::Random => Ok(Box::new(RandomAgent::new(rng))),
        OpponentSpec::Heuristic => Ok(Box::new(HeuristicAgent::new())),
        OpponentSpec::Minimax(depth) => Ok(Box::new(MinimaxAgent::new(*depth))),
        OpponentSpec::Snapshot(id) => {
            let params = snapshot_params.ok_or_else(|| {
                TrainError::CheckpointNotFound(format!("snapshot opponent '{}' not resolved", id))
            })?;
            let net = Arc::new(params.into_net()?);
            Ok(Box::new(NetAgent::new(
                format!("snapshot:{}", id),
                net,
                None,
                rng,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_string_roundtrip() {
        for text in ["random", "heuristic", "minimax:2", "snapshot:ckpt-0004-ab12cd34"] {
            let spec: OpponentSpec = text.parse().unwrap();
            assert_eq!(spec.to_string(), text);
        }
    }

    #[test]
    fn test_bad_specs_are_rejected() {
        assert!("mcts".parse::<OpponentSpec>().is_err());
        assert!("minimax:0".parse::<OpponentSpec>().is_err());
        assert!("minimax:nine".parse::<OpponentSpec>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let spec = OpponentSpec::Minimax(3);
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"minimax:3\"");
        let back: OpponentSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_unresolved_snapshot_is_an_error() {
        let spec = OpponentSpec::Snapshot("ckpt-0001-deadbeef".to_string());
        let rng = crate::rng::SeedConfig::new(1).game_rng(0);
        assert!(build_opponent(&spec, None, rng).is_err());
    }
}
