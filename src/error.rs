//! Error taxonomy for the training platform.
//!
//! Recoverable per-game and per-batch faults (illegal action fallbacks,
//! replay warm-up, unstable batches) are represented as typed results and
//! counters on the normal path; the variants here are the ones that cross
//! component boundaries or reach the operator.

use thiserror::Error;

/// Main error type for the chess-rl library.
#[derive(Debug, Error)]
pub enum TrainError {
    /// Configuration rejected at startup. The process refuses to start.
    #[error("invalid configuration:\n  {}", .issues.join("\n  "))]
    ConfigInvalid { issues: Vec<String> },

    /// An action index did not decode to a legal move in the given position.
    /// Callers fall back to a legal action and count the event; this variant
    /// only surfaces when no fallback is possible (empty legal set).
    #[error("action index {index} does not decode to a legal move")]
    InvalidMove { index: u16 },

    /// Replay was sampled before the warm-up threshold.
    #[error("replay store holds {available} experiences, {requested} requested")]
    InsufficientData { requested: usize, available: usize },

    /// NaN or Inf reached the loss or the gradients.
    #[error("numeric instability at update {update}: {detail}")]
    NumericInstability { update: u64, detail: String },

    /// A checkpoint blob carries a serializer family the target backend
    /// cannot interpret. Never silently reinterpreted.
    #[error("checkpoint format mismatch: blob is '{found}', backend accepts '{expected}'")]
    CheckpointFormatMismatch { found: String, expected: String },

    /// A checkpoint blob failed structural validation.
    #[error("corrupt checkpoint: {0}")]
    CheckpointCorrupt(String),

    /// Lookup of a checkpoint id that the store does not track.
    #[error("checkpoint '{0}' not found")]
    CheckpointNotFound(String),

    /// Deleting this checkpoint would violate the best-ever retention
    /// invariant.
    #[error("refusing to delete best checkpoint '{0}'")]
    BestCheckpointProtected(String),

    /// The rule engine rejected a move or a position.
    #[error("chess rule violation: {0}")]
    RuleViolation(String),

    /// Cooperative stop requested by the operator.
    #[error("training cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrainError {
    /// Process exit code for this error: 2 for invalid config, 3 for a
    /// checkpoint format mismatch, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            TrainError::ConfigInvalid { .. } => 2,
            TrainError::CheckpointFormatMismatch { .. } => 3,
            _ => 1,
        }
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, TrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let config = TrainError::ConfigInvalid {
            issues: vec!["gamma out of range".to_string()],
        };
        assert_eq!(config.exit_code(), 2);

        let mismatch = TrainError::CheckpointFormatMismatch {
            found: "json".to_string(),
            expected: "binary".to_string(),
        };
        assert_eq!(mismatch.exit_code(), 3);

        let generic = TrainError::Cancelled;
        assert_eq!(generic.exit_code(), 1);
    }

    #[test]
    fn test_config_invalid_lists_every_issue() {
        let err = TrainError::ConfigInvalid {
            issues: vec!["a".to_string(), "b".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("a"));
        assert!(text.contains("b"));
    }
}
