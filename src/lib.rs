//! # chess-rl
//!
//! Self-play reinforcement-learning platform for chess.
//!
//! ## Features
//!
//! - **Self-play engine**: parallel per-iteration game generation against a
//!   frozen opponent pool, with deterministic per-game seeding
//! - **DQN learner**: double Q-learning over a dense 4096-action space with
//!   legal-action masking, Huber loss and a periodically synced target net
//! - **Experience pipeline**: bounded replay with uniform and prioritized
//!   sampling
//! - **Evaluation gate**: Wilson-interval match reports against heuristic,
//!   minimax and snapshot opponents
//! - **Checkpointing**: content-addressed snapshots that resume a run
//!   byte-identically, with best-ever retention
//!
//! ## Usage
//!
//! ```no_run
//! use chess_rl::config::TrainingConfig;
//! use chess_rl::controller::TrainingController;
//!
//! let mut config = TrainingConfig::default();
//! config.seed = Some(42);
//! config.iterations = 10;
//! let mut controller = TrainingController::new(config).unwrap();
//! let summary = controller.run().unwrap();
//! println!("stopped after {} iterations", summary.iterations_completed);
//! ```

// ============================================================================
// PUBLIC API MODULES
// ============================================================================

/// The single agent seam shared by self-play and evaluation
pub mod agent;

/// Checkpoint blobs, sidecars and the on-disk store
pub mod checkpoint;

/// Chess rule-engine adapter and material accounting
pub mod chess;

/// Process-wide configuration records
pub mod config;

/// Outer training loop state machine
pub mod controller;

/// State and action encodings
pub mod encoding;

/// Error taxonomy
pub mod error;

/// Evaluation harness and match statistics
pub mod eval;

/// Exploration strategies
pub mod exploration;

/// Double-DQN learner
pub mod learner;

/// Per-iteration metrics and CSV history
pub mod metrics;

/// Dense network kernel
pub mod network;

/// Reference opponents and the opponent factory
pub mod opponents;

/// Bounded experience replay
pub mod replay;

/// Partitioned RNG streams
pub mod rng;

/// Self-play workers and orchestration
pub mod selfplay;

/// Logging setup
pub mod logging;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::TrainingConfig;
pub use controller::{RunSummary, StopReason, TrainingController};
pub use error::{Result, TrainError};

// ============================================================================
// LIBRARY VERSION INFO
// ============================================================================

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
