//! Per-iteration metrics and the append-only CSV history.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// One row of training history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationMetrics {
    pub iteration: u64,
    pub games_played: u64,
    pub experiences_collected: u64,
    pub replay_len: u64,
    pub updates_applied: u64,
    pub loss_mean: f64,
    pub loss_variance: f64,
    pub policy_entropy: f64,
    pub grad_norm: f64,
    pub wins: u64,
    pub draws: u64,
    pub losses: u64,
    pub eval_score: f64,
    pub avg_game_length: f64,
    pub exploration_rate: f64,
    pub fallbacks: u64,
    pub unstable_batches: u64,
    pub step_limit_games: u64,
    pub selfplay_secs: f64,
    pub train_secs: f64,
    pub eval_secs: f64,
}

impl IterationMetrics {
    pub fn log(&self) {
        log::info!(
            "[Iteration {}] games {} (avg len {:.1}), replay {}, loss {:.5} (var {:.5}), \
             entropy {:.3}, |grad| {:.3}, eval {}-{}-{} (score {:.3}), eps {:.3}, \
             split {:.1}s/{:.1}s/{:.1}s",
            self.iteration,
            self.games_played,
            self.avg_game_length,
            self.replay_len,
            self.loss_mean,
            self.loss_variance,
            self.policy_entropy,
            self.grad_norm,
            self.wins,
            self.draws,
            self.losses,
            self.eval_score,
            self.exploration_rate,
            self.selfplay_secs,
            self.train_secs,
            self.eval_secs,
        );
        if self.fallbacks > 0 {
            log::warn!(
                "[Iteration {}] {} illegal-action fallbacks (encoder drift if sustained)",
                self.iteration,
                self.fallbacks
            );
        }
    }
}

/// Append-only `history.csv` under the checkpoint directory. The header is
/// written when the file is created and never repeated.
pub struct MetricsHistory {
    path: PathBuf,
}

impl MetricsHistory {
    pub fn new(dir: &Path) -> Self {
        MetricsHistory {
            path: dir.join("history.csv"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, metrics: &IterationMetrics) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let fresh = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(fresh)
            .from_writer(file);
        writer
            .serialize(metrics)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        writer
            .flush()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(())
    }

    /// Read the full history back (tooling and tests).
    pub fn read_all(&self) -> Result<Vec<IterationMetrics>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            let row: IterationMetrics =
                row.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            rows.push(row);
        }
        Ok(rows)
    }
}
