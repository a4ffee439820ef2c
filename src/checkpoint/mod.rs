//! Checkpoint persistence.
//!
//! Each checkpoint is one opaque blob plus a `.meta.json` sidecar. The blob
//! starts with a 4-byte magic, a serializer-family tag byte, a version byte
//! and the frozen action-layout byte; the length-prefixed payload that
//! follows is either the compact binary family or the JSON debug family.
//! Loads detect the tag and route to the matching deserializer; a family the
//! target backend does not accept fails loudly, never silently
//! reinterpreted. The best-performing checkpoint ever saved is never evicted
//! and cannot be deleted.

use crate::config::ParamsFormat;
use crate::encoding::ACTION_LAYOUT_FROM_TO_QUEEN;
use crate::error::{Result, TrainError};
use crate::learner::LearnerSnapshot;
use crate::replay::ReplayDump;
use crate::rng::RngState;
use byteorder::{ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const BLOB_MAGIC: [u8; 4] = *b"CRLC";
const BLOB_VERSION: u8 = 1;
const BLOB_EXTENSION: &str = "ckpt";

/// Everything a checkpoint persists beyond metadata: learner state, the
/// controller's counters, replay contents and the live RNG streams. This is
/// sufficient to resume training and reproduce the remaining run
/// byte-identically under identical configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub iteration: u64,
    pub games_played_total: u64,
    pub best_score: Option<f64>,
    pub best_iteration: Option<u64>,
    pub unstable_streak: u32,
    pub snapshot: LearnerSnapshot,
    pub replay: ReplayDump,
    pub rng_master: RngState,
    pub rng_replay: RngState,
}

/// Sidecar metadata record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub id: String,
    pub iteration: u64,
    pub performance: f64,
    pub is_best: bool,
    pub created_at: String,
    pub format_tag: ParamsFormat,
    pub description: String,
    pub seed_config_hash: String,
}

/// Encode a payload into the on-disk blob format.
pub fn encode_blob(payload: &CheckpointPayload, format: ParamsFormat) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    bytes.write_all(&BLOB_MAGIC)?;
    bytes.write_u8(format.tag_byte())?;
    bytes.write_u8(BLOB_VERSION)?;
    bytes.write_u8(ACTION_LAYOUT_FROM_TO_QUEEN)?;
    match format {
        ParamsFormat::Binary => {
            let body = bincode::serialize(payload)
                .map_err(|e| TrainError::CheckpointCorrupt(format!("encode: {}", e)))?;
            bytes.write_all(&body)?;
        }
        ParamsFormat::Json => serde_json::to_writer(&mut bytes, payload)?,
    }
    Ok(bytes)
}

/// Decode a blob, requiring its family to match `target_backend`.
pub fn decode_blob(bytes: &[u8], target_backend: ParamsFormat) -> Result<CheckpointPayload> {
    let mut reader = bytes;
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| TrainError::CheckpointCorrupt("blob shorter than its header".to_string()))?;
    if magic != BLOB_MAGIC {
        return Err(TrainError::CheckpointCorrupt(format!(
            "bad magic {:02x?}",
            magic
        )));
    }
    let tag = reader.read_u8()?;
    let found = ParamsFormat::from_tag_byte(tag).ok_or_else(|| {
        TrainError::CheckpointCorrupt(format!("unknown format tag 0x{:02x}", tag))
    })?;
    if found != target_backend {
        return Err(TrainError::CheckpointFormatMismatch {
            found: found.as_str().to_string(),
            expected: target_backend.as_str().to_string(),
        });
    }
    let version = reader.read_u8()?;
    if version != BLOB_VERSION {
        return Err(TrainError::CheckpointCorrupt(format!(
            "unsupported blob version {}",
            version
        )));
    }
    let layout = reader.read_u8()?;
    if layout != ACTION_LAYOUT_FROM_TO_QUEEN {
        return Err(TrainError::CheckpointCorrupt(format!(
            "weights use action layout {}, this build expects {}",
            layout, ACTION_LAYOUT_FROM_TO_QUEEN
        )));
    }
    match found {
        ParamsFormat::Binary => bincode::deserialize(reader)
            .map_err(|e| TrainError::CheckpointCorrupt(format!("decode: {}", e))),
        ParamsFormat::Json => Ok(serde_json::from_slice(reader)?),
    }
}

/// On-disk checkpoint store with incremental best tracking and a version
/// cap.
pub struct CheckpointStore {
    dir: PathBuf,
    format: ParamsFormat,
    max_versions: usize,
    entries: Vec<CheckpointMeta>,
}

impl CheckpointStore {
    /// Open (creating the directory if needed) and index existing sidecars.
    pub fn open(dir: &Path, format: ParamsFormat, max_versions: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut entries = Vec::new();
        for item in std::fs::read_dir(dir)? {
            let path = item?.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(".meta.json"))
            {
                let text = std::fs::read_to_string(&path)?;
                match serde_json::from_str::<CheckpointMeta>(&text) {
                    Ok(meta) => entries.push(meta),
                    Err(error) => {
                        log::warn!(
                            "[Checkpoint] skipping unreadable sidecar {}: {}",
                            path.display(),
                            error
                        );
                    }
                }
            }
        }
        // Directory scan order is platform-dependent; keep the index
        // deterministic.
        entries.sort_by(|a, b| (a.iteration, &a.id).cmp(&(b.iteration, &b.id)));
        Ok(CheckpointStore {
            dir: dir.to_path_buf(),
            format,
            max_versions,
            entries,
        })
    }

    pub fn format(&self) -> ParamsFormat {
        self.format
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, BLOB_EXTENSION))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", id))
    }

    /// Persist a payload. `performance` drives best tracking: the snapshot
    /// is marked best iff it strictly exceeds every previous performance.
    pub fn save(
        &mut self,
        payload: &CheckpointPayload,
        performance: f64,
        description: &str,
        seed_config_hash: &str,
    ) -> Result<CheckpointMeta> {
        let blob = encode_blob(payload, self.format)?;
        let digest = Sha256::digest(&blob);
        let hash_prefix: String = digest
            .iter()
            .take(4)
            .map(|b| format!("{:02x}", b))
            .collect();
        let id = format!("ckpt-{:04}-{}", payload.iteration, hash_prefix);

        let is_best = self
            .best()
            .map_or(true, |best| performance > best.performance);

        std::fs::write(self.blob_path(&id), &blob)?;

        if is_best {
            // Demote the previous best in memory and on disk.
            let previous: Vec<String> = self
                .entries
                .iter()
                .filter(|e| e.is_best)
                .map(|e| e.id.clone())
                .collect();
            for prev_id in previous {
                if let Some(entry) = self.entries.iter_mut().find(|e| e.id == prev_id) {
                    entry.is_best = false;
                    let demoted = entry.clone();
                    std::fs::write(
                        self.meta_path(&prev_id),
                        serde_json::to_string_pretty(&demoted)?,
                    )?;
                }
            }
        }

        let meta = CheckpointMeta {
            id: id.clone(),
            iteration: payload.iteration,
            performance,
            is_best,
            created_at: chrono::Utc::now().to_rfc3339(),
            format_tag: self.format,
            description: description.to_string(),
            seed_config_hash: seed_config_hash.to_string(),
        };
        std::fs::write(self.meta_path(&id), serde_json::to_string_pretty(&meta)?)?;
        self.entries.push(meta.clone());
        self.enforce_cap()?;
        Ok(meta)
    }

    /// Evict worst-performing non-best checkpoints above the cap. The best
    /// checkpoint is never a candidate.
    fn enforce_cap(&mut self) -> Result<()> {
        while self.entries.len() > self.max_versions {
            let victim = self
                .entries
                .iter()
                .filter(|e| !e.is_best)
                .min_by(|a, b| {
                    a.performance
                        .partial_cmp(&b.performance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.iteration.cmp(&b.iteration))
                })
                .map(|e| e.id.clone());
            match victim {
                Some(id) => {
                    log::debug!("[Checkpoint] evicting {} over version cap", id);
                    self.remove_files(&id)?;
                    self.entries.retain(|e| e.id != id);
                }
                None => break,
            }
        }
        Ok(())
    }

    fn remove_files(&self, id: &str) -> Result<()> {
        let blob = self.blob_path(id);
        if blob.exists() {
            std::fs::remove_file(blob)?;
        }
        let meta = self.meta_path(id);
        if meta.exists() {
            std::fs::remove_file(meta)?;
        }
        Ok(())
    }

    /// Load a checkpoint by id for the given backend.
    pub fn load(&self, id: &str, target_backend: ParamsFormat) -> Result<CheckpointPayload> {
        let meta = self
            .entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| TrainError::CheckpointNotFound(id.to_string()))?;
        let bytes = std::fs::read(self.blob_path(&meta.id))?;
        decode_blob(&bytes, target_backend)
    }

    /// Load a blob outside the store's index.
    pub fn load_by_path(path: &Path, target_backend: ParamsFormat) -> Result<CheckpointPayload> {
        let bytes = std::fs::read(path)?;
        decode_blob(&bytes, target_backend)
    }

    /// The best checkpoint so far, tracked incrementally across saves.
    pub fn best(&self) -> Option<&CheckpointMeta> {
        self.entries.iter().find(|e| e.is_best)
    }

    pub fn list(&self) -> &[CheckpointMeta] {
        &self.entries
    }

    pub fn list_by_backend(&self, format: ParamsFormat) -> Vec<&CheckpointMeta> {
        self.entries
            .iter()
            .filter(|e| e.format_tag == format)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&CheckpointMeta> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Delete a checkpoint. Deleting the best one violates the retention
    /// invariant and fails.
    pub fn delete(&mut self, id: &str) -> Result<()> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| TrainError::CheckpointNotFound(id.to_string()))?;
        if entry.is_best {
            return Err(TrainError::BestCheckpointProtected(id.to_string()));
        }
        self.remove_files(id)?;
        self.entries.retain(|e| e.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LearnerConfig, ReplayConfig, ReplayKind};
    use crate::learner::DQNLearner;
    use crate::replay::{test_experience, ReplayStore};
    use crate::rng::{RngState, SeedConfig};
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    fn payload(iteration: u64, seed: u64) -> CheckpointPayload {
        let config = LearnerConfig {
            hidden_layers: vec![6],
            ..LearnerConfig::default()
        };
        let seeds = SeedConfig::new(seed);
        let mut rng = seeds.nn_init_rng();
        let learner = DQNLearner::new(&config, 5, 7, &mut rng);

        let replay_config = ReplayConfig {
            capacity: 8,
            kind: ReplayKind::Prioritized,
            alpha: 0.6,
            beta: 0.4,
        };
        let replay = ReplayStore::new(&replay_config, &seeds);
        for i in 0..5 {
            replay.push(test_experience(iteration, i, 0.1));
        }

        CheckpointPayload {
            iteration,
            games_played_total: iteration * 10,
            best_score: Some(0.4),
            best_iteration: Some(iteration.saturating_sub(1)),
            unstable_streak: 0,
            snapshot: learner.snapshot(),
            replay: replay.dump(4),
            rng_master: RngState::capture(&seeds.master_rng()),
            rng_replay: replay.rng_state(),
        }
    }

    #[test]
    fn test_blob_roundtrip_binary_and_json() {
        let payload = payload(3, 42);
        for format in [ParamsFormat::Binary, ParamsFormat::Json] {
            let blob = encode_blob(&payload, format).unwrap();
            let back = decode_blob(&blob, format).unwrap();
            assert_eq!(back, payload);
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        let a = encode_blob(&payload(3, 42), ParamsFormat::Binary).unwrap();
        let b = encode_blob(&payload(3, 42), ParamsFormat::Binary).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_format_mismatch_is_loud() {
        let payload = payload(1, 42);
        let blob = encode_blob(&payload, ParamsFormat::Json).unwrap();
        let err = decode_blob(&blob, ParamsFormat::Binary).unwrap_err();
        assert_matches!(err, TrainError::CheckpointFormatMismatch { .. });
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_corrupt_magic_is_rejected() {
        let payload = payload(1, 42);
        let mut blob = encode_blob(&payload, ParamsFormat::Binary).unwrap();
        blob[0] ^= 0xff;
        assert_matches!(
            decode_blob(&blob, ParamsFormat::Binary).unwrap_err(),
            TrainError::CheckpointCorrupt(_)
        );
    }

    #[test]
    fn test_save_load_roundtrip_through_store() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path(), ParamsFormat::Binary, 10).unwrap();
        assert_eq!(store.format(), ParamsFormat::Binary);
        let payload = payload(4, 42);
        let meta = store.save(&payload, 0.6, "iteration 4", "abc").unwrap();
        assert!(meta.is_best);
        let loaded = store.load(&meta.id, ParamsFormat::Binary).unwrap();
        assert_eq!(loaded, payload);
    }

    #[test]
    fn test_best_tracking_is_strict() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path(), ParamsFormat::Binary, 10).unwrap();
        let first = store.save(&payload(1, 1), 0.5, "", "s").unwrap();
        assert!(first.is_best);
        // Equal performance does not displace the best.
        let second = store.save(&payload(2, 2), 0.5, "", "s").unwrap();
        assert!(!second.is_best);
        let third = store.save(&payload(3, 3), 0.6, "", "s").unwrap();
        assert!(third.is_best);
        assert_eq!(store.best().unwrap().id, third.id);
        // The demotion reached the first sidecar on disk.
        let reopened = CheckpointStore::open(dir.path(), ParamsFormat::Binary, 10).unwrap();
        assert_eq!(reopened.best().unwrap().id, third.id);
    }

    #[test]
    fn test_eviction_spares_the_best() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path(), ParamsFormat::Binary, 2).unwrap();
        let best = store.save(&payload(1, 1), 0.9, "", "s").unwrap();
        store.save(&payload(2, 2), 0.2, "", "s").unwrap();
        store.save(&payload(3, 3), 0.3, "", "s").unwrap();
        assert_eq!(store.list().len(), 2);
        assert!(store.get(&best.id).is_some());
        // The worst non-best (0.2) was evicted.
        assert!(store.list().iter().all(|e| e.performance != 0.2));
    }

    #[test]
    fn test_delete_best_fails() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path(), ParamsFormat::Binary, 10).unwrap();
        let best = store.save(&payload(1, 1), 0.9, "", "s").unwrap();
        let other = store.save(&payload(2, 2), 0.1, "", "s").unwrap();
        assert_matches!(
            store.delete(&best.id).unwrap_err(),
            TrainError::BestCheckpointProtected(_)
        );
        store.delete(&other.id).unwrap();
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_load_unknown_id() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::open(dir.path(), ParamsFormat::Binary, 10).unwrap();
        assert_matches!(
            store
                .load("ckpt-0001-00000000", ParamsFormat::Binary)
                .unwrap_err(),
            TrainError::CheckpointNotFound(_)
        );
    }

    #[test]
    fn test_load_by_path_checks_backend() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path(), ParamsFormat::Json, 10).unwrap();
        let meta = store.save(&payload(1, 1), 0.5, "", "s").unwrap();
        let path = dir.path().join(format!("{}.ckpt", meta.id));
        assert!(CheckpointStore::load_by_path(&path, ParamsFormat::Json).is_ok());
        assert_matches!(
            CheckpointStore::load_by_path(&path, ParamsFormat::Binary).unwrap_err(),
            TrainError::CheckpointFormatMismatch { .. }
        );
    }

    #[test]
    fn test_list_by_backend_filters() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::open(dir.path(), ParamsFormat::Binary, 10).unwrap();
        store.save(&payload(1, 1), 0.5, "", "s").unwrap();
        assert_eq!(store.list_by_backend(ParamsFormat::Binary).len(), 1);
        assert!(store.list_by_backend(ParamsFormat::Json).is_empty());
    }
}
