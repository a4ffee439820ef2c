//! Partitioned random-number streams.
//!
//! Every source of randomness in a run is a `ChaCha12Rng` stream derived
//! from the single master seed with the splitmix64 mixing function below.
//! Streams are never shared across roles: the controller owns the master
//! stream, the learner owns replay sampling, each self-play game gets its
//! own stream keyed by the global game ordinal, and evaluation derives a
//! fresh stream from `(master, "eval", iteration, opponent_tag)` so it can
//! never perturb training.
//!
//! A stream's state is its 32-byte seed plus the ChaCha word position, which
//! round-trips exactly through checkpoints.

use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

// Role tags mixed into the master seed. Values are arbitrary but frozen:
// changing one re-keys every stream of that role.
const TAG_MASTER: u64 = 0x4d41_5354_4552_0001;
const TAG_NN_INIT: u64 = 0x4e4e_494e_4954_0002;
const TAG_GAME: u64 = 0x4741_4d45_5345_0003;
const TAG_REPLAY: u64 = 0x5245_504c_4159_0004;
const TAG_EVAL: u64 = 0x4556_414c_5345_0005;

/// splitmix64 finalizer. Small, well-distributed, and stable across
/// platforms, which is all the stream derivation needs.
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Mix a seed with a role tag and an index into a fresh 64-bit seed.
pub fn mix(seed: u64, tag: u64, index: u64) -> u64 {
    splitmix64(splitmix64(seed ^ tag).wrapping_add(index))
}

/// Fold a string tag into a 64-bit value for mixing.
fn fold_tag(tag: &str) -> u64 {
    let mut acc = 0xcbf2_9ce4_8422_2325u64;
    for byte in tag.bytes() {
        acc = splitmix64(acc ^ u64::from(byte));
    }
    acc
}

/// Seed configuration handed to components at construction. Immutable for
/// the life of a run; checkpoints persist it alongside live stream states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedConfig {
    pub master: u64,
}

impl SeedConfig {
    pub fn new(master: u64) -> Self {
        SeedConfig { master }
    }

    /// The controller's own stream (opponent-pool draws).
    pub fn master_rng(&self) -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(mix(self.master, TAG_MASTER, 0))
    }

    /// One-shot stream for network weight initialization.
    pub fn nn_init_rng(&self) -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(mix(self.master, TAG_NN_INIT, 0))
    }

    /// Per-game exploration stream, keyed by the global game ordinal so no
    /// two games in a run ever share a stream.
    pub fn game_rng(&self, game_ordinal: u64) -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(mix(self.master, TAG_GAME, game_ordinal))
    }

    /// The learner's replay-sampling stream.
    pub fn replay_rng(&self) -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(mix(self.master, TAG_REPLAY, 0))
    }

    /// Evaluation stream, derived from `(master, "eval", iteration,
    /// opponent_tag)` and therefore disjoint from every training stream.
    pub fn eval_rng(&self, iteration: u64, opponent_tag: &str) -> ChaCha12Rng {
        let keyed = mix(self.master, TAG_EVAL, iteration);
        ChaCha12Rng::seed_from_u64(splitmix64(keyed ^ fold_tag(opponent_tag)))
    }

    /// Stable fingerprint of the seed configuration for checkpoint metadata.
    pub fn fingerprint(&self) -> String {
        format!("{:016x}", splitmix64(self.master))
    }
}

/// Serialized state of one ChaCha stream: seed plus word position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub seed: [u8; 32],
    pub word_pos: u128,
}

impl RngState {
    /// Capture the exact state of a live stream.
    pub fn capture(rng: &ChaCha12Rng) -> Self {
        RngState {
            seed: rng.get_seed(),
            word_pos: rng.get_word_pos(),
        }
    }

    /// Rebuild the stream at the captured position.
    pub fn restore(&self) -> ChaCha12Rng {
        let mut rng = ChaCha12Rng::from_seed(self.seed);
        rng.set_word_pos(self.word_pos);
        rng
    }
}
