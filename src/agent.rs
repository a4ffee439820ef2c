//! The single agent seam.
//!
//! Self-play and evaluation only ever see [`Agent`]: one operation that maps
//! a position to a chosen move. The learner participates through
//! [`NetAgent`] over a value-copied parameter snapshot, never a live
//! reference to the online net, so nothing downstream can alias mutable
//! weights.

use crate::chess::GamePosition;
use crate::encoding::{decode_action, legal_actions, ActionIndex, StateEncoder};
use crate::exploration::{self, ExplorationPolicy};
use crate::network::DenseNet;
use rand::Rng;
use rand_chacha::ChaCha12Rng;
use std::sync::Arc;

/// A selected move plus the bookkeeping the metrics care about.
#[derive(Debug, Clone)]
pub struct AgentDecision {
    pub mv: shakmaty::Move,
    pub action: ActionIndex,
    /// True when the raw selection failed to decode and a legal fallback was
    /// substituted. A sustained nonzero rate signals encoder drift.
    pub fallback: bool,
}

/// One operation: pick a move in a position. Returns `None` only when the
/// position has no legal moves.
pub trait Agent: Send {
    fn name(&self) -> &str;
    fn select(&mut self, pos: &GamePosition) -> Option<AgentDecision>;
}

/// Q-network-backed agent. With an exploration policy it is the self-play
/// learner side; without one it plays greedily (evaluation, frozen
/// snapshots).
pub struct NetAgent {
    name: String,
    net: Arc<DenseNet>,
    encoder: StateEncoder,
    exploration: Option<ExplorationPolicy>,
    rng: ChaCha12Rng,
    fallbacks: u64,
}

impl NetAgent {
    pub fn new(
        name: impl Into<String>,
        net: Arc<DenseNet>,
        exploration: Option<ExplorationPolicy>,
        rng: ChaCha12Rng,
    ) -> Self {
        NetAgent {
            name: name.into(),
            net,
            encoder: StateEncoder::new(),
            exploration,
            rng,
            fallbacks: 0,
        }
    }

    /// Fallback counter since construction.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks
    }
}

impl Agent for NetAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn select(&mut self, pos: &GamePosition) -> Option<AgentDecision> {
        let pairs = legal_actions(pos);
        if pairs.is_empty() {
            return None;
        }
        let legal: Vec<ActionIndex> = pairs.iter().map(|(index, _)| *index).collect();

        let state = self.encoder.encode(pos);
        let q_values = self.net.forward(&state);

        let chosen = match &mut self.exploration {
            Some(policy) => policy.select(&legal, &q_values, &mut self.rng),
            None => exploration::greedy(&legal, &q_values),
        };

        // The mask was built from the legal set, so the pair lookup succeeds
        // unless the codec and the mask have drifted apart; then fall back to
        // the legal action with highest Q, last to the first legal move.
        if let Some((_, mv)) = pairs.iter().find(|(index, _)| *index == chosen) {
            return Some(AgentDecision {
                mv: mv.clone(),
                action: chosen,
                fallback: false,
            });
        }

        self.fallbacks += 1;
        let fallback = exploration::greedy(&legal, &q_values);
        let mv = decode_action(pos, fallback)
            .unwrap_or_else(|| pairs[0].1.clone());
        let action = crate::encoding::encode_move(&mv);
        Some(AgentDecision {
            mv,
            action,
            fallback: true,
        })
    }
}

/// Uniform-random baseline agent.
pub struct RandomAgent {
    rng: ChaCha12Rng,
}

impl RandomAgent {
    pub fn new(rng: ChaCha12Rng) -> Self {
        RandomAgent { rng }
    }
}

impl Agent for RandomAgent {
    fn name(&self) -> &str {
        "random"
    }

    fn select(&mut self, pos: &GamePosition) -> Option<AgentDecision> {
        let pairs = legal_actions(pos);
        if pairs.is_empty() {
            return None;
        }
        let (action, mv) = pairs[self.rng.random_range(0..pairs.len())].clone();
        Some(AgentDecision {
            mv,
            action,
            fallback: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{ACTION_SPACE, STATE_SIZE};
    use crate::rng::SeedConfig;

    fn net() -> Arc<DenseNet> {
        let mut rng = SeedConfig::new(42).nn_init_rng();
        Arc::new(DenseNet::new(&[STATE_SIZE, 8, ACTION_SPACE], &mut rng))
    }

    #[test]
    fn test_net_agent_selects_legal_moves() {
        let mut agent = NetAgent::new("net", net(), None, SeedConfig::new(1).game_rng(0));
        let pos = GamePosition::startpos();
        let decision = agent.select(&pos).unwrap();
        let legal: Vec<ActionIndex> = legal_actions(&pos).iter().map(|(i, _)| *i).collect();
        assert!(legal.contains(&decision.action));
        assert!(!decision.fallback);
        assert_eq!(agent.fallback_count(), 0);
    }

    #[test]
    fn test_greedy_agent_is_deterministic() {
        let shared = net();
        let mut a = NetAgent::new("a", shared.clone(), None, SeedConfig::new(1).game_rng(0));
        let mut b = NetAgent::new("b", shared, None, SeedConfig::new(2).game_rng(9));
        let pos = GamePosition::startpos();
        assert_eq!(a.select(&pos).unwrap().action, b.select(&pos).unwrap().action);
    }

    #[test]
    fn test_no_moves_returns_none() {
        let mut agent = NetAgent::new("net", net(), None, SeedConfig::new(1).game_rng(0));
        let mate =
            GamePosition::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
                .unwrap();
        assert!(agent.select(&mate).is_none());
    }

    #[test]
    fn test_random_agent_stays_legal() {
        let mut agent = RandomAgent::new(SeedConfig::new(5).game_rng(0));
        let mut pos = GamePosition::startpos();
        for _ in 0..30 {
            if pos.is_terminal() {
                break;
            }
            let decision = agent.select(&pos).unwrap();
            pos = pos.apply(&decision.mv).unwrap();
        }
    }
}
