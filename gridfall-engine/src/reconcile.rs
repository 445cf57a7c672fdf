//! Persistence reconciler: one read/write contract for durable local
//! state, and the server-wins merge applied on round entry.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use twox_hash::XxHash64;

use crate::backend::ProgressSnapshot;
use crate::grid::{Node, NodeGrid};
use crate::ledger::Ledger;

const CHECKSUM_SEED: u64 = 0x4d49_5252_4f52; // "MIRROR"

/// Durable key-value store for round state. Platform layers back this with
/// whatever survives a reload (browser storage, a file, a test map).
pub trait CacheStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn read(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn write(&self, key: &str, value: &str) -> Result<(), Self::Error>;

    /// Delete a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn delete(&self, key: &str) -> Result<(), Self::Error>;
}

/// Cache key for a round's node array.
#[must_use]
pub fn nodes_key(round_id: &str) -> String {
    format!("round:{round_id}:nodes")
}

/// Cache key for a round's ledger delta.
#[must_use]
pub fn ledger_key(round_id: &str) -> String {
    format!("round:{round_id}:ledger_delta")
}

/// Errors raised while mirroring state. Load-side corruption is not an
/// error: it degrades to "no cache" so the authoritative snapshot wins.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("serializing round state failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Wrap a payload with an integrity checksum.
#[must_use]
pub fn seal(body: &str) -> String {
    let sum = XxHash64::oneshot(CHECKSUM_SEED, body.as_bytes());
    format!("{sum:016x}:{body}")
}

/// Verify and strip the checksum. Returns `None` for anything that does
/// not round-trip; a corrupted cache is treated as an absent cache.
#[must_use]
pub fn unseal(sealed: &str) -> Option<&str> {
    let (sum_hex, body) = sealed.split_once(':')?;
    let expected = u64::from_str_radix(sum_hex, 16).ok()?;
    if XxHash64::oneshot(CHECKSUM_SEED, body.as_bytes()) != expected {
        return None;
    }
    Some(body)
}

/// Locally cached round state, restored on reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoredRound {
    pub nodes: Vec<Node>,
    pub ledger_delta: Ledger,
}

/// Load a round's cached state. Read failures and corrupted payloads
/// degrade to `None` (re-fetch the authoritative snapshot), never a crash.
pub fn load_round<C: CacheStore>(cache: &C, round_id: &str) -> Option<RestoredRound> {
    let nodes_raw = read_sealed(cache, &nodes_key(round_id))?;
    let ledger_raw = read_sealed(cache, &ledger_key(round_id))?;

    let nodes: Vec<Node> = decode(&nodes_raw, round_id)?;
    let ledger_delta: Ledger = decode(&ledger_raw, round_id)?;
    Some(RestoredRound {
        nodes,
        ledger_delta,
    })
}

fn read_sealed<C: CacheStore>(cache: &C, key: &str) -> Option<String> {
    match cache.read(key) {
        Ok(Some(sealed)) => match unseal(&sealed) {
            Some(body) => Some(body.to_string()),
            None => {
                log::warn!("cache entry {key} failed its integrity check; discarding");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            log::warn!("cache read for {key} failed: {err}; treating as absent");
            None
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &str, round_id: &str) -> Option<T> {
    match serde_json::from_str(body) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("cached state for round {round_id} unparseable: {err}; discarding");
            None
        }
    }
}

/// Mirror the current grid and ledger delta to durable storage. Called
/// after every resolve and credit. Write failures are logged, not fatal;
/// the server remains the source of truth either way.
///
/// # Errors
///
/// Returns `Encode` only if the state itself cannot be serialized.
pub fn mirror<C: CacheStore>(
    cache: &C,
    round_id: &str,
    nodes: &[Node],
    ledger_delta: &Ledger,
) -> Result<(), ReconcileError> {
    let nodes_body = serde_json::to_string(nodes)?;
    let ledger_body = serde_json::to_string(ledger_delta)?;
    if let Err(err) = cache.write(&nodes_key(round_id), &seal(&nodes_body)) {
        log::warn!("mirroring nodes for round {round_id} failed: {err}");
    }
    if let Err(err) = cache.write(&ledger_key(round_id), &seal(&ledger_body)) {
        log::warn!("mirroring ledger delta for round {round_id} failed: {err}");
    }
    Ok(())
}

/// Drop a round's cached state (server reported no progress, or the round
/// is finished).
pub fn discard<C: CacheStore>(cache: &C, round_id: &str) {
    for key in [nodes_key(round_id), ledger_key(round_id)] {
        if let Err(err) = cache.delete(&key) {
            log::warn!("discarding cache entry {key} failed: {err}");
        }
    }
}

/// Merge the authoritative snapshot into the grid, server status taking
/// precedence: snapshot members become solved, locally-solved nodes the
/// server omits fall back to locked. Blocked nodes are local knowledge of
/// a definitive incorrect verdict and are left alone.
pub fn reconcile_grid(grid: &mut NodeGrid, snapshot: &ProgressSnapshot) {
    for id in 0..grid.len() {
        if snapshot.solved_node_ids.contains(&id) {
            grid.force_solved(id);
        } else {
            grid.demote_to_locked(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CompletionRule, NodeStatus, RetryRule};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::convert::Infallible;

    #[derive(Default)]
    struct MemoryCache {
        entries: RefCell<HashMap<String, String>>,
    }

    impl CacheStore for MemoryCache {
        type Error = Infallible;

        fn read(&self, key: &str) -> Result<Option<String>, Self::Error> {
            Ok(self.entries.borrow().get(key).cloned())
        }

        fn write(&self, key: &str, value: &str) -> Result<(), Self::Error> {
            self.entries
                .borrow_mut()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<(), Self::Error> {
            self.entries.borrow_mut().remove(key);
            Ok(())
        }
    }

    fn sample_nodes() -> Vec<Node> {
        let mut grid = NodeGrid::new(3, CompletionRule::AllResolved, RetryRule::Terminal);
        grid.bind_question(0, "q-0").unwrap();
        grid.resolve(0, true).unwrap();
        grid.nodes().to_vec()
    }

    #[test]
    fn seal_and_unseal_round_trip() {
        let sealed = seal(r#"{"points":100}"#);
        assert_eq!(unseal(&sealed), Some(r#"{"points":100}"#));
    }

    #[test]
    fn unseal_rejects_tampered_payloads() {
        let sealed = seal("payload");
        let tampered = sealed.replace("payload", "paylaod");
        assert_eq!(unseal(&tampered), None);
        assert_eq!(unseal("not-even-sealed"), None);
    }

    #[test]
    fn mirror_then_load_restores_state() {
        let cache = MemoryCache::default();
        let nodes = sample_nodes();
        let delta = Ledger {
            points: 100,
            tokens: 1,
        };

        mirror(&cache, "firewall", &nodes, &delta).unwrap();
        let restored = load_round(&cache, "firewall").unwrap();
        assert_eq!(restored.nodes, nodes);
        assert_eq!(restored.ledger_delta, delta);
    }

    #[test]
    fn corrupted_cache_degrades_to_absent() {
        let cache = MemoryCache::default();
        let nodes = sample_nodes();
        mirror(&cache, "firewall", &nodes, &Ledger::new()).unwrap();

        // Flip a byte inside the sealed nodes payload.
        let key = nodes_key("firewall");
        let mut sealed = cache.read(&key).unwrap().unwrap();
        sealed.truncate(sealed.len() - 1);
        cache.write(&key, &sealed).unwrap();

        assert!(load_round(&cache, "firewall").is_none());
    }

    #[test]
    fn discard_removes_both_keys() {
        let cache = MemoryCache::default();
        mirror(&cache, "firewall", &sample_nodes(), &Ledger::new()).unwrap();
        discard(&cache, "firewall");
        assert!(cache.read(&nodes_key("firewall")).unwrap().is_none());
        assert!(cache.read(&ledger_key("firewall")).unwrap().is_none());
    }

    #[test]
    fn reconcile_forces_server_view() {
        let mut grid = NodeGrid::new(8, CompletionRule::AllResolved, RetryRule::Terminal);
        // Local state: 7 solved (server will omit it), 2 blocked, 5 solved.
        grid.resolve(7, true).unwrap();
        grid.resolve(2, false).unwrap();
        grid.resolve(5, true).unwrap();

        let snapshot = ProgressSnapshot {
            solved_node_ids: vec![3, 5],
            points: 200,
            tokens: 2,
        };
        reconcile_grid(&mut grid, &snapshot);

        assert_eq!(grid.node(3).unwrap().status, NodeStatus::Solved);
        assert_eq!(grid.node(5).unwrap().status, NodeStatus::Solved);
        // Server wins: node 7's local optimism is reset.
        assert_eq!(grid.node(7).unwrap().status, NodeStatus::Locked);
        // Blocked is local knowledge; the server has no contrary claim.
        assert_eq!(grid.node(2).unwrap().status, NodeStatus::Blocked);
    }
}
