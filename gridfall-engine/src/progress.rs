//! Cross-round event progress: the global ledger, completed rounds, and
//! recovered data fragments.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::constants::FRAGMENT_BONUS_POINTS;
use crate::ledger::{Award, Ledger};
use crate::session::RoundSummary;

/// Everything that outlives a single round session. Explicitly constructed
/// and owned by whoever drives the event; never ambient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventProgress {
    #[serde(default)]
    pub ledger: Ledger,
    #[serde(default)]
    pub completed_rounds: BTreeSet<String>,
    #[serde(default)]
    pub fragments: BTreeSet<String>,
}

impl EventProgress {
    /// Fresh progress with an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a round complete. Idempotent.
    pub fn complete_round(&mut self, round_id: &str) {
        self.completed_rounds.insert(round_id.to_string());
    }

    /// Whether a round has been completed.
    #[must_use]
    pub fn is_round_complete(&self, round_id: &str) -> bool {
        self.completed_rounds.contains(round_id)
    }

    /// Record a recovered fragment, crediting its bonus exactly once.
    /// Returns whether the fragment was new.
    pub fn unlock_fragment(&mut self, fragment_id: &str) -> bool {
        if !self.fragments.insert(fragment_id.to_string()) {
            return false;
        }
        self.ledger.credit(Award::new(FRAGMENT_BONUS_POINTS, 0));
        true
    }

    /// Fold a finished round into the event: ledger delta credited, round
    /// marked complete.
    pub fn absorb(&mut self, summary: &RoundSummary) {
        self.ledger.absorb(&summary.delta);
        self.complete_round(&summary.round_id);
    }
}
