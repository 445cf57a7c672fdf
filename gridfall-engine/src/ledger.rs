//! Cumulative point/token ledger and its credit/spend operations.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reward amounts attached to a confirmed verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Award {
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub tokens: i64,
}

impl Award {
    /// Construct an award from point/token amounts.
    #[must_use]
    pub const fn new(points: i64, tokens: i64) -> Self {
        Self { points, tokens }
    }

    /// Whether the award carries no value.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.points == 0 && self.tokens == 0
    }
}

/// Errors raised by ledger operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient tokens: need {need}, have {have}")]
    InsufficientTokens { need: i64, have: i64 },
}

/// The team's cumulative points and tokens.
///
/// Totals only ever increase through `credit` and only decrease through the
/// explicit `spend` path; a server-rejected spend is restored with
/// `rollback_spend`. Totals never go negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Ledger {
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub tokens: i64,
}

impl Ledger {
    /// Create an empty ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            points: 0,
            tokens: 0,
        }
    }

    /// Credit a confirmed award. Negative components are ignored so a
    /// malformed response can never drain the ledger.
    pub fn credit(&mut self, award: Award) {
        self.points = self.points.saturating_add(award.points.max(0));
        self.tokens = self.tokens.saturating_add(award.tokens.max(0));
    }

    /// Debit tokens for a purchase. Applies locally only when affordable;
    /// the caller must roll back if the server rejects the purchase.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientTokens` when the balance cannot cover the cost.
    pub fn spend(&mut self, token_cost: i64) -> Result<(), LedgerError> {
        if token_cost > self.tokens {
            return Err(LedgerError::InsufficientTokens {
                need: token_cost,
                have: self.tokens,
            });
        }
        self.tokens -= token_cost.max(0);
        Ok(())
    }

    /// Restore a locally-applied spend after a server rejection.
    pub fn rollback_spend(&mut self, token_cost: i64) {
        self.tokens = self.tokens.saturating_add(token_cost.max(0));
    }

    /// Overwrite totals with the authoritative server snapshot.
    /// Reconciliation-only: every other mutation goes through credit/spend.
    pub fn resync(&mut self, points: i64, tokens: i64) {
        self.points = points.max(0);
        self.tokens = tokens.max(0);
    }

    /// Fold another ledger's totals into this one (round delta absorption).
    pub fn absorb(&mut self, delta: &Ledger) {
        self.points = self.points.saturating_add(delta.points);
        self.tokens = self.tokens.saturating_add(delta.tokens);
    }
}
