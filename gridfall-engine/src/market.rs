//! Clue market: the explicit token-spend path with server confirmation.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::backend::{BackendError, EventBackend};
use crate::ledger::{Ledger, LedgerError};

/// A clue offered for sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClueOffer {
    pub id: String,
    pub title: String,
    pub description: String,
    pub token_cost: i64,
}

/// Risk tier shown next to an offer, derived from its cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl ClueOffer {
    /// Tier thresholds: 5+ tokens is high, 3+ is medium.
    #[must_use]
    pub const fn risk_tier(&self) -> RiskTier {
        if self.token_cost >= 5 {
            RiskTier::High
        } else if self.token_cost >= 3 {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }
}

/// Errors raised by market operations.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("clue {id} is already owned")]
    AlreadyOwned { id: String },
    #[error("unknown clue {id}")]
    UnknownClue { id: String },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("purchase refused: {message}")]
    PurchaseRejected { message: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// The clue store plus the set of clues the team owns.
#[derive(Debug, Clone, Default)]
pub struct ClueMarket {
    offers: Vec<ClueOffer>,
    owned: HashSet<String>,
}

impl ClueMarket {
    /// Fetch the current offers from the backend.
    ///
    /// # Errors
    ///
    /// Returns a `Backend` error if the store cannot be fetched.
    pub fn load<B: EventBackend>(backend: &B) -> Result<Self, MarketError> {
        let offers = backend.fetch_offers()?;
        Ok(Self {
            offers,
            owned: HashSet::new(),
        })
    }

    /// The offers on sale.
    #[must_use]
    pub fn offers(&self) -> &[ClueOffer] {
        &self.offers
    }

    /// Whether a clue has been purchased.
    #[must_use]
    pub fn is_owned(&self, clue_id: &str) -> bool {
        self.owned.contains(clue_id)
    }

    /// Buy a clue. The ledger is debited locally, then the server confirms;
    /// any rejection rolls the debit back so totals never drift from the
    /// last confirmed server response.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyOwned` (no network call), `UnknownClue`,
    /// `Ledger(InsufficientTokens)`, `PurchaseRejected`, or a transport
    /// error. All but the first leave the ledger as it was before the call.
    pub fn purchase<B: EventBackend>(
        &mut self,
        backend: &B,
        ledger: &mut Ledger,
        clue_id: &str,
    ) -> Result<&ClueOffer, MarketError> {
        if self.owned.contains(clue_id) {
            return Err(MarketError::AlreadyOwned {
                id: clue_id.to_string(),
            });
        }
        let index = self
            .offers
            .iter()
            .position(|offer| offer.id == clue_id)
            .ok_or_else(|| MarketError::UnknownClue {
                id: clue_id.to_string(),
            })?;
        let cost = self.offers[index].token_cost;

        ledger.spend(cost)?;

        let confirmed = match backend.purchase_clue(clue_id) {
            Ok(response) if response.success => response,
            Ok(response) => {
                ledger.rollback_spend(cost);
                return Err(MarketError::PurchaseRejected {
                    message: response
                        .message
                        .unwrap_or_else(|| "purchase failed".to_string()),
                });
            }
            Err(err) => {
                ledger.rollback_spend(cost);
                return Err(err.into());
            }
        };

        // The server's balance is canonical when it sends one.
        if let Some(tokens_remaining) = confirmed.tokens_remaining {
            ledger.resync(ledger.points, tokens_remaining);
        }

        self.owned.insert(clue_id.to_string());
        log::info!("clue {clue_id} purchased for {cost} tokens");
        Ok(&self.offers[index])
    }
}
