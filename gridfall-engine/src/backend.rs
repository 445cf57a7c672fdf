//! Trait seam and wire types for the authoritative event backend.
//!
//! The engine never talks HTTP directly; platform layers implement
//! `EventBackend` and own transport, retries at the socket level, and the
//! exact wire format. The engine only sees these shapes.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::Question;
use crate::market::ClueOffer;

/// Transport/protocol failures surfaced by a backend implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no bearer credential available")]
    Unauthenticated,
    #[error("network failure: {0}")]
    Network(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("payload rejected: {message}")]
    Rejected { message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Answer attempt payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub question_id: String,
    pub answer: String,
}

/// Authoritative response to an answer attempt. The `correct` field, not
/// HTTP success, carries the verdict; reward amounts are optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(default)]
    pub correct: Option<bool>,
    #[serde(default)]
    pub points_awarded: Option<i64>,
    #[serde(default)]
    pub tokens_awarded: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Authoritative progress for a round, fetched on (re)entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub solved_node_ids: Vec<u16>,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub tokens: i64,
}

impl ProgressSnapshot {
    /// Whether the server reports any progress for this round.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.solved_node_ids.is_empty() && self.points == 0 && self.tokens == 0
    }
}

/// Server confirmation of a clue purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub success: bool,
    /// Canonical token balance after the purchase, when the server sends it.
    #[serde(default)]
    pub tokens_remaining: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The authoritative remote service, abstracted.
///
/// Implementations attach the bearer credential to every request;
/// `auth_token` lets the engine fail fast with `Unauthenticated` before
/// attempting a round.
pub trait EventBackend {
    /// The bearer credential, if the team is logged in.
    fn auth_token(&self) -> Option<String>;

    /// Fetch the question set for a round.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` if the questions cannot be fetched.
    fn fetch_questions(&self, round_id: &str) -> Result<Vec<Question>, BackendError>;

    /// Submit an answer attempt for authoritative validation.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` for transport failures or explicit payload
    /// rejection; the gateway maps these onto the verdict taxonomy.
    fn submit_answer(&self, round_id: &str, request: &SubmitRequest)
    -> Result<SubmitResponse, BackendError>;

    /// Fetch the authoritative progress snapshot for a round.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` if the snapshot cannot be fetched.
    fn fetch_progress(&self, round_id: &str) -> Result<ProgressSnapshot, BackendError>;

    /// Fetch the clue offers currently for sale.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` if the store cannot be fetched.
    fn fetch_offers(&self) -> Result<Vec<ClueOffer>, BackendError>;

    /// Ask the server to confirm a clue purchase.
    ///
    /// # Errors
    ///
    /// Returns a `BackendError` for transport failures; an unaffordable or
    /// otherwise refused purchase comes back as `success: false`.
    fn purchase_clue(&self, clue_id: &str) -> Result<PurchaseResponse, BackendError>;
}
