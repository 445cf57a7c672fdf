//! Submission gateway: serializes attempts, interprets authoritative
//! responses, and guarantees idempotency at the client boundary.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::backend::{BackendError, EventBackend, SubmitRequest, SubmitResponse};
use crate::ledger::Award;

/// The authoritative determination for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Correct,
    Incorrect,
}

/// A definitive verdict, including the reward the server attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub kind: VerdictKind,
    /// Zero for incorrect verdicts.
    #[serde(default)]
    pub award: Award,
    #[serde(default)]
    pub message: Option<String>,
}

impl Verdict {
    /// Whether the attempt was judged correct.
    #[must_use]
    pub const fn is_correct(&self) -> bool {
        matches!(self.kind, VerdictKind::Correct)
    }
}

/// Non-definitive submission failures. A definitive rejection is not an
/// error; it becomes an incorrect `Verdict`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Missing credential; fatal to the round, never retried here.
    #[error("no credential available for submission")]
    Unauthenticated,
    /// Network failure or an ambiguous response. Safe to retry: the node
    /// stays locked and no attempt was counted.
    #[error("submission could not be confirmed: {reason}")]
    Transient { reason: String },
}

/// Serializes attempts and caches definitive verdicts per
/// `(node, question)` so duplicates never re-contact the server.
#[derive(Debug, Clone)]
pub struct SubmissionGateway {
    round_id: String,
    default_award: Award,
    verdicts: HashMap<(u16, String), Verdict>,
    network_calls: u32,
}

impl SubmissionGateway {
    /// Build a gateway for one round. `default_award` is the documented
    /// credit policy applied when the server confirms an answer without
    /// naming reward amounts.
    #[must_use]
    pub fn new(round_id: &str, default_award: Award) -> Self {
        Self {
            round_id: round_id.to_string(),
            default_award,
            verdicts: HashMap::new(),
            network_calls: 0,
        }
    }

    /// Submit an answer and interpret the authoritative response.
    ///
    /// Once a definitive verdict exists for `(node_id, question_id)`, repeat
    /// calls return the cached verdict without touching the network.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` when no credential is available, or
    /// `Transient` for network failures and ambiguous responses (the caller
    /// may retry; nothing was recorded).
    pub fn submit<B: EventBackend>(
        &mut self,
        backend: &B,
        node_id: u16,
        question_id: &str,
        raw_answer: &str,
    ) -> Result<Verdict, SubmitError> {
        let key = (node_id, question_id.to_string());
        if let Some(cached) = self.verdicts.get(&key) {
            log::debug!("returning cached verdict for node {node_id}");
            return Ok(cached.clone());
        }

        if backend.auth_token().is_none() {
            return Err(SubmitError::Unauthenticated);
        }

        let request = SubmitRequest {
            question_id: question_id.to_string(),
            answer: raw_answer.trim().to_string(),
        };
        self.network_calls = self.network_calls.saturating_add(1);
        let verdict = match backend.submit_answer(&self.round_id, &request) {
            Ok(response) => self.interpret(&response)?,
            Err(BackendError::Rejected { message }) => Verdict {
                kind: VerdictKind::Incorrect,
                award: Award::default(),
                message: Some(message),
            },
            Err(BackendError::Unauthenticated) => return Err(SubmitError::Unauthenticated),
            Err(err) => {
                return Err(SubmitError::Transient {
                    reason: err.to_string(),
                });
            }
        };

        self.verdicts.insert(key, verdict.clone());
        Ok(verdict)
    }

    /// Map a 2xx response onto a verdict, failing closed on ambiguity: an
    /// HTTP success without an explicit `correct` field is never treated as
    /// correct.
    fn interpret(&self, response: &SubmitResponse) -> Result<Verdict, SubmitError> {
        if !response.success {
            return Ok(Verdict {
                kind: VerdictKind::Incorrect,
                award: Award::default(),
                message: response.message.clone(),
            });
        }
        match response.correct {
            Some(true) => Ok(Verdict {
                kind: VerdictKind::Correct,
                award: self.award_from(response),
                message: response.message.clone(),
            }),
            Some(false) => Ok(Verdict {
                kind: VerdictKind::Incorrect,
                award: Award::default(),
                message: response.message.clone(),
            }),
            None => Err(SubmitError::Transient {
                reason: "response omitted the verdict field".to_string(),
            }),
        }
    }

    /// Server-provided amounts win; the configured default applies only when
    /// the server names neither amount.
    fn award_from(&self, response: &SubmitResponse) -> Award {
        if response.points_awarded.is_none() && response.tokens_awarded.is_none() {
            return self.default_award;
        }
        Award::new(
            response.points_awarded.unwrap_or(0),
            response.tokens_awarded.unwrap_or(0),
        )
    }

    /// The cached verdict for a key, if any.
    #[must_use]
    pub fn cached(&self, node_id: u16, question_id: &str) -> Option<&Verdict> {
        self.verdicts.get(&(node_id, question_id.to_string()))
    }

    /// Drop the cached verdict for a key. Used when a round's retry policy
    /// resets a blocked node: the fresh attempt must reach the server.
    pub fn invalidate(&mut self, node_id: u16, question_id: &str) {
        self.verdicts.remove(&(node_id, question_id.to_string()));
    }

    /// Number of attempts that actually reached the backend.
    #[must_use]
    pub const fn network_calls(&self) -> u32 {
        self.network_calls
    }
}
