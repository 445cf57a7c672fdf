//! Gridfall Event Engine
//!
//! Platform-agnostic progression and session-synchronization logic for the
//! Gridfall puzzle event. This crate models node lifecycles, validates
//! answers against the authoritative backend, drives round timers, and
//! keeps local persistence reconciled with the server's ledger. No UI or
//! platform-specific dependencies.

pub mod backend;
pub mod config;
pub mod constants;
pub mod data;
pub mod gateway;
pub mod grid;
pub mod ledger;
pub mod market;
pub mod progress;
pub mod reconcile;
pub mod session;
pub mod supply;

// Re-export commonly used types
pub use backend::{
    BackendError, EventBackend, ProgressSnapshot, PurchaseResponse, SubmitRequest, SubmitResponse,
};
pub use config::RoundConfig;
pub use data::{AnswerShape, Question, QuestionCatalog};
pub use gateway::{SubmissionGateway, SubmitError, Verdict, VerdictKind};
pub use grid::{CompletionRule, GridError, Node, NodeGrid, NodeStatus, RetryRule};
pub use ledger::{Award, Ledger, LedgerError};
pub use market::{ClueMarket, ClueOffer, MarketError, RiskTier};
pub use progress::EventProgress;
pub use reconcile::{CacheStore, ReconcileError, RestoredRound, ledger_key, nodes_key};
pub use session::{
    AttemptTicket, RoundPhase, RoundSession, RoundSummary, SessionError, SubmissionDisposition,
    TickOutcome,
};
pub use supply::{AssignmentMode, QuestionSupply, SupplyError};

use thiserror::Error;

/// Errors raised while entering a round.
#[derive(Debug, Error)]
pub enum EnterRoundError {
    /// Missing credential. Fatal to the round, surfaced to the user.
    #[error("no bearer credential; log in before entering a round")]
    Unauthenticated,
    /// Question fetch failed. Retrying round entry is safe and idempotent.
    #[error(transparent)]
    Supply(#[from] SupplyError),
    /// The authoritative progress snapshot could not be fetched; without it
    /// reconciliation cannot run. Retrying round entry is safe.
    #[error("progress snapshot unavailable: {0}")]
    Progress(BackendError),
}

/// Main engine binding a backend and a durable cache.
pub struct EventEngine<B, C>
where
    B: EventBackend,
    C: CacheStore,
{
    backend: B,
    cache: C,
}

impl<B, C> EventEngine<B, C>
where
    B: EventBackend,
    C: CacheStore,
{
    /// Create an engine with the provided backend and cache.
    pub const fn new(backend: B, cache: C) -> Self {
        Self { backend, cache }
    }

    /// Borrow the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Borrow the cache.
    #[must_use]
    pub const fn cache(&self) -> &C {
        &self.cache
    }

    /// Enter a round: check credentials, fetch questions, rehydrate local
    /// state, and reconcile against the authoritative snapshot. The global
    /// ledger is resynced to the snapshot totals; server wins, always.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated`, `Supply` (question fetch failed or
    /// catalog empty), or `Progress` (snapshot fetch failed). All are safe
    /// to retry.
    pub fn enter_round(
        &self,
        config: RoundConfig,
        progress: &mut EventProgress,
    ) -> Result<RoundSession, EnterRoundError> {
        if self.backend.auth_token().is_none() {
            return Err(EnterRoundError::Unauthenticated);
        }

        let questions = self
            .backend
            .fetch_questions(&config.round_id)
            .map_err(|err| SupplyError::Unavailable {
                reason: err.to_string(),
            })?;
        let supply = QuestionSupply::new(
            QuestionCatalog::from_questions(questions),
            config.assignment,
            config.seed,
        )?;

        let snapshot = self
            .backend
            .fetch_progress(&config.round_id)
            .map_err(EnterRoundError::Progress)?;

        let session = if snapshot.is_empty() {
            // The server has no progress for this round: stale local
            // optimism must not resurrect any.
            reconcile::discard(&self.cache, &config.round_id);
            RoundSession::new(config, supply)
        } else {
            let restored = reconcile::load_round(&self.cache, &config.round_id)
                .filter(|r| r.nodes.len() == usize::from(config.node_count));
            let mut session = match restored {
                Some(r) => RoundSession::restore(config, supply, r.nodes, r.ledger_delta),
                None => RoundSession::new(config, supply),
            };
            session.reconcile_with(&snapshot);
            session
        };

        progress.ledger.resync(snapshot.points, snapshot.tokens);
        self.mirror_round(&session);
        log::info!(
            "entered round {} ({} solved per server)",
            session.config().round_id,
            snapshot.solved_node_ids.len()
        );
        Ok(session)
    }

    /// Mirror a session's grid and ledger delta to the durable cache.
    /// Best-effort: a failed mirror is logged, not fatal; the server
    /// remains the source of truth either way.
    pub fn mirror_round(&self, session: &RoundSession) {
        if let Err(err) = reconcile::mirror(
            &self.cache,
            &session.config().round_id,
            session.grid().nodes(),
            session.ledger_delta(),
        ) {
            log::warn!("mirroring round state failed: {err}");
        }
    }

    /// Fold a finished round into the event progress and drop its cache.
    pub fn finish_round(&self, summary: &RoundSummary, progress: &mut EventProgress) {
        progress.absorb(summary);
        reconcile::discard(&self.cache, &summary.round_id);
    }

    /// Leave a round early: the timer stops, late verdicts will be
    /// discarded, and the current state stays mirrored for a same-round
    /// resume (the next entry reconciles it against the server anyway).
    pub fn abandon_round(&self, session: &mut RoundSession) {
        self.mirror_round(session);
        session.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::convert::Infallible;

    #[derive(Default)]
    struct FixtureBackend {
        token: Option<String>,
        questions: Vec<Question>,
        snapshot: ProgressSnapshot,
    }

    impl FixtureBackend {
        fn with_questions(count: u16) -> Self {
            Self {
                token: Some("token".to_string()),
                questions: (0..count)
                    .map(|i| Question {
                        id: format!("q-{i}"),
                        prompt: format!("prompt {i}"),
                        shape: AnswerShape::FreeText,
                        choices: vec![],
                        order: None,
                    })
                    .collect(),
                snapshot: ProgressSnapshot::default(),
            }
        }
    }

    impl EventBackend for FixtureBackend {
        fn auth_token(&self) -> Option<String> {
            self.token.clone()
        }

        fn fetch_questions(&self, _round_id: &str) -> Result<Vec<Question>, BackendError> {
            Ok(self.questions.clone())
        }

        fn submit_answer(
            &self,
            _round_id: &str,
            _request: &SubmitRequest,
        ) -> Result<SubmitResponse, BackendError> {
            Ok(SubmitResponse {
                success: true,
                correct: Some(true),
                points_awarded: Some(100),
                tokens_awarded: Some(1),
                message: None,
            })
        }

        fn fetch_progress(&self, _round_id: &str) -> Result<ProgressSnapshot, BackendError> {
            Ok(self.snapshot.clone())
        }

        fn fetch_offers(&self) -> Result<Vec<ClueOffer>, BackendError> {
            Ok(vec![])
        }

        fn purchase_clue(&self, _clue_id: &str) -> Result<PurchaseResponse, BackendError> {
            Ok(PurchaseResponse {
                success: false,
                tokens_remaining: None,
                message: None,
            })
        }
    }

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

    fn small_config() -> RoundConfig {
        RoundConfig {
            round_id: "test-round".to_string(),
            node_count: 4,
            ..RoundConfig::logic_grid()
        }
    }

    #[test]
    fn entering_without_a_token_is_unauthenticated() {
        let mut backend = FixtureBackend::with_questions(4);
        backend.token = None;
        let engine = EventEngine::new(backend, MemoryCache::default());
        let mut progress = EventProgress::new();

        assert!(matches!(
            engine.enter_round(small_config(), &mut progress),
            Err(EnterRoundError::Unauthenticated)
        ));
    }

    #[test]
    fn fresh_entry_discards_stale_cache_when_server_has_nothing() {
        let backend = FixtureBackend::with_questions(4);
        let cache = MemoryCache::default();
        // Stale optimism from an earlier run.
        cache
            .write(
                &nodes_key("test-round"),
                &reconcile::seal(r#"[{"id":0,"status":"solved"}]"#),
            )
            .unwrap();

        let engine = EventEngine::new(backend, cache);
        let mut progress = EventProgress::new();
        let session = engine.enter_round(small_config(), &mut progress).unwrap();

        assert_eq!(session.grid().solved_count(), 0);
        assert_eq!(progress.ledger, Ledger::default());
    }

    #[test]
    fn entry_with_server_progress_reconciles_and_resyncs_ledger() {
        let mut backend = FixtureBackend::with_questions(4);
        backend.snapshot = ProgressSnapshot {
            solved_node_ids: vec![1, 2],
            points: 200,
            tokens: 2,
        };
        let engine = EventEngine::new(backend, MemoryCache::default());
        let mut progress = EventProgress::new();
        progress.ledger.credit(Award::new(999, 9)); // stale local totals

        let session = engine.enter_round(small_config(), &mut progress).unwrap();

        assert_eq!(session.grid().solved_count(), 2);
        assert_eq!(session.grid().node(1).unwrap().status, NodeStatus::Solved);
        assert_eq!(progress.ledger, Ledger { points: 200, tokens: 2 });
        // The merged view is mirrored for a same-round reload.
        assert!(
            engine
                .cache()
                .read(&nodes_key("test-round"))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn finish_round_absorbs_summary_and_drops_cache() {
        let backend = FixtureBackend::with_questions(2);
        let engine = EventEngine::new(backend, MemoryCache::default());
        let mut progress = EventProgress::new();

        let mut session = engine.enter_round(small_config(), &mut progress).unwrap();
        session.acknowledge_intro().unwrap();
        engine.mirror_round(&session);

        let summary = RoundSummary {
            round_id: "test-round".to_string(),
            solved: 2,
            blocked: 0,
            unanswered: 2,
            delta: Ledger {
                points: 200,
                tokens: 2,
            },
            expired_by_timer: false,
        };
        engine.finish_round(&summary, &mut progress);

        assert!(progress.is_round_complete("test-round"));
        assert_eq!(progress.ledger.points, 200);
        assert!(
            engine
                .cache()
                .read(&nodes_key("test-round"))
                .unwrap()
                .is_none()
        );
    }
}
