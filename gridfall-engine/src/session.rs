//! Round session controller: phase machine, countdown, and the sequencing
//! of every other component during a round.
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::backend::EventBackend;
use crate::config::RoundConfig;
use crate::constants::{
    LOG_CANCELLED, LOG_EXPIRED_COMPLETE, LOG_EXPIRED_TIMER, LOG_INTRO_ACKED, LOG_NODE_OPENED,
    LOG_NODE_RETRIED, LOG_ROUND_ENTERED, LOG_VERDICT_CORRECT, LOG_VERDICT_DISCARDED,
    LOG_VERDICT_INCORRECT, LOG_VERDICT_LATE,
};
use crate::data::Question;
use crate::gateway::{SubmissionGateway, SubmitError, Verdict};
use crate::grid::{GridError, Node, NodeGrid, NodeStatus};
use crate::ledger::Ledger;
use crate::supply::{QuestionSupply, SupplyError};

/// Interactive state of a round session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Briefing shown; all node interaction blocked until acknowledged.
    Intro,
    /// Countdown running, nodes interactive.
    Active,
    /// Terminal for interaction. Entered exactly once, by timer or by
    /// completing the grid, whichever fires first.
    Expired,
}

/// Final handoff payload produced exactly once when a round expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round_id: String,
    pub solved: u16,
    pub blocked: u16,
    pub unanswered: u16,
    /// The session's point/token earnings, to be absorbed into the global
    /// ledger by the consumer.
    pub delta: Ledger,
    pub expired_by_timer: bool,
}

/// Result of advancing the countdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do (not active, cancelled, or already expired).
    Idle,
    /// Still counting down.
    Running { remaining_secs: u32 },
    /// This tick forced expiry; carries the one-shot handoff payload.
    Expired(RoundSummary),
}

/// Witness that a submission left for the server. Produced by
/// `begin_submission`, consumed by `finish_submission`/`abort_submission`,
/// so a verdict can land after expiry and still be applied to the node it
/// was in flight for.
#[derive(Debug)]
pub struct AttemptTicket {
    node_id: u16,
    question_id: String,
}

impl AttemptTicket {
    /// The node this attempt targets.
    #[must_use]
    pub const fn node_id(&self) -> u16 {
        self.node_id
    }

    /// The question bound to the attempt.
    #[must_use]
    pub fn question_id(&self) -> &str {
        &self.question_id
    }
}

/// What became of a finished submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionDisposition {
    /// The verdict resolved the node; `summary` is present when this very
    /// verdict completed the grid and forced expiry.
    Applied {
        verdict: Verdict,
        status: NodeStatus,
        summary: Option<RoundSummary>,
    },
    /// The session was cancelled while the attempt was in flight; the
    /// verdict was logged and dropped without touching grid or ledger.
    DiscardedCancelled,
}

/// Errors surfaced by session operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("round is not interactive in phase {phase:?}")]
    PhaseBlocked { phase: RoundPhase },
    #[error("round session was cancelled")]
    Cancelled,
    #[error("a submission for node {node} is already in flight")]
    SubmissionInFlight { node: u16 },
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Supply(#[from] SupplyError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Round-scoped lifecycle owner. Exclusively owns phase and deadline;
/// delegates node mutation to the grid and verdicts to the gateway.
#[derive(Debug, Clone)]
pub struct RoundSession {
    config: RoundConfig,
    phase: RoundPhase,
    remaining_secs: u32,
    grid: NodeGrid,
    supply: QuestionSupply,
    gateway: SubmissionGateway,
    ledger_delta: Ledger,
    logs: Vec<String>,
    in_flight: SmallVec<[u16; 4]>,
    cancelled: bool,
    handoff_emitted: bool,
}

impl RoundSession {
    /// Start a fresh session in the intro phase.
    #[must_use]
    pub fn new(config: RoundConfig, supply: QuestionSupply) -> Self {
        let grid = NodeGrid::new(config.node_count, config.completion, config.retry);
        Self::assemble(config, supply, grid, Ledger::new())
    }

    /// Rebuild a session from restored nodes and a restored round delta.
    /// Question bindings recorded on the nodes are re-registered with the
    /// supply so they survive the reload.
    #[must_use]
    pub fn restore(
        config: RoundConfig,
        mut supply: QuestionSupply,
        nodes: Vec<Node>,
        ledger_delta: Ledger,
    ) -> Self {
        let grid = NodeGrid::restore(nodes, config.completion, config.retry);
        for node in grid.nodes() {
            if let Some(question_id) = node.question_ref.as_deref() {
                supply.restore_binding(node.id, question_id);
            }
        }
        Self::assemble(config, supply, grid, ledger_delta)
    }

    fn assemble(
        config: RoundConfig,
        supply: QuestionSupply,
        grid: NodeGrid,
        ledger_delta: Ledger,
    ) -> Self {
        let gateway = SubmissionGateway::new(&config.round_id, config.default_award());
        let mut session = Self {
            config,
            phase: RoundPhase::Intro,
            remaining_secs: 0,
            grid,
            supply,
            gateway,
            ledger_delta,
            logs: Vec::new(),
            in_flight: SmallVec::new(),
            cancelled: false,
            handoff_emitted: false,
        };
        session.logs.push(String::from(LOG_ROUND_ENTERED));
        session
    }

    /// Leave the intro phase and start the countdown. Only user
    /// acknowledgment does this; the timer never will.
    ///
    /// # Errors
    ///
    /// Returns `PhaseBlocked` outside the intro phase.
    pub fn acknowledge_intro(&mut self) -> Result<(), SessionError> {
        self.ensure_not_cancelled()?;
        if self.phase != RoundPhase::Intro {
            return Err(SessionError::PhaseBlocked { phase: self.phase });
        }
        self.phase = RoundPhase::Active;
        self.remaining_secs = self.config.countdown_secs;
        self.logs.push(String::from(LOG_INTRO_ACKED));
        log::info!(
            "round {} active, {}s on the clock",
            self.config.round_id,
            self.remaining_secs
        );
        Ok(())
    }

    /// Open a node: binds its question on first open and returns it.
    ///
    /// # Errors
    ///
    /// Returns `PhaseBlocked` outside the active phase, `AlreadyResolved`
    /// for a node with a verdict, or a supply error.
    pub fn open_node(&mut self, node_id: u16) -> Result<&Question, SessionError> {
        self.ensure_active()?;
        self.grid.open(node_id)?;
        let question_id = self.supply.question_for(node_id)?.id.clone();
        self.grid.bind_question(node_id, &question_id)?;
        self.logs.push(String::from(LOG_NODE_OPENED));
        self.supply
            .bound(node_id)
            .ok_or_else(|| {
                SupplyError::Unavailable {
                    reason: format!("binding for node {node_id} vanished"),
                }
                .into()
            })
    }

    /// Reserve a node for an answer attempt. At most one attempt per node
    /// may be in flight, and only locked nodes accept attempts; this is
    /// what serializes access without locks.
    ///
    /// # Errors
    ///
    /// Returns `PhaseBlocked`, `SubmissionInFlight`, `AlreadyResolved`, or a
    /// supply error.
    pub fn begin_submission(&mut self, node_id: u16) -> Result<AttemptTicket, SessionError> {
        self.ensure_active()?;
        if self.in_flight.contains(&node_id) {
            return Err(SessionError::SubmissionInFlight { node: node_id });
        }
        self.grid.open(node_id)?;
        let question_id = self.supply.question_for(node_id)?.id.clone();
        self.grid.bind_question(node_id, &question_id)?;
        self.in_flight.push(node_id);
        Ok(AttemptTicket {
            node_id,
            question_id,
        })
    }

    /// Release a ticket after a transient failure. The node stays locked
    /// and no attempt is counted.
    pub fn abort_submission(&mut self, ticket: AttemptTicket) {
        self.in_flight.retain(|id| *id != ticket.node_id);
    }

    /// Apply a definitive verdict for an in-flight attempt.
    ///
    /// Verdicts landing after expiry still resolve the node for scoring
    /// correctness; verdicts landing after cancellation are logged and
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` when the node is no longer locked (a
    /// race the grid refuses); callers log and move on.
    pub fn finish_submission(
        &mut self,
        ticket: AttemptTicket,
        verdict: Verdict,
    ) -> Result<SubmissionDisposition, SessionError> {
        self.in_flight.retain(|id| *id != ticket.node_id);

        if self.cancelled {
            log::info!(
                "discarding verdict for node {} after cancellation",
                ticket.node_id
            );
            self.logs.push(String::from(LOG_VERDICT_DISCARDED));
            return Ok(SubmissionDisposition::DiscardedCancelled);
        }

        let status = match self.grid.resolve(ticket.node_id, verdict.is_correct()) {
            Ok(status) => status,
            Err(err) => {
                log::warn!("verdict for node {} dropped: {err}", ticket.node_id);
                return Err(err.into());
            }
        };
        if verdict.is_correct() {
            self.ledger_delta.credit(verdict.award);
            self.logs.push(String::from(LOG_VERDICT_CORRECT));
        } else {
            self.logs.push(String::from(LOG_VERDICT_INCORRECT));
        }
        if self.phase == RoundPhase::Expired {
            self.logs.push(String::from(LOG_VERDICT_LATE));
        }

        let summary = if self.phase == RoundPhase::Active && self.grid.is_complete() {
            Some(self.force_expire(false))
        } else {
            None
        };

        Ok(SubmissionDisposition::Applied {
            verdict,
            status,
            summary,
        })
    }

    /// Full submission path: reserve the node, ask the gateway, apply the
    /// verdict. Transient failures release the reservation so the caller
    /// may retry.
    ///
    /// # Errors
    ///
    /// Any `begin_submission` error, plus `Unauthenticated`/`Transient`
    /// from the gateway.
    pub fn submit<B: EventBackend>(
        &mut self,
        backend: &B,
        node_id: u16,
        raw_answer: &str,
    ) -> Result<SubmissionDisposition, SessionError> {
        let ticket = self.begin_submission(node_id)?;
        match self
            .gateway
            .submit(backend, ticket.node_id, &ticket.question_id, raw_answer)
        {
            Ok(verdict) => self.finish_submission(ticket, verdict),
            Err(err) => {
                self.abort_submission(ticket);
                Err(err.into())
            }
        }
    }

    /// Reset a blocked node for another attempt (policy-gated). The
    /// question binding is kept; the gateway's cached verdict for the pair
    /// is dropped so the new attempt really reaches the server.
    ///
    /// # Errors
    ///
    /// Returns `PhaseBlocked`, `RetryDisabled`, or `NotBlocked`.
    pub fn retry_node(&mut self, node_id: u16) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.grid.retry(node_id)?;
        if let Some(node) = self.grid.node(node_id) {
            if let Some(question_id) = node.question_ref.clone() {
                self.gateway.invalidate(node_id, &question_id);
            }
        }
        self.logs.push(String::from(LOG_NODE_RETRIED));
        Ok(())
    }

    /// Advance the countdown by `elapsed_secs`. The deadline is monotonic:
    /// remaining time only ever shrinks, and reaching zero forces expiry
    /// exactly once no matter how many ticks fire afterwards.
    pub fn tick(&mut self, elapsed_secs: u32) -> TickOutcome {
        if self.cancelled || self.phase != RoundPhase::Active {
            return TickOutcome::Idle;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(elapsed_secs);
        if self.remaining_secs == 0 {
            return TickOutcome::Expired(self.force_expire(true));
        }
        TickOutcome::Running {
            remaining_secs: self.remaining_secs,
        }
    }

    fn force_expire(&mut self, by_timer: bool) -> RoundSummary {
        debug_assert!(!self.handoff_emitted, "expiry handoff already emitted");
        self.phase = RoundPhase::Expired;
        self.remaining_secs = 0;
        self.handoff_emitted = true;
        self.logs.push(String::from(if by_timer {
            LOG_EXPIRED_TIMER
        } else {
            LOG_EXPIRED_COMPLETE
        }));
        log::info!(
            "round {} expired ({})",
            self.config.round_id,
            if by_timer { "timer" } else { "complete" }
        );
        self.summary(by_timer)
    }

    fn summary(&self, by_timer: bool) -> RoundSummary {
        RoundSummary {
            round_id: self.config.round_id.clone(),
            solved: self.grid.solved_count(),
            blocked: self.grid.blocked_count(),
            unanswered: self.grid.locked_count(),
            delta: self.ledger_delta,
            expired_by_timer: by_timer,
        }
    }

    /// Merge the authoritative progress snapshot into the grid, server
    /// status taking precedence. Round entry only.
    pub fn reconcile_with(&mut self, snapshot: &crate::backend::ProgressSnapshot) {
        crate::reconcile::reconcile_grid(&mut self.grid, snapshot);
    }

    /// Stop the session because the user is leaving the round. The timer
    /// stops, no handoff fires, and verdicts arriving later are discarded.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.logs.push(String::from(LOG_CANCELLED));
        log::info!("round {} cancelled", self.config.round_id);
    }

    fn ensure_not_cancelled(&self) -> Result<(), SessionError> {
        if self.cancelled {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        self.ensure_not_cancelled()?;
        if self.phase != RoundPhase::Active {
            return Err(SessionError::PhaseBlocked { phase: self.phase });
        }
        Ok(())
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Seconds left on the countdown (zero outside the active phase).
    #[must_use]
    pub const fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    /// Whether the session was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// The round's configuration.
    #[must_use]
    pub const fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Borrow the node grid.
    #[must_use]
    pub const fn grid(&self) -> &NodeGrid {
        &self.grid
    }

    /// Borrow the question supply.
    #[must_use]
    pub const fn supply(&self) -> &QuestionSupply {
        &self.supply
    }

    /// Borrow the submission gateway.
    #[must_use]
    pub const fn gateway(&self) -> &SubmissionGateway {
        &self.gateway
    }

    /// This round's accumulated earnings.
    #[must_use]
    pub const fn ledger_delta(&self) -> &Ledger {
        &self.ledger_delta
    }

    /// Key-style journal of everything observable that happened.
    #[must_use]
    pub fn logs(&self) -> &[String] {
        &self.logs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AnswerShape, Question, QuestionCatalog};
    use crate::gateway::VerdictKind;
    use crate::ledger::Award;
    use crate::supply::AssignmentMode;

    fn catalog(count: u16) -> QuestionCatalog {
        QuestionCatalog::from_questions(
            (0..count)
                .map(|i| Question {
                    id: format!("q-{i}"),
                    prompt: format!("prompt {i}"),
                    shape: AnswerShape::FreeText,
                    choices: vec![],
                    order: None,
                })
                .collect(),
        )
    }

    fn session(node_count: u16, countdown_secs: u32) -> RoundSession {
        let config = RoundConfig {
            round_id: "test-round".to_string(),
            node_count,
            countdown_secs,
            ..RoundConfig::logic_grid()
        };
        let supply =
            QuestionSupply::new(catalog(node_count), AssignmentMode::Sequential, 0).unwrap();
        RoundSession::new(config, supply)
    }

    fn correct_verdict(points: i64, tokens: i64) -> Verdict {
        Verdict {
            kind: VerdictKind::Correct,
            award: Award::new(points, tokens),
            message: None,
        }
    }

    fn incorrect_verdict() -> Verdict {
        Verdict {
            kind: VerdictKind::Incorrect,
            award: Award::default(),
            message: None,
        }
    }

    #[test]
    fn intro_blocks_interaction_until_acknowledged() {
        let mut session = session(3, 60);
        assert_eq!(session.phase(), RoundPhase::Intro);
        assert!(matches!(
            session.open_node(0),
            Err(SessionError::PhaseBlocked { .. })
        ));
        // The timer never leaves intro.
        assert_eq!(session.tick(60), TickOutcome::Idle);
        assert_eq!(session.phase(), RoundPhase::Intro);

        session.acknowledge_intro().unwrap();
        assert_eq!(session.phase(), RoundPhase::Active);
        assert_eq!(session.remaining_secs(), 60);
        assert!(session.open_node(0).is_ok());
    }

    #[test]
    fn verdict_resolves_node_and_credits_delta() {
        let mut session = session(20, 60);
        session.acknowledge_intro().unwrap();
        session.open_node(3).unwrap();

        let ticket = session.begin_submission(3).unwrap();
        let disposition = session
            .finish_submission(ticket, correct_verdict(100, 1))
            .unwrap();

        match disposition {
            SubmissionDisposition::Applied { status, summary, .. } => {
                assert_eq!(status, NodeStatus::Solved);
                assert!(summary.is_none());
            }
            SubmissionDisposition::DiscardedCancelled => panic!("verdict was discarded"),
        }
        assert_eq!(session.grid().solved_count(), 1);
        assert_eq!(*session.ledger_delta(), Ledger { points: 100, tokens: 1 });
    }

    #[test]
    fn only_one_attempt_per_node_in_flight() {
        let mut session = session(3, 60);
        session.acknowledge_intro().unwrap();

        let ticket = session.begin_submission(1).unwrap();
        assert_eq!(
            session.begin_submission(1).unwrap_err(),
            SessionError::SubmissionInFlight { node: 1 }
        );

        session.abort_submission(ticket);
        assert!(session.begin_submission(1).is_ok());
    }

    #[test]
    fn timer_expiry_fires_exactly_once() {
        let mut session = session(3, 10);
        session.acknowledge_intro().unwrap();

        assert_eq!(
            session.tick(4),
            TickOutcome::Running { remaining_secs: 6 }
        );
        let outcome = session.tick(6);
        let TickOutcome::Expired(summary) = outcome else {
            panic!("expected expiry");
        };
        assert!(summary.expired_by_timer);
        assert_eq!(summary.unanswered, 3);

        // Re-entrant ticks after expiry are no-ops.
        assert_eq!(session.tick(1), TickOutcome::Idle);
        assert_eq!(session.tick(100), TickOutcome::Idle);
        assert!(matches!(
            session.open_node(0),
            Err(SessionError::PhaseBlocked {
                phase: RoundPhase::Expired
            })
        ));
    }

    #[test]
    fn completing_the_grid_expires_before_the_timer() {
        let mut session = session(2, 600);
        session.acknowledge_intro().unwrap();

        let ticket = session.begin_submission(0).unwrap();
        session
            .finish_submission(ticket, correct_verdict(10, 0))
            .unwrap();

        let ticket = session.begin_submission(1).unwrap();
        let disposition = session
            .finish_submission(ticket, incorrect_verdict())
            .unwrap();
        let SubmissionDisposition::Applied { summary: Some(summary), .. } = disposition else {
            panic!("completion should have forced expiry");
        };
        assert!(!summary.expired_by_timer);
        assert_eq!(summary.solved, 1);
        assert_eq!(summary.blocked, 1);

        // The timer losing the race is a no-op.
        assert_eq!(session.tick(600), TickOutcome::Idle);
    }

    #[test]
    fn in_flight_verdict_lands_after_expiry_but_opens_nothing() {
        let mut session = session(20, 10);
        session.acknowledge_intro().unwrap();

        let ticket = session.begin_submission(9).unwrap();
        let TickOutcome::Expired(_) = session.tick(10) else {
            panic!("expected expiry");
        };

        let disposition = session
            .finish_submission(ticket, correct_verdict(100, 1))
            .unwrap();
        let SubmissionDisposition::Applied { status, summary, .. } = disposition else {
            panic!("late verdict must still score");
        };
        assert_eq!(status, NodeStatus::Solved);
        // Expiry already emitted its handoff; the late verdict adds none.
        assert!(summary.is_none());
        assert_eq!(session.ledger_delta().points, 100);

        assert!(matches!(
            session.open_node(1),
            Err(SessionError::PhaseBlocked { .. })
        ));
        assert!(session.logs().iter().any(|l| l == LOG_VERDICT_LATE));
    }

    #[test]
    fn cancellation_discards_late_verdicts() {
        let mut session = session(3, 60);
        session.acknowledge_intro().unwrap();

        let ticket = session.begin_submission(2).unwrap();
        session.cancel();
        assert_eq!(session.tick(60), TickOutcome::Idle);

        let disposition = session
            .finish_submission(ticket, correct_verdict(100, 1))
            .unwrap();
        assert_eq!(disposition, SubmissionDisposition::DiscardedCancelled);
        assert_eq!(session.grid().solved_count(), 0);
        assert_eq!(session.ledger_delta().points, 0);
        assert!(session.logs().iter().any(|l| l == LOG_VERDICT_DISCARDED));
    }

    #[test]
    fn retry_clears_cached_verdict_and_keeps_binding() {
        let config = RoundConfig {
            round_id: "practice".to_string(),
            node_count: 2,
            retry: crate::grid::RetryRule::AllowRetry,
            ..RoundConfig::logic_grid()
        };
        let supply = QuestionSupply::new(catalog(2), AssignmentMode::Sequential, 0).unwrap();
        let mut session = RoundSession::new(config, supply);
        session.acknowledge_intro().unwrap();

        let ticket = session.begin_submission(0).unwrap();
        session.finish_submission(ticket, incorrect_verdict()).unwrap();
        assert_eq!(session.grid().node(0).unwrap().status, NodeStatus::Blocked);

        session.retry_node(0).unwrap();
        let node = session.grid().node(0).unwrap();
        assert_eq!(node.status, NodeStatus::Locked);
        assert_eq!(node.question_ref.as_deref(), Some("q-0"));
        assert!(session.gateway().cached(0, "q-0").is_none());
    }

    #[test]
    fn restore_rebinds_questions_from_nodes() {
        let config = RoundConfig {
            round_id: "test-round".to_string(),
            node_count: 2,
            ..RoundConfig::logic_grid()
        };
        let supply = QuestionSupply::new(catalog(2), AssignmentMode::Sequential, 0).unwrap();
        let nodes = vec![
            Node {
                id: 0,
                status: NodeStatus::Solved,
                question_ref: Some("q-0".to_string()),
                attempts: 1,
            },
            Node::locked(1),
        ];
        let session = RoundSession::restore(config, supply, nodes, Ledger { points: 100, tokens: 0 });

        assert_eq!(session.supply().bound(0).unwrap().id, "q-0");
        assert_eq!(session.ledger_delta().points, 100);
        assert_eq!(session.grid().solved_count(), 1);
    }
}
