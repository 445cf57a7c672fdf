//! Scenario catalog: scripted end-to-end runs against the engine.
use anyhow::{Result, bail, ensure};
use async_trait::async_trait;
use std::time::Instant;

use gridfall_engine::{
    AssignmentMode, ClueMarket, EventEngine, EventProgress, Ledger, MarketError, NodeStatus,
    ProgressSnapshot, RoundConfig, RoundPhase, SessionError, SubmissionDisposition, TickOutcome,
};

use crate::harness::{FaultMode, MemoryCache, ScriptedBackend};
use crate::reports::ScenarioResult;

/// Per-run context handed to every scenario.
pub struct ScenarioCtx {
    pub seed: u64,
    pub verbose: bool,
}

/// A scripted end-to-end check. Scenarios build their own engine so runs
/// never share state.
#[async_trait]
pub trait Scenario: Send + Sync {
    /// CLI key for `--scenarios`.
    fn key(&self) -> &'static str;
    /// One-line description for `--list-scenarios`.
    fn description(&self) -> &'static str;
    /// Run once. Any error fails the iteration.
    async fn run(&self, ctx: &ScenarioCtx) -> Result<()>;
}

/// All scenarios, in catalog order.
#[must_use]
pub fn catalog() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(Smoke),
        Box::new(Expiry),
        Box::new(RejectPath),
        Box::new(TransientRetry),
        Box::new(Reconcile),
        Box::new(Market),
        Box::new(SupplyExhaustion),
    ]
}

/// Look up a scenario by key.
#[must_use]
pub fn get(key: &str) -> Option<Box<dyn Scenario>> {
    catalog().into_iter().find(|s| s.key() == key)
}

/// Keys and descriptions for `--list-scenarios`.
#[must_use]
pub fn list() -> Vec<(&'static str, &'static str)> {
    catalog().iter().map(|s| (s.key(), s.description())).collect()
}

/// Run a scenario across seeds and iterations, collecting a result row.
pub async fn execute(
    scenario: &dyn Scenario,
    seeds: &[u64],
    iterations: usize,
    verbose: bool,
) -> ScenarioResult {
    let mut failures = Vec::new();
    let mut durations = Vec::new();
    let mut successful = 0usize;
    let mut total = 0usize;

    for &seed in seeds {
        for iteration in 0..iterations {
            total += 1;
            let ctx = ScenarioCtx { seed, verbose };
            let start = Instant::now();
            match scenario.run(&ctx).await {
                Ok(()) => successful += 1,
                Err(err) => {
                    failures.push(format!(
                        "seed {seed} iteration {iteration}: {err:#}"
                    ));
                }
            }
            durations.push(start.elapsed());
        }
    }

    let average_duration = if durations.is_empty() {
        std::time::Duration::ZERO
    } else {
        durations.iter().sum::<std::time::Duration>() / durations.len() as u32
    };

    ScenarioResult {
        scenario_name: scenario.key().to_string(),
        passed: failures.is_empty(),
        iterations_run: total,
        successful_iterations: successful,
        failures,
        average_duration,
        performance_data: durations,
    }
}

fn ordered_config(round_id: &str, node_count: u16, countdown_secs: u32) -> RoundConfig {
    RoundConfig {
        round_id: round_id.to_string(),
        node_count,
        countdown_secs,
        assignment: AssignmentMode::Ordered,
        ..RoundConfig::logic_grid()
    }
}

struct Smoke;

#[async_trait]
impl Scenario for Smoke {
    fn key(&self) -> &'static str {
        "smoke"
    }

    fn description(&self) -> &'static str {
        "Solve a full round and hand the summary off to event progress"
    }

    async fn run(&self, ctx: &ScenarioCtx) -> Result<()> {
        let engine = EventEngine::new(ScriptedBackend::new(5), MemoryCache::default());
        let mut progress = EventProgress::new();
        let mut session = engine.enter_round(ordered_config("smoke", 5, 300), &mut progress)?;
        session.acknowledge_intro()?;

        let mut summary = None;
        for node in 0..5u16 {
            let question_id = session.open_node(node)?.id.clone();
            let answer = engine.backend().right_answer(&question_id);
            match session.submit(engine.backend(), node, &answer)? {
                SubmissionDisposition::Applied {
                    summary: emitted, ..
                } => {
                    if let Some(emitted) = emitted {
                        summary = Some(emitted);
                    }
                }
                SubmissionDisposition::DiscardedCancelled => bail!("nothing was cancelled"),
            }
            engine.mirror_round(&session);
        }

        let summary = summary.ok_or_else(|| anyhow::anyhow!("completion never fired"))?;
        ensure!(!summary.expired_by_timer, "completion beat the timer");
        ensure!(summary.solved == 5, "all five nodes solved");
        engine.finish_round(&summary, &mut progress);
        ensure!(progress.is_round_complete("smoke"), "round marked complete");
        ensure!(
            progress.ledger == Ledger { points: 500, tokens: 5 },
            "delta absorbed into the global ledger"
        );
        if ctx.verbose {
            log::info!("smoke: {:?}", session.logs());
        }
        Ok(())
    }
}

struct Expiry;

#[async_trait]
impl Scenario for Expiry {
    fn key(&self) -> &'static str {
        "expiry"
    }

    fn description(&self) -> &'static str {
        "Timer forces EXPIRED exactly once; late verdicts score but reopen nothing"
    }

    async fn run(&self, _ctx: &ScenarioCtx) -> Result<()> {
        let engine = EventEngine::new(ScriptedBackend::new(10), MemoryCache::default());
        let mut progress = EventProgress::new();
        let mut session = engine.enter_round(ordered_config("expiry", 10, 10), &mut progress)?;
        session.acknowledge_intro()?;

        let ticket = session.begin_submission(9)?;
        let answer = engine.backend().right_answer(ticket.question_id());

        let TickOutcome::Expired(summary) = session.tick(10) else {
            bail!("tick to zero must expire the round");
        };
        ensure!(summary.expired_by_timer, "timer expiry flagged");
        for _ in 0..3 {
            ensure!(
                session.tick(5) == TickOutcome::Idle,
                "re-entrant ticks are no-ops"
            );
        }

        // The in-flight response lands after expiry.
        let verdict = {
            let mut gateway = session.gateway().clone();
            gateway.submit(
                engine.backend(),
                ticket.node_id(),
                ticket.question_id(),
                &answer,
            )?
        };
        let SubmissionDisposition::Applied { status, summary, .. } =
            session.finish_submission(ticket, verdict)?
        else {
            bail!("late verdict must still score");
        };
        ensure!(status == NodeStatus::Solved, "node 9 scored after expiry");
        ensure!(summary.is_none(), "no second handoff");
        ensure!(
            matches!(
                session.open_node(0),
                Err(SessionError::PhaseBlocked {
                    phase: RoundPhase::Expired
                })
            ),
            "interaction stays blocked after expiry"
        );
        Ok(())
    }
}

struct RejectPath;

#[async_trait]
impl Scenario for RejectPath {
    fn key(&self) -> &'static str {
        "reject-path"
    }

    fn description(&self) -> &'static str {
        "Explicit server rejection blocks the node and never retries"
    }

    async fn run(&self, _ctx: &ScenarioCtx) -> Result<()> {
        let backend = ScriptedBackend::new(6).with_fault(FaultMode::RejectWrong);
        let engine = EventEngine::new(backend, MemoryCache::default());
        let mut progress = EventProgress::new();
        let mut session = engine.enter_round(ordered_config("reject", 6, 300), &mut progress)?;
        session.acknowledge_intro()?;

        session.open_node(5)?;
        let SubmissionDisposition::Applied { status, .. } =
            session.submit(engine.backend(), 5, "wild guess")?
        else {
            bail!("rejection is definitive");
        };
        ensure!(status == NodeStatus::Blocked, "node 5 blocked");
        ensure!(
            *session.ledger_delta() == Ledger::default(),
            "ledger untouched by a rejection"
        );

        let calls = engine.backend().submit_calls();
        ensure!(
            matches!(
                session.submit(engine.backend(), 5, "again"),
                Err(SessionError::Grid(_))
            ),
            "resubmission refused up front"
        );
        ensure!(
            engine.backend().submit_calls() == calls,
            "no extra network call for the resubmission"
        );
        Ok(())
    }
}

struct TransientRetry;

#[async_trait]
impl Scenario for TransientRetry {
    fn key(&self) -> &'static str {
        "transient-retry"
    }

    fn description(&self) -> &'static str {
        "A dropped submission leaves the node locked and retryable"
    }

    async fn run(&self, _ctx: &ScenarioCtx) -> Result<()> {
        let backend = ScriptedBackend::new(3).with_fault(FaultMode::DropSubmissions(1));
        let engine = EventEngine::new(backend, MemoryCache::default());
        let mut progress = EventProgress::new();
        let mut session = engine.enter_round(ordered_config("flaky", 3, 300), &mut progress)?;
        session.acknowledge_intro()?;

        let question_id = session.open_node(1)?.id.clone();
        let answer = engine.backend().right_answer(&question_id);

        ensure!(
            matches!(
                session.submit(engine.backend(), 1, &answer),
                Err(SessionError::Submit(_))
            ),
            "first attempt fails at the transport"
        );
        ensure!(
            session.grid().node(1).map(|n| n.status) == Some(NodeStatus::Locked),
            "node stays locked after a transient failure"
        );
        ensure!(
            session.grid().node(1).map(|n| n.attempts) == Some(0),
            "no attempt counted until a definitive verdict"
        );

        let SubmissionDisposition::Applied { status, .. } =
            session.submit(engine.backend(), 1, &answer)?
        else {
            bail!("retry should succeed");
        };
        ensure!(status == NodeStatus::Solved, "retry solves the node");
        Ok(())
    }
}

struct Reconcile;

#[async_trait]
impl Scenario for Reconcile {
    fn key(&self) -> &'static str {
        "reconcile"
    }

    fn description(&self) -> &'static str {
        "Server snapshot wins over stale local cache on re-entry"
    }

    async fn run(&self, _ctx: &ScenarioCtx) -> Result<()> {
        let backend = ScriptedBackend::new(4);
        backend.set_snapshot(ProgressSnapshot {
            solved_node_ids: vec![0],
            points: 100,
            tokens: 1,
        });
        let engine = EventEngine::new(backend, MemoryCache::default());
        let mut progress = EventProgress::new();

        // First visit: server says node 0 is solved; solve node 1 locally
        // but pretend the server never recorded it (snapshot unchanged).
        let mut session = engine.enter_round(ordered_config("sync", 4, 300), &mut progress)?;
        session.acknowledge_intro()?;
        let question_id = session.open_node(1)?.id.clone();
        let answer = engine.backend().right_answer(&question_id);
        session.submit(engine.backend(), 1, &answer)?;
        engine.mirror_round(&session);
        engine.abandon_round(&mut session);

        // Second visit: reconciliation resets the node the server forgot.
        let session = engine.enter_round(ordered_config("sync", 4, 300), &mut progress)?;
        ensure!(
            session.grid().node(0).map(|n| n.status) == Some(NodeStatus::Solved),
            "server-acknowledged node stays solved"
        );
        ensure!(
            session.grid().node(1).map(|n| n.status) == Some(NodeStatus::Locked),
            "server-forgotten node reset to locked"
        );
        ensure!(
            progress.ledger == Ledger { points: 100, tokens: 1 },
            "ledger equals the authoritative snapshot"
        );
        Ok(())
    }
}

struct Market;

#[async_trait]
impl Scenario for Market {
    fn key(&self) -> &'static str {
        "market"
    }

    fn description(&self) -> &'static str {
        "Clue purchases debit on confirmation and roll back on rejection"
    }

    async fn run(&self, _ctx: &ScenarioCtx) -> Result<()> {
        let backend = ScriptedBackend::new(1);
        let mut market = ClueMarket::load(&backend)?;
        let mut ledger = Ledger {
            points: 0,
            tokens: 5,
        };

        market.purchase(&backend, &mut ledger, "clue-low")?;
        ensure!(ledger.tokens == 3, "confirmed purchase debits");
        ensure!(market.is_owned("clue-low"), "clue owned after purchase");

        ensure!(
            matches!(
                market.purchase(&backend, &mut ledger, "clue-low"),
                Err(MarketError::AlreadyOwned { .. })
            ),
            "repurchase refused locally"
        );
        ensure!(
            matches!(
                market.purchase(&backend, &mut ledger, "clue-high"),
                Err(MarketError::Ledger(_))
            ),
            "unaffordable purchase refused before the network"
        );
        ensure!(ledger.tokens == 3, "failed purchases leave the ledger alone");
        Ok(())
    }
}

struct SupplyExhaustion;

#[async_trait]
impl Scenario for SupplyExhaustion {
    fn key(&self) -> &'static str {
        "supply-exhaustion"
    }

    fn description(&self) -> &'static str {
        "Shuffled pool exhaustion repeats questions and stays observable"
    }

    async fn run(&self, ctx: &ScenarioCtx) -> Result<()> {
        // More nodes than questions: the pool must run dry.
        let backend = ScriptedBackend::new(4);
        let engine = EventEngine::new(backend, MemoryCache::default());
        let mut progress = EventProgress::new();
        let config = RoundConfig {
            round_id: "exhaust".to_string(),
            node_count: 6,
            assignment: AssignmentMode::Shuffled,
            seed: ctx.seed,
            ..RoundConfig::logic_grid()
        };
        let mut session = engine.enter_round(config, &mut progress)?;
        session.acknowledge_intro()?;

        for node in 0..6u16 {
            session.open_node(node)?;
        }
        ensure!(
            session.supply().exhausted_repeats() == 2,
            "two draws past the four-question pool are counted"
        );
        Ok(())
    }
}
