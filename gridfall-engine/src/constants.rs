//! Shared constants for the Gridfall engine.

/// Log key for round entry.
pub const LOG_ROUND_ENTERED: &str = "log.round-entered";
/// Log key for leaving the intro phase.
pub const LOG_INTRO_ACKED: &str = "log.intro-acked";
/// Log key for opening a node.
pub const LOG_NODE_OPENED: &str = "log.node-opened";
/// Log key for a policy-gated node retry.
pub const LOG_NODE_RETRIED: &str = "log.node-retried";
/// Log key for a correct verdict.
pub const LOG_VERDICT_CORRECT: &str = "log.verdict-correct";
/// Log key for an incorrect verdict.
pub const LOG_VERDICT_INCORRECT: &str = "log.verdict-incorrect";
/// Log key for a verdict discarded after cancellation.
pub const LOG_VERDICT_DISCARDED: &str = "log.verdict-discarded";
/// Log key for a verdict that landed after the round expired.
pub const LOG_VERDICT_LATE: &str = "log.verdict-late";
/// Log key for timer expiry.
pub const LOG_EXPIRED_TIMER: &str = "log.expired-timer";
/// Log key for manual completion before the timer ran out.
pub const LOG_EXPIRED_COMPLETE: &str = "log.expired-complete";
/// Log key for round cancellation (navigation away).
pub const LOG_CANCELLED: &str = "log.cancelled";
/// Log key for the shuffled question pool running dry.
pub const LOG_POOL_EXHAUSTED: &str = "log.supply-pool-exhausted";
/// Log key for a cache payload that failed its integrity check.
pub const LOG_CACHE_CORRUPT: &str = "log.cache-corrupt";

/// Points granted the first time a data fragment is recovered.
pub const FRAGMENT_BONUS_POINTS: i64 = 500;
