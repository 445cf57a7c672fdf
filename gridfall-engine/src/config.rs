//! Per-round policy configuration and the shipped round presets.
use serde::{Deserialize, Serialize};

use crate::grid::{CompletionRule, RetryRule};
use crate::ledger::Award;
use crate::supply::AssignmentMode;

/// Policy knobs for one round. Everything that varied between the event's
/// round types is a field here, not a code path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundConfig {
    pub round_id: String,
    pub node_count: u16,
    /// Countdown started when the round becomes active. Never extended.
    #[serde(default = "RoundConfig::default_countdown_secs")]
    pub countdown_secs: u32,
    #[serde(default)]
    pub assignment: AssignmentMode,
    #[serde(default)]
    pub retry: RetryRule,
    #[serde(default)]
    pub completion: CompletionRule,
    /// Credit applied for a correct answer when the server omits reward
    /// amounts. Server-provided amounts always win.
    #[serde(default = "RoundConfig::default_points")]
    pub default_points: i64,
    #[serde(default = "RoundConfig::default_tokens")]
    pub default_tokens: i64,
    /// Seed for shuffled question assignment.
    #[serde(default)]
    pub seed: u64,
}

impl RoundConfig {
    const fn default_countdown_secs() -> u32 {
        600
    }

    const fn default_points() -> i64 {
        100
    }

    const fn default_tokens() -> i64 {
        1
    }

    /// The default credit policy applied when the server omits rewards.
    #[must_use]
    pub const fn default_award(&self) -> Award {
        Award::new(self.default_points, self.default_tokens)
    }

    /// Firewall round: a large multiple-choice wall, sequential assignment,
    /// wrong answers block permanently, finished when every node is solved.
    #[must_use]
    pub fn firewall() -> Self {
        Self {
            round_id: "firewall".to_string(),
            node_count: 50,
            countdown_secs: Self::default_countdown_secs(),
            assignment: AssignmentMode::Sequential,
            retry: RetryRule::Terminal,
            completion: CompletionRule::AllSolved,
            default_points: Self::default_points(),
            default_tokens: 0,
            seed: 0,
        }
    }

    /// Logic grid round: free-text tasks in server-declared order, tokens
    /// awarded by the server, blocked nodes stay blocked.
    #[must_use]
    pub fn logic_grid() -> Self {
        Self {
            round_id: "logic-grid".to_string(),
            node_count: 20,
            countdown_secs: Self::default_countdown_secs(),
            assignment: AssignmentMode::Ordered,
            retry: RetryRule::Terminal,
            completion: CompletionRule::AllResolved,
            default_points: Self::default_points(),
            default_tokens: Self::default_tokens(),
            seed: 0,
        }
    }

    /// Gauntlet round: a short timed chain where a single wrong answer ends
    /// the run and the countdown bites hard.
    #[must_use]
    pub fn gauntlet(seed: u64) -> Self {
        Self {
            round_id: "gauntlet".to_string(),
            node_count: 5,
            countdown_secs: 90,
            assignment: AssignmentMode::Shuffled,
            retry: RetryRule::Terminal,
            completion: CompletionRule::AllSolved,
            default_points: Self::default_points(),
            default_tokens: 0,
            seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: RoundConfig =
            serde_json::from_str(r#"{ "round_id": "practice", "node_count": 4 }"#).unwrap();
        assert_eq!(cfg.countdown_secs, 600);
        assert_eq!(cfg.assignment, AssignmentMode::Sequential);
        assert_eq!(cfg.retry, RetryRule::Terminal);
        assert_eq!(cfg.default_award(), Award::new(100, 1));
    }

    #[test]
    fn presets_match_event_round_shapes() {
        assert_eq!(RoundConfig::firewall().node_count, 50);
        assert_eq!(RoundConfig::logic_grid().assignment, AssignmentMode::Ordered);

        let gauntlet = RoundConfig::gauntlet(7);
        assert_eq!(gauntlet.countdown_secs, 90);
        assert_eq!(gauntlet.completion, CompletionRule::AllSolved);
        assert_eq!(gauntlet.seed, 7);
    }
}
