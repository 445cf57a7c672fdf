//! Per-round node grid store: lifecycle transitions and derived counts.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a single challenge node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Locked,
    Solved,
    Blocked,
}

impl NodeStatus {
    /// Whether the node has received a definitive verdict.
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        !matches!(self, Self::Locked)
    }
}

/// Whether a round permits retrying a blocked node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryRule {
    /// Blocked is terminal.
    #[default]
    Terminal,
    /// Blocked nodes may be reset to locked; the question binding is kept.
    AllowRetry,
}

/// What counts as a finished grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionRule {
    /// Every node has a definitive verdict (solved or blocked).
    #[default]
    AllResolved,
    /// Every node is solved.
    AllSolved,
}

/// A single challenge slot in the round's grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: u16,
    #[serde(default)]
    pub status: NodeStatus,
    /// Bound on first open and fixed thereafter.
    #[serde(default)]
    pub question_ref: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl Node {
    /// A fresh locked node with no question bound.
    #[must_use]
    pub const fn locked(id: u16) -> Self {
        Self {
            id,
            status: NodeStatus::Locked,
            question_ref: None,
            attempts: 0,
        }
    }
}

/// Errors raised by grid operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("node {id} does not exist in this round")]
    UnknownNode { id: u16 },
    #[error("node {id} is already resolved ({status:?})")]
    AlreadyResolved { id: u16, status: NodeStatus },
    #[error("node {id} cannot take a verdict while {status:?}")]
    InvalidTransition { id: u16, status: NodeStatus },
    #[error("retry is not permitted for this round")]
    RetryDisabled,
    #[error("node {id} is not blocked")]
    NotBlocked { id: u16 },
    #[error("node {id} already has question {bound} bound")]
    QuestionAlreadyBound { id: u16, bound: String },
}

/// The round's array of node records plus its completion/retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGrid {
    nodes: Vec<Node>,
    #[serde(default)]
    completion: CompletionRule,
    #[serde(default)]
    retry: RetryRule,
}

impl NodeGrid {
    /// Create a grid of `count` fresh locked nodes.
    #[must_use]
    pub fn new(count: u16, completion: CompletionRule, retry: RetryRule) -> Self {
        Self {
            nodes: (0..count).map(Node::locked).collect(),
            completion,
            retry,
        }
    }

    /// Restore a grid from previously persisted nodes. Node ids are
    /// renumbered by position so a truncated cache cannot alias slots.
    #[must_use]
    pub fn restore(mut nodes: Vec<Node>, completion: CompletionRule, retry: RetryRule) -> Self {
        for (index, node) in nodes.iter_mut().enumerate() {
            node.id = index as u16;
        }
        Self {
            nodes,
            completion,
            retry,
        }
    }

    /// Borrow a node by id.
    #[must_use]
    pub fn node(&self, id: u16) -> Option<&Node> {
        self.nodes.get(usize::from(id))
    }

    /// All nodes in grid order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of nodes in the grid.
    #[must_use]
    pub fn len(&self) -> u16 {
        self.nodes.len() as u16
    }

    /// Whether the grid has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node_mut(&mut self, id: u16) -> Result<&mut Node, GridError> {
        self.nodes
            .get_mut(usize::from(id))
            .ok_or(GridError::UnknownNode { id })
    }

    /// Open a node for answering. Fails with `AlreadyResolved` once the node
    /// has a definitive verdict; the caller shows the cached result instead.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` or `AlreadyResolved`.
    pub fn open(&mut self, id: u16) -> Result<&Node, GridError> {
        let node = self.node_mut(id)?;
        if node.status != NodeStatus::Locked {
            return Err(GridError::AlreadyResolved {
                id,
                status: node.status,
            });
        }
        Ok(&*node)
    }

    /// Record the question bound to a node on first open. A node keeps its
    /// first binding for the lifetime of the session.
    ///
    /// # Errors
    ///
    /// Returns `QuestionAlreadyBound` if a different question is already
    /// bound; rebinding the same question is a no-op.
    pub fn bind_question(&mut self, id: u16, question_id: &str) -> Result<(), GridError> {
        let node = self.node_mut(id)?;
        match node.question_ref.as_deref() {
            None => {
                node.question_ref = Some(question_id.to_string());
                Ok(())
            }
            Some(bound) if bound == question_id => Ok(()),
            Some(bound) => Err(GridError::QuestionAlreadyBound {
                id,
                bound: bound.to_string(),
            }),
        }
    }

    /// Apply a definitive verdict: locked nodes move to solved on a correct
    /// answer and blocked on an incorrect one. Any other starting state is
    /// an `InvalidTransition` (double-submission race guard).
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` or `InvalidTransition`.
    pub fn resolve(&mut self, id: u16, correct: bool) -> Result<NodeStatus, GridError> {
        let node = self.node_mut(id)?;
        if node.status != NodeStatus::Locked {
            return Err(GridError::InvalidTransition {
                id,
                status: node.status,
            });
        }
        node.attempts = node.attempts.saturating_add(1);
        node.status = if correct {
            NodeStatus::Solved
        } else {
            NodeStatus::Blocked
        };
        Ok(node.status)
    }

    /// Reset a blocked node to locked, keeping its question binding.
    ///
    /// # Errors
    ///
    /// Returns `RetryDisabled` under `RetryRule::Terminal`, otherwise
    /// `UnknownNode` or `NotBlocked`.
    pub fn retry(&mut self, id: u16) -> Result<(), GridError> {
        if self.retry == RetryRule::Terminal {
            return Err(GridError::RetryDisabled);
        }
        let node = self.node_mut(id)?;
        if node.status != NodeStatus::Blocked {
            return Err(GridError::NotBlocked { id });
        }
        node.status = NodeStatus::Locked;
        Ok(())
    }

    /// Force a node to solved during reconciliation (server says so).
    pub(crate) fn force_solved(&mut self, id: u16) {
        if let Some(node) = self.nodes.get_mut(usize::from(id)) {
            node.status = NodeStatus::Solved;
        }
    }

    /// Demote a locally-solved node the server does not acknowledge.
    pub(crate) fn demote_to_locked(&mut self, id: u16) {
        if let Some(node) = self.nodes.get_mut(usize::from(id)) {
            if node.status == NodeStatus::Solved {
                node.status = NodeStatus::Locked;
            }
        }
    }

    /// Count of solved nodes.
    #[must_use]
    pub fn solved_count(&self) -> u16 {
        self.count_status(NodeStatus::Solved)
    }

    /// Count of blocked nodes.
    #[must_use]
    pub fn blocked_count(&self) -> u16 {
        self.count_status(NodeStatus::Blocked)
    }

    /// Count of nodes still awaiting a verdict.
    #[must_use]
    pub fn locked_count(&self) -> u16 {
        self.count_status(NodeStatus::Locked)
    }

    fn count_status(&self, status: NodeStatus) -> u16 {
        self.nodes.iter().filter(|n| n.status == status).count() as u16
    }

    /// Whether the grid satisfies the round's completion rule.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self.completion {
            CompletionRule::AllResolved => self.nodes.iter().all(|n| n.status.is_resolved()),
            CompletionRule::AllSolved => {
                !self.nodes.is_empty() && self.nodes.iter().all(|n| n.status == NodeStatus::Solved)
            }
        }
    }

    /// The round's completion rule.
    #[must_use]
    pub const fn completion(&self) -> CompletionRule {
        self.completion
    }

    /// The round's retry rule.
    #[must_use]
    pub const fn retry_rule(&self) -> RetryRule {
        self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(count: u16) -> NodeGrid {
        NodeGrid::new(count, CompletionRule::AllResolved, RetryRule::Terminal)
    }

    #[test]
    fn fresh_grid_is_all_locked() {
        let grid = grid(5);
        assert_eq!(grid.len(), 5);
        assert_eq!(grid.locked_count(), 5);
        assert!(!grid.is_complete());
    }

    #[test]
    fn open_rejects_resolved_nodes() {
        let mut grid = grid(3);
        grid.open(1).unwrap();
        grid.resolve(1, true).unwrap();

        assert_eq!(
            grid.open(1),
            Err(GridError::AlreadyResolved {
                id: 1,
                status: NodeStatus::Solved
            })
        );
    }

    #[test]
    fn resolve_moves_locked_to_terminal_states_once() {
        let mut grid = grid(3);
        assert_eq!(grid.resolve(0, true), Ok(NodeStatus::Solved));
        assert_eq!(grid.resolve(1, false), Ok(NodeStatus::Blocked));

        // A second verdict for either node is a race; the store refuses it.
        assert_eq!(
            grid.resolve(0, false),
            Err(GridError::InvalidTransition {
                id: 0,
                status: NodeStatus::Solved
            })
        );
        assert_eq!(
            grid.resolve(1, true),
            Err(GridError::InvalidTransition {
                id: 1,
                status: NodeStatus::Blocked
            })
        );
        assert_eq!(grid.node(0).unwrap().attempts, 1);
    }

    #[test]
    fn question_binding_is_fixed_after_first_open() {
        let mut grid = grid(2);
        grid.bind_question(0, "q-7").unwrap();
        grid.bind_question(0, "q-7").unwrap();
        assert_eq!(
            grid.bind_question(0, "q-8"),
            Err(GridError::QuestionAlreadyBound {
                id: 0,
                bound: "q-7".to_string()
            })
        );
    }

    #[test]
    fn retry_is_policy_gated_and_keeps_binding() {
        let mut terminal = grid(2);
        terminal.resolve(0, false).unwrap();
        assert_eq!(terminal.retry(0), Err(GridError::RetryDisabled));

        let mut retryable =
            NodeGrid::new(2, CompletionRule::AllSolved, RetryRule::AllowRetry);
        retryable.bind_question(0, "q-1").unwrap();
        retryable.resolve(0, false).unwrap();
        retryable.retry(0).unwrap();

        let node = retryable.node(0).unwrap();
        assert_eq!(node.status, NodeStatus::Locked);
        assert_eq!(node.question_ref.as_deref(), Some("q-1"));

        // Only blocked nodes can retry.
        retryable.resolve(0, true).unwrap();
        assert_eq!(retryable.retry(0), Err(GridError::NotBlocked { id: 0 }));
    }

    #[test]
    fn completion_follows_round_rule() {
        let mut resolved = grid(2);
        resolved.resolve(0, true).unwrap();
        resolved.resolve(1, false).unwrap();
        assert!(resolved.is_complete());

        let mut all_solved = NodeGrid::new(2, CompletionRule::AllSolved, RetryRule::Terminal);
        all_solved.resolve(0, true).unwrap();
        all_solved.resolve(1, false).unwrap();
        assert!(!all_solved.is_complete());
    }

    #[test]
    fn restore_renumbers_by_position() {
        let nodes = vec![
            Node {
                id: 9,
                status: NodeStatus::Solved,
                question_ref: Some("q-1".into()),
                attempts: 1,
            },
            Node::locked(4),
        ];
        let grid = NodeGrid::restore(nodes, CompletionRule::AllResolved, RetryRule::Terminal);
        assert_eq!(grid.node(0).unwrap().status, NodeStatus::Solved);
        assert_eq!(grid.node(1).unwrap().id, 1);
    }
}
