//! Question supply: binds nodes to questions deterministically and hides
//! the assignment policy behind one seam.
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::data::{Question, QuestionCatalog};

/// How questions are assigned to nodes for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMode {
    /// Node `i` gets the question at list position `i`.
    #[default]
    Sequential,
    /// Node `i` gets the `i`-th question when sorted by the server-provided
    /// order field, ascending.
    Ordered,
    /// Uniform draw without repetition from the unused pool; falls back to
    /// uniform draw over the full pool once exhausted.
    Shuffled,
}

/// Errors raised while resolving a node's question.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupplyError {
    #[error("question supply unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("no question available for node {node}")]
    OutOfQuestions { node: u16 },
}

/// Resolves which question is bound to a given node.
///
/// A node always yields the same question for the lifetime of the session:
/// the first resolution binds, every later call returns the binding.
#[derive(Debug, Clone)]
pub struct QuestionSupply {
    catalog: QuestionCatalog,
    mode: AssignmentMode,
    bindings: HashMap<u16, String>,
    used: HashSet<String>,
    rng: ChaCha20Rng,
    exhausted_repeats: u32,
}

impl QuestionSupply {
    /// Build a supply over a fetched catalog.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` for an empty catalog; a round must never start
    /// on silently-empty questions.
    pub fn new(
        catalog: QuestionCatalog,
        mode: AssignmentMode,
        seed: u64,
    ) -> Result<Self, SupplyError> {
        if catalog.is_empty() {
            return Err(SupplyError::Unavailable {
                reason: "catalog is empty".to_string(),
            });
        }
        Ok(Self {
            catalog,
            mode,
            bindings: HashMap::new(),
            used: HashSet::new(),
            rng: ChaCha20Rng::seed_from_u64(seed),
            exhausted_repeats: 0,
        })
    }

    /// The question bound to a node, assigning one on first call.
    ///
    /// # Errors
    ///
    /// Returns `OutOfQuestions` when the catalog cannot cover the node under
    /// sequential/ordered assignment, or `Unavailable` if a stale binding no
    /// longer resolves.
    pub fn question_for(&mut self, node_id: u16) -> Result<&Question, SupplyError> {
        if !self.bindings.contains_key(&node_id) {
            let question_id = self.assign(node_id)?;
            self.used.insert(question_id.clone());
            self.bindings.insert(node_id, question_id);
        }
        let bound = &self.bindings[&node_id];
        self.catalog
            .get(bound)
            .ok_or_else(|| SupplyError::Unavailable {
                reason: format!("bound question {bound} missing from catalog"),
            })
    }

    fn assign(&mut self, node_id: u16) -> Result<String, SupplyError> {
        match self.mode {
            AssignmentMode::Sequential => self
                .catalog
                .at(usize::from(node_id))
                .map(|q| q.id.clone())
                .ok_or(SupplyError::OutOfQuestions { node: node_id }),
            AssignmentMode::Ordered => self
                .catalog
                .by_order()
                .get(usize::from(node_id))
                .map(|q| q.id.clone())
                .ok_or(SupplyError::OutOfQuestions { node: node_id }),
            AssignmentMode::Shuffled => Ok(self.draw(node_id)),
        }
    }

    fn draw(&mut self, node_id: u16) -> String {
        let remaining: Vec<&Question> = self
            .catalog
            .questions
            .iter()
            .filter(|q| !self.used.contains(&q.id))
            .collect();

        if remaining.is_empty() {
            // Intentional: once the pool is dry we repeat rather than refuse.
            // The counter keeps the fallback observable.
            self.exhausted_repeats = self.exhausted_repeats.saturating_add(1);
            log::warn!(
                "question pool exhausted; drawing repeat for node {node_id} (repeat #{})",
                self.exhausted_repeats
            );
            let index = self.rng.gen_range(0..self.catalog.len());
            return self.catalog.questions[index].id.clone();
        }

        let index = self.rng.gen_range(0..remaining.len());
        remaining[index].id.clone()
    }

    /// The binding for a node, if one exists, without assigning.
    #[must_use]
    pub fn bound(&self, node_id: u16) -> Option<&Question> {
        self.bindings
            .get(&node_id)
            .and_then(|id| self.catalog.get(id))
    }

    /// Re-register a binding restored from persisted state.
    pub fn restore_binding(&mut self, node_id: u16, question_id: &str) {
        self.used.insert(question_id.to_string());
        self.bindings.insert(node_id, question_id.to_string());
    }

    /// How many times the shuffled pool had to repeat after exhaustion.
    #[must_use]
    pub const fn exhausted_repeats(&self) -> u32 {
        self.exhausted_repeats
    }

    /// The catalog backing this supply.
    #[must_use]
    pub const fn catalog(&self) -> &QuestionCatalog {
        &self.catalog
    }
}
