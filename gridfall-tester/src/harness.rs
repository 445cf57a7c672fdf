//! In-process fixtures: a scripted backend and an in-memory cache store.
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::convert::Infallible;

use gridfall_engine::{
    AnswerShape, BackendError, CacheStore, ClueOffer, EventBackend, ProgressSnapshot,
    PurchaseResponse, Question, SubmitRequest, SubmitResponse,
};

/// Failure mode injected into the scripted backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultMode {
    /// Behave like a healthy server.
    #[default]
    None,
    /// Reject wrong answers with an explicit payload rejection instead of a
    /// graded response.
    RejectWrong,
    /// Fail the first `n` submissions at the transport level.
    DropSubmissions(u32),
}

/// Deterministic backend double. Grades answers against a generated key,
/// pays fixed rewards, and can inject transport faults.
pub struct ScriptedBackend {
    token: Option<String>,
    questions: Vec<Question>,
    answer_key: HashMap<String, String>,
    snapshot: RefCell<ProgressSnapshot>,
    offers: Vec<ClueOffer>,
    fault: FaultMode,
    points_per_solve: i64,
    tokens_per_solve: i64,
    submit_calls: Cell<u32>,
    dropped: Cell<u32>,
}

impl ScriptedBackend {
    /// A backend with `count` free-text questions whose right answer for
    /// `q-N` is `answer-q-N`.
    #[must_use]
    pub fn new(count: u16) -> Self {
        let questions: Vec<Question> = (0..count)
            .map(|i| Question {
                id: format!("q-{i}"),
                prompt: format!("Challenge node {i}: decode the fragment."),
                shape: AnswerShape::FreeText,
                choices: vec![],
                order: Some(u32::from(i) + 1),
            })
            .collect();
        let answer_key = questions
            .iter()
            .map(|q| (q.id.clone(), format!("answer-{}", q.id)))
            .collect();
        Self {
            token: Some("scripted-bearer".to_string()),
            questions,
            answer_key,
            snapshot: RefCell::new(ProgressSnapshot::default()),
            offers: vec![
                ClueOffer {
                    id: "clue-low".to_string(),
                    title: "Surface scan".to_string(),
                    description: "A gentle nudge.".to_string(),
                    token_cost: 2,
                },
                ClueOffer {
                    id: "clue-high".to_string(),
                    title: "Full schematic".to_string(),
                    description: "The whole layout.".to_string(),
                    token_cost: 6,
                },
            ],
            fault: FaultMode::None,
            points_per_solve: 100,
            tokens_per_solve: 1,
            submit_calls: Cell::new(0),
            dropped: Cell::new(0),
        }
    }

    /// Install a failure mode.
    #[must_use]
    pub fn with_fault(mut self, fault: FaultMode) -> Self {
        self.fault = fault;
        self
    }

    /// Pretend the team is logged out.
    #[must_use]
    pub fn without_token(mut self) -> Self {
        self.token = None;
        self
    }

    /// Pre-load the authoritative snapshot returned on round entry.
    pub fn set_snapshot(&self, snapshot: ProgressSnapshot) {
        *self.snapshot.borrow_mut() = snapshot;
    }

    /// The correct answer for a question id.
    #[must_use]
    pub fn right_answer(&self, question_id: &str) -> String {
        self.answer_key
            .get(question_id)
            .cloned()
            .unwrap_or_default()
    }

    /// How many submissions actually reached this backend.
    #[must_use]
    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.get()
    }
}

impl EventBackend for ScriptedBackend {
    fn auth_token(&self) -> Option<String> {
        self.token.clone()
    }

    fn fetch_questions(&self, _round_id: &str) -> Result<Vec<Question>, BackendError> {
        Ok(self.questions.clone())
    }

    fn submit_answer(
        &self,
        _round_id: &str,
        request: &SubmitRequest,
    ) -> Result<SubmitResponse, BackendError> {
        if let FaultMode::DropSubmissions(n) = self.fault {
            if self.dropped.get() < n {
                self.dropped.set(self.dropped.get() + 1);
                return Err(BackendError::Network("connection reset".to_string()));
            }
        }
        self.submit_calls.set(self.submit_calls.get() + 1);

        let correct = self
            .answer_key
            .get(&request.question_id)
            .is_some_and(|expected| expected == &request.answer);
        if !correct && self.fault == FaultMode::RejectWrong {
            return Err(BackendError::Rejected {
                message: "incorrect answer".to_string(),
            });
        }
        Ok(SubmitResponse {
            success: true,
            correct: Some(correct),
            points_awarded: correct.then_some(self.points_per_solve),
            tokens_awarded: correct.then_some(self.tokens_per_solve),
            message: None,
        })
    }

    fn fetch_progress(&self, _round_id: &str) -> Result<ProgressSnapshot, BackendError> {
        Ok(self.snapshot.borrow().clone())
    }

    fn fetch_offers(&self) -> Result<Vec<ClueOffer>, BackendError> {
        Ok(self.offers.clone())
    }

    fn purchase_clue(&self, clue_id: &str) -> Result<PurchaseResponse, BackendError> {
        let known = self.offers.iter().any(|offer| offer.id == clue_id);
        Ok(PurchaseResponse {
            success: known,
            tokens_remaining: None,
            message: (!known).then(|| "unknown clue".to_string()),
        })
    }
}

/// In-memory `CacheStore` standing in for durable browser storage.
#[derive(Default)]
pub struct MemoryCache {
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
