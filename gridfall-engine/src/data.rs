use serde::{Deserialize, Serialize};

/// Expected answer shape for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnswerShape {
    MultipleChoice,
    #[default]
    FreeText,
    Numeric,
}

/// A single challenge question. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub shape: AnswerShape,
    /// Present for multiple-choice questions, empty otherwise.
    #[serde(default)]
    pub choices: Vec<String>,
    /// Server-provided ordering key for fixed-order rounds.
    #[serde(default)]
    pub order: Option<u32>,
}

/// Container for a round's question set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QuestionCatalog {
    pub questions: Vec<Question>,
}

impl QuestionCatalog {
    /// Create an empty catalog (useful for tests).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            questions: Vec::new(),
        }
    }

    /// Load a catalog from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into valid questions.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Create a catalog from pre-parsed questions.
    #[must_use]
    pub fn from_questions(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    /// Look up a question by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    /// Question at a list position (sequential assignment).
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    /// Questions sorted ascending by their server-provided order field.
    /// Questions without an order are excluded from the view.
    #[must_use]
    pub fn by_order(&self) -> Vec<&Question> {
        let mut ordered: Vec<&Question> = self
            .questions
            .iter()
            .filter(|q| q.order.is_some())
            .collect();
        ordered.sort_by_key(|q| q.order);
        ordered
    }

    /// Number of questions in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Whether the catalog holds no questions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}
