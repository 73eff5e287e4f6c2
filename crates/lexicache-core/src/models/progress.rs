use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exercise category. The catalog has exactly three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Vocabulary,
    Grammar,
    Pronunciation,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Vocabulary, Category::Grammar, Category::Pronunciation];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Vocabulary => "Vocabulary",
            Category::Grammar => "Grammar",
            Category::Pronunciation => "Pronunciation",
        }
    }

    /// Infer the category from a formatted exercise id such as `grammar-12`.
    pub fn from_exercise_id(exercise_id: &str) -> Option<Self> {
        let prefix = exercise_id.split(['-', '_', ':']).next()?;
        if prefix.eq_ignore_ascii_case("vocabulary") || prefix.eq_ignore_ascii_case("vocab") {
            Some(Category::Vocabulary)
        } else if prefix.eq_ignore_ascii_case("grammar") {
            Some(Category::Grammar)
        } else if prefix.eq_ignore_ascii_case("pronunciation") || prefix.eq_ignore_ascii_case("speaking") {
            Some(Category::Pronunciation)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One submission for an exercise. Never modified after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Attempt {
    #[serde(rename = "isCorrect")]
    pub is_correct: bool,
    #[serde(rename = "timeSpent", default)]
    pub time_spent: f64,
    #[serde(rename = "attemptDate")]
    pub attempt_date: DateTime<Utc>,
    #[serde(rename = "userAnswer", default, skip_serializing_if = "Option::is_none")]
    pub user_answer: Option<String>,
}

/// Accumulated history for a single exercise, as mirrored from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ProgressRecord {
    #[serde(rename = "exerciseId")]
    pub exercise_id: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(rename = "totalTimeSpent", default)]
    pub total_time_spent: f64,
    #[serde(default)]
    attempts: Vec<Attempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl ProgressRecord {
    /// A record with no history, used when the backend has nothing yet.
    pub fn empty(exercise_id: impl Into<String>) -> Self {
        Self {
            exercise_id: exercise_id.into(),
            completed: false,
            total_time_spent: 0.0,
            attempts: Vec::new(),
            category: None,
        }
    }

    /// Attempts in chronological order.
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn latest_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Append an attempt to the log. Earlier attempts are left untouched,
    /// the time accumulator only grows, and a correct attempt completes the
    /// exercise.
    pub fn record_attempt(&mut self, attempt: Attempt) {
        self.total_time_spent += attempt.time_spent.max(0.0);
        if attempt.is_correct {
            self.completed = true;
        }
        self.attempts.push(attempt);
    }

    pub fn has_correct_attempt(&self) -> bool {
        self.attempts.iter().any(|a| a.is_correct)
    }

    /// Backend-reported category, falling back to the exercise id prefix.
    pub fn category(&self) -> Option<Category> {
        self.category
            .or_else(|| Category::from_exercise_id(&self.exercise_id))
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

/// Payload for `PUT /progress/quiz/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ProgressUpdate {
    #[serde(rename = "timeSpent")]
    pub time_spent: f64,
    #[serde(rename = "isCorrect")]
    pub is_correct: bool,
    pub completed: bool,
    #[serde(rename = "userAnswer", default, skip_serializing_if = "Option::is_none")]
    pub user_answer: Option<String>,
}

impl ProgressUpdate {
    pub fn new(time_spent: f64, is_correct: bool, completed: bool) -> Self {
        Self {
            time_spent,
            is_correct,
            completed,
            user_answer: None,
        }
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.user_answer = Some(answer.into());
        self
    }
}
