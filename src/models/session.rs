//! Interview session model as stored by the session backend.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Stable question identifier.
pub type QuestionId = String;

/// One timed question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    /// Identifier; older records use `qid` or `question_id`.
    #[serde(alias = "qid", alias = "question_id")]
    pub id: QuestionId,
    /// Prompt text shown to the candidate.
    #[serde(alias = "question")]
    pub text: String,
    /// Category such as `technical` or `behavioral`.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Time budget in seconds. Signed on the wire so bad values can be
    /// reported rather than silently wrapped.
    #[serde(rename = "max_time", alias = "time_budget", default = "default_budget")]
    pub time_budget: i64,
}

fn default_kind() -> String {
    "technical".into()
}

fn default_budget() -> i64 {
    60
}

impl Question {
    /// Create a question with the default kind.
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>, time_budget: i64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            kind: default_kind(),
            time_budget,
        }
    }

    /// Validated time budget in whole seconds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidSession` for budgets of zero or less.
    pub fn budget_seconds(&self) -> Result<u32> {
        u32::try_from(self.time_budget)
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| {
                AppError::InvalidSession(format!(
                    "question {} has non-positive time budget {}",
                    self.id, self.time_budget
                ))
            })
    }
}

/// A recorded answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    /// Answer text.
    pub text: String,
    /// When the answer was accepted.
    #[serde(default = "Utc::now", deserialize_with = "super::deserialize_utc")]
    pub submitted_at: DateTime<Utc>,
    /// Optional recording location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Optional speech-to-text transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl Response {
    /// A text answer accepted now.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            submitted_at: Utc::now(),
            audio_url: None,
            transcript: None,
        }
    }
}

/// Session record as returned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Stable session identifier.
    pub session_id: String,
    /// Ordered question list.
    pub questions: Vec<Question>,
    /// Answers keyed by question id.
    #[serde(default)]
    pub responses: HashMap<QuestionId, Response>,
    /// Backend status label (`pending`, `in_progress`, `completed`, ...).
    #[serde(default)]
    pub status: Option<String>,
}

impl SessionSnapshot {
    /// Check the construction invariants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidSession` when the question list is empty,
    /// a question id repeats, a time budget is not positive, or a response
    /// refers to a question that is not part of the session.
    pub fn validate(&self) -> Result<()> {
        if self.questions.is_empty() {
            return Err(AppError::InvalidSession(format!(
                "session {} has no questions",
                self.session_id
            )));
        }

        let mut seen = HashSet::with_capacity(self.questions.len());
        for question in &self.questions {
            question.budget_seconds()?;
            if !seen.insert(question.id.as_str()) {
                return Err(AppError::InvalidSession(format!(
                    "duplicate question id {}",
                    question.id
                )));
            }
        }

        if let Some(stray) = self.responses.keys().find(|id| !seen.contains(id.as_str())) {
            return Err(AppError::InvalidSession(format!(
                "response for unknown question {stray}"
            )));
        }

        Ok(())
    }
}
