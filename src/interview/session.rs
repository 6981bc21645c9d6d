//! Timed sequential interview state machine.
//!
//! ```text
//! Loading → AwaitingStart(q) → Counting(q) → Submitting(q) → Counting(q+1)       (auto-start)
//!                                   │              │       → AwaitingStart(q+1)  (start-gated)
//!                                   │              └──────→ Complete
//!                                   └─ clock hits zero → expiry path
//! ```
//!
//! The cursor (index of the current question) is never stored. It is the
//! number of resolved questions: answered ones plus lapsed ones (expired
//! with an empty answer buffer). Questions resolve strictly in order, so
//! that count is also the index of the first unresolved question.
//!
//! A manual submit and a clock expiry for the same question are resolved by
//! a single check before any mutation: whichever runs first resolves the
//! question, and the other observes it resolved and does nothing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dispatch::{Registry, Subscription};
use crate::interview::clock::Clock;
use crate::interview::store::SessionStore;
use crate::models::session::{Question, QuestionId, Response, SessionSnapshot};
use crate::{AppError, Result};

/// Event topics published by a session.
pub mod topics {
    /// Every [`SessionEvent::StateChanged`].
    pub const STATE: &str = "state";
    /// Every [`SessionEvent::Tick`].
    pub const CLOCK: &str = "clock";
    /// [`SessionEvent::Recorded`], [`SessionEvent::Lapsed`] and
    /// [`SessionEvent::SubmitFailed`].
    pub const SUBMISSION: &str = "submission";
}

/// What happens once a question is resolved and more remain.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceFlow {
    /// The next question's countdown starts immediately.
    #[default]
    AutoStart,
    /// The next question waits for an explicit [`TimedInteractionSession::start`].
    StartGated,
}

/// Externally visible session state. `index` is always the derived cursor.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Not yet reconciled with the store.
    Loading,
    /// Current question shown, countdown not started.
    AwaitingStart {
        /// Current question index.
        index: usize,
    },
    /// Countdown running.
    Counting {
        /// Current question index.
        index: usize,
        /// Seconds left.
        remaining: u32,
    },
    /// Answer for the current question is being persisted.
    Submitting {
        /// Current question index.
        index: usize,
    },
    /// Countdown expired with an answer that could not be persisted yet.
    ExpiryPending {
        /// Current question index.
        index: usize,
    },
    /// Every question is resolved. Terminal.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Loading,
    AwaitingStart,
    Counting,
    Submitting,
    ExpiryPending,
    Complete,
}

/// Why a submission was not applied.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The question already has a response.
    AlreadyAnswered,
    /// The question is not the current one (lapsed, or not reached yet).
    NotCurrent,
    /// The current question is not accepting answers (not started, or a
    /// submission is in flight).
    NotAccepting,
    /// The session is complete.
    Complete,
}

/// Result of a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The answer was persisted and the cursor advanced.
    Recorded {
        /// Question that was answered.
        question_id: QuestionId,
        /// Cursor after advancing.
        cursor: usize,
    },
    /// Benign no-op.
    Ignored(IgnoreReason),
}

/// How an expired question was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// The answer buffer was persisted as the answer.
    Submitted {
        /// Question that was answered.
        question_id: QuestionId,
    },
    /// Nothing was composed; the question lapsed without a response.
    Lapsed {
        /// Question that lapsed.
        question_id: QuestionId,
    },
}

/// Result of one [`TimedInteractionSession::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No countdown is running.
    Idle,
    /// One second elapsed.
    Counted {
        /// Seconds left.
        remaining: u32,
    },
    /// The countdown reached zero and the expiry path ran.
    Expired(ExpiryOutcome),
}

/// Notification published to session subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The state machine moved.
    StateChanged(SessionState),
    /// The countdown advanced.
    Tick {
        /// Current question.
        question_id: QuestionId,
        /// Seconds left.
        remaining: u32,
    },
    /// An answer was persisted.
    Recorded {
        /// Answered question.
        question_id: QuestionId,
    },
    /// A question expired without an answer.
    Lapsed {
        /// Lapsed question.
        question_id: QuestionId,
    },
    /// Persisting an answer failed; the same submission may be retried.
    SubmitFailed {
        /// Question whose answer was not stored.
        question_id: QuestionId,
        /// Store failure.
        error: AppError,
    },
}

/// One candidate's run through an ordered list of timed questions.
pub struct TimedInteractionSession {
    store: Arc<dyn SessionStore>,
    session_id: String,
    flow: AdvanceFlow,
    questions: Vec<Question>,
    budgets: Vec<u32>,
    responses: HashMap<QuestionId, Response>,
    lapsed: HashSet<QuestionId>,
    phase: Phase,
    clock: Clock,
    draft: String,
    events: Registry<SessionEvent>,
}

impl TimedInteractionSession {
    /// A session in `Loading`; call [`load`](Self::load) before use.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, session_id: impl Into<String>, flow: AdvanceFlow) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            flow,
            questions: Vec::new(),
            budgets: Vec::new(),
            responses: HashMap::new(),
            lapsed: HashSet::new(),
            phase: Phase::Loading,
            clock: Clock::new(0),
            draft: String::new(),
            events: Registry::new(),
        }
    }

    /// Fetch and reconcile a session, resuming at the first unresolved
    /// question.
    ///
    /// # Errors
    ///
    /// Propagates store failures and returns [`AppError::InvalidSession`]
    /// if the record violates a construction invariant.
    pub async fn hydrate(
        store: Arc<dyn SessionStore>,
        session_id: impl Into<String>,
        flow: AdvanceFlow,
    ) -> Result<Self> {
        let mut session = Self::new(store, session_id, flow);
        session.load().await?;
        Ok(session)
    }

    /// Replace the local cache with the store's record.
    ///
    /// Any running countdown is discarded and the draft is cleared. Not
    /// allowed while a submission is in flight.
    ///
    /// # Errors
    ///
    /// Propagates store failures and returns [`AppError::InvalidSession`]
    /// if the record violates a construction invariant. On error the
    /// session keeps its previous state.
    pub async fn load(&mut self) -> Result<()> {
        let snapshot = self.store.fetch_session(&self.session_id).await?;
        self.reconcile(snapshot)
    }

    fn reconcile(&mut self, snapshot: SessionSnapshot) -> Result<()> {
        if snapshot.session_id != self.session_id {
            return Err(AppError::InvalidSession(format!(
                "store returned session {} for {}",
                snapshot.session_id, self.session_id
            )));
        }
        snapshot.validate()?;

        let budgets = snapshot
            .questions
            .iter()
            .map(Question::budget_seconds)
            .collect::<Result<Vec<_>>>()?;

        // Unanswered questions before the last answered one were skipped by
        // expiry in an earlier run.
        let last_answered = snapshot
            .questions
            .iter()
            .rposition(|q| snapshot.responses.contains_key(&q.id));
        let lapsed = last_answered.map_or_else(HashSet::new, |last| {
            snapshot.questions[..last]
                .iter()
                .filter(|q| !snapshot.responses.contains_key(&q.id))
                .map(|q| q.id.clone())
                .collect()
        });

        self.questions = snapshot.questions;
        self.budgets = budgets;
        self.responses = snapshot.responses;
        self.lapsed = lapsed;
        self.draft.clear();

        let cursor = self.cursor();
        info!(
            session_id = %self.session_id,
            cursor,
            total = self.questions.len(),
            answered = self.responses.len(),
            "session hydrated"
        );

        if cursor >= self.questions.len() {
            self.clock = Clock::new(0);
            self.set_phase(Phase::Complete);
        } else {
            self.clock = Clock::new(self.budgets[cursor]);
            self.set_phase(Phase::AwaitingStart);
        }
        Ok(())
    }

    /// Start the current question's countdown.
    ///
    /// Returns `false` (no-op) unless the session is awaiting a start.
    pub fn start(&mut self) -> bool {
        if self.phase != Phase::AwaitingStart {
            debug!(session_id = %self.session_id, phase = ?self.phase, "start ignored");
            return false;
        }
        self.clock = Clock::new(self.budgets[self.cursor()]);
        self.clock.start();
        self.set_phase(Phase::Counting);
        true
    }

    /// Advance the countdown by one second, running the expiry path when it
    /// reaches zero.
    ///
    /// While an expired answer is still unsaved, each tick retries saving
    /// it.
    ///
    /// # Errors
    ///
    /// Returns the store failure if the expiry path could not persist the
    /// answer buffer. The session then stays in `ExpiryPending`.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        match self.phase {
            Phase::Counting => {
                let expired = self.clock.tick();
                let remaining = self.clock.remaining();
                if let Some(question) = self.current_question() {
                    let question_id = question.id.clone();
                    self.events.dispatch(
                        topics::CLOCK,
                        &SessionEvent::Tick {
                            question_id,
                            remaining,
                        },
                    );
                }
                if expired {
                    self.expire().await.map(TickOutcome::Expired)
                } else {
                    Ok(TickOutcome::Counted { remaining })
                }
            }
            Phase::ExpiryPending => self.expire().await.map(TickOutcome::Expired),
            Phase::Loading | Phase::AwaitingStart | Phase::Submitting | Phase::Complete => {
                Ok(TickOutcome::Idle)
            }
        }
    }

    /// Replace the answer buffer used by the expiry path.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        if self.phase == Phase::Complete {
            return;
        }
        self.draft = text.into();
    }

    /// Submit `text` as the answer to `question_id`.
    ///
    /// Only the current question can be answered, and only while its
    /// countdown is running or its expiry is pending. Anything else is a
    /// benign [`SubmitOutcome::Ignored`].
    ///
    /// # Errors
    ///
    /// Returns the store failure. The cursor, state, and draft are left
    /// exactly as they were, so the same call can be retried.
    pub async fn submit(&mut self, question_id: &str, text: impl Into<String>) -> Result<SubmitOutcome> {
        if let Some(reason) = self.check_submittable(question_id) {
            debug!(session_id = %self.session_id, question_id, ?reason, "submit ignored");
            return Ok(SubmitOutcome::Ignored(reason));
        }

        let text = text.into();
        self.persist_current(&text).await?;
        Ok(SubmitOutcome::Recorded {
            question_id: question_id.to_owned(),
            cursor: self.cursor(),
        })
    }

    fn check_submittable(&self, question_id: &str) -> Option<IgnoreReason> {
        if self.phase == Phase::Complete {
            return Some(IgnoreReason::Complete);
        }
        if self.responses.contains_key(question_id) {
            return Some(IgnoreReason::AlreadyAnswered);
        }
        match self.current_question() {
            Some(current) if current.id == question_id => {}
            _ => return Some(IgnoreReason::NotCurrent),
        }
        if !matches!(self.phase, Phase::Counting | Phase::ExpiryPending) {
            return Some(IgnoreReason::NotAccepting);
        }
        None
    }

    /// The countdown ran out: submit the buffer, or lapse if it is empty.
    async fn expire(&mut self) -> Result<ExpiryOutcome> {
        let Some(question) = self.current_question() else {
            return Err(AppError::InvalidSession("expiry with no current question".into()));
        };
        let question_id = question.id.clone();

        if self.draft.is_empty() {
            info!(session_id = %self.session_id, %question_id, "question lapsed without an answer");
            self.lapsed.insert(question_id.clone());
            self.draft.clear();
            self.events.dispatch(
                topics::SUBMISSION,
                &SessionEvent::Lapsed {
                    question_id: question_id.clone(),
                },
            );
            self.advance();
            return Ok(ExpiryOutcome::Lapsed { question_id });
        }

        let text = self.draft.clone();
        if let Err(err) = self.persist_current(&text).await {
            self.set_phase(Phase::ExpiryPending);
            return Err(err);
        }
        Ok(ExpiryOutcome::Submitted { question_id })
    }

    /// Persist `text` for the current question and advance on success.
    ///
    /// On failure the phase and clock are restored.
    async fn persist_current(&mut self, text: &str) -> Result<()> {
        let index = self.cursor();
        let question_id = self.questions[index].id.clone();
        let prior = self.phase;
        let was_running = self.clock.is_running();

        self.clock.stop();
        self.set_phase(Phase::Submitting);

        match self
            .store
            .submit_answer(&self.session_id, &question_id, text)
            .await
        {
            Ok(()) => {
                info!(session_id = %self.session_id, %question_id, "answer recorded");
                self.responses
                    .insert(question_id.clone(), Response::text(text));
                self.draft.clear();
                self.events
                    .dispatch(topics::SUBMISSION, &SessionEvent::Recorded { question_id });
                self.advance();
                Ok(())
            }
            Err(err) => {
                warn!(session_id = %self.session_id, %question_id, %err, "answer not persisted");
                if was_running {
                    self.clock.start();
                }
                self.set_phase(prior);
                self.events.dispatch(
                    topics::SUBMISSION,
                    &SessionEvent::SubmitFailed {
                        question_id,
                        error: err.clone(),
                    },
                );
                Err(err)
            }
        }
    }

    /// Move to the next unresolved question, or finish.
    fn advance(&mut self) {
        let cursor = self.cursor();
        if cursor >= self.questions.len() {
            self.clock = Clock::new(0);
            info!(session_id = %self.session_id, "session complete");
            self.set_phase(Phase::Complete);
            return;
        }

        self.clock = Clock::new(self.budgets[cursor]);
        match self.flow {
            AdvanceFlow::AutoStart => {
                self.clock.start();
                self.set_phase(Phase::Counting);
            }
            AdvanceFlow::StartGated => self.set_phase(Phase::AwaitingStart),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        let state = self.state();
        self.events
            .dispatch(topics::STATE, &SessionEvent::StateChanged(state));
    }

    /// Index of the next unresolved question.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.responses.len() + self.lapsed.len()
    }

    /// Current externally visible state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        let index = self.cursor();
        match self.phase {
            Phase::Loading => SessionState::Loading,
            Phase::AwaitingStart => SessionState::AwaitingStart { index },
            Phase::Counting => SessionState::Counting {
                index,
                remaining: self.clock.remaining(),
            },
            Phase::Submitting => SessionState::Submitting { index },
            Phase::ExpiryPending => SessionState::ExpiryPending { index },
            Phase::Complete => SessionState::Complete,
        }
    }

    /// Question at the cursor, if any remain.
    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        if self.phase == Phase::Loading {
            return None;
        }
        self.questions.get(self.cursor())
    }

    /// Seconds left on the current countdown.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.clock.remaining()
    }

    /// Current answer buffer.
    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Whether every question is resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Advance flow in effect.
    #[must_use]
    pub fn flow(&self) -> AdvanceFlow {
        self.flow
    }

    /// Ordered questions.
    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Recorded answers keyed by question id.
    #[must_use]
    pub fn responses(&self) -> &HashMap<QuestionId, Response> {
        &self.responses
    }

    /// Whether `question_id` expired without an answer.
    #[must_use]
    pub fn is_lapsed(&self, question_id: &str) -> bool {
        self.lapsed.contains(question_id)
    }

    /// Register `callback` for events on one of the [`topics`].
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(topic, Arc::new(callback))
    }

    /// Event registry shared with long-lived owners such as the runner.
    #[must_use]
    pub fn events(&self) -> Registry<SessionEvent> {
        self.events.clone()
    }
}
