//! Background driver that owns a session and feeds it wall-clock ticks.
//!
//! Commands and ticks are handled one at a time by a single task, so a
//! manual submit and a clock expiry can never interleave.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::dispatch::{Registry, Subscription};
use crate::interview::session::{
    SessionEvent, SessionState, SubmitOutcome, TickOutcome, TimedInteractionSession,
};
use crate::models::session::Question;
use crate::{AppError, Result};

const COMMAND_BUFFER: usize = 32;

/// Point-in-time copy of a running session, for rendering.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionView {
    /// Session identifier.
    pub session_id: String,
    /// State machine position.
    pub state: SessionState,
    /// Index of the current question.
    pub cursor: usize,
    /// Number of questions.
    pub total: usize,
    /// Question at the cursor, if any remain.
    pub current: Option<Question>,
    /// Seconds left on the countdown.
    pub remaining: u32,
    /// Answer buffer.
    pub draft: String,
}

impl SessionView {
    fn of(session: &TimedInteractionSession) -> Self {
        Self {
            session_id: session.session_id().to_owned(),
            state: session.state(),
            cursor: session.cursor(),
            total: session.questions().len(),
            current: session.current_question().cloned(),
            remaining: session.remaining(),
            draft: session.draft().to_owned(),
        }
    }

    /// Whether every question is resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Complete
    }
}

enum Command {
    Start(oneshot::Sender<bool>),
    SetDraft(String),
    AppendDraft(String),
    Submit {
        question_id: String,
        text: String,
        reply: oneshot::Sender<Result<SubmitOutcome>>,
    },
    View(oneshot::Sender<SessionView>),
}

/// Builder for a session runner.
///
/// Call [`spawn`](Self::spawn) to start the background task.
pub struct SessionRunner {
    session: TimedInteractionSession,
    tick_interval: Duration,
    cancel: CancellationToken,
}

impl SessionRunner {
    /// Wrap a hydrated session. `tick_interval` is the length of one
    /// countdown second.
    #[must_use]
    pub fn new(
        session: TimedInteractionSession,
        tick_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            tick_interval,
            cancel,
        }
    }

    /// Spawn the background task and return a handle for driving it.
    #[must_use]
    pub fn spawn(self) -> SessionRunnerHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let events = self.session.events();
        let session_id = self.session.session_id().to_owned();
        let cancel = self.cancel.clone();

        let join_handle = tokio::spawn(
            Self::run(self.session, self.tick_interval, rx, self.cancel)
                .instrument(info_span!("session_runner", session_id = %session_id)),
        );

        SessionRunnerHandle {
            commands: tx,
            events,
            session_id,
            join_handle: Some(join_handle),
            cancel,
        }
    }

    async fn run(
        mut session: TimedInteractionSession,
        tick_interval: Duration,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> TimedInteractionSession {
        let mut ticker = time::interval_at(Instant::now() + tick_interval, tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let counting_before = counting_index(&session);

            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("session runner cancelled");
                    break;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("all session handles dropped");
                        break;
                    };
                    Self::handle(&mut session, command).await;
                }
                _ = ticker.tick(), if !session.is_complete() => {
                    match session.tick().await {
                        Ok(TickOutcome::Expired(outcome)) => debug!(?outcome, "question expired"),
                        Ok(_) => {}
                        Err(err) => warn!(%err, "expiry submission failed, retrying next tick"),
                    }
                }
            }

            // A fresh countdown gets a full first second.
            if let Some(index) = counting_index(&session) {
                if counting_before != Some(index) {
                    ticker.reset();
                }
            }
        }

        session
    }

    async fn handle(session: &mut TimedInteractionSession, command: Command) {
        match command {
            Command::Start(reply) => {
                let _ = reply.send(session.start());
            }
            Command::SetDraft(text) => session.set_draft(text),
            Command::AppendDraft(line) => {
                let mut draft = session.draft().to_owned();
                if !draft.is_empty() {
                    draft.push('\n');
                }
                draft.push_str(&line);
                session.set_draft(draft);
            }
            Command::Submit {
                question_id,
                text,
                reply,
            } => {
                let outcome = session.submit(&question_id, text).await;
                let _ = reply.send(outcome);
            }
            Command::View(reply) => {
                let _ = reply.send(SessionView::of(session));
            }
        }
    }
}

/// Handle returned from [`SessionRunner::spawn`].
pub struct SessionRunnerHandle {
    commands: mpsc::Sender<Command>,
    events: Registry<SessionEvent>,
    session_id: String,
    join_handle: Option<JoinHandle<TimedInteractionSession>>,
    cancel: CancellationToken,
}

impl Drop for SessionRunnerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SessionRunnerHandle {
    /// Start the current question's countdown. `false` if the session was
    /// not awaiting a start.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the runner has stopped.
    pub async fn start(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start(reply)).await?;
        rx.await.map_err(|_| stopped())
    }

    /// Replace the answer buffer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the runner has stopped.
    pub async fn set_draft(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::SetDraft(text.into())).await
    }

    /// Append a line to the answer buffer of whichever question is current
    /// when the runner processes it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the runner has stopped.
    pub async fn append_draft(&self, line: impl Into<String>) -> Result<()> {
        self.send(Command::AppendDraft(line.into())).await
    }

    /// Submit an answer for `question_id`.
    ///
    /// # Errors
    ///
    /// Returns the store failure, or `AppError::NotFound` if the runner has
    /// stopped.
    pub async fn submit(
        &self,
        question_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<SubmitOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            question_id: question_id.into(),
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| stopped())?
    }

    /// Current session view.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the runner has stopped.
    pub async fn view(&self) -> Result<SessionView> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::View(reply)).await?;
        rx.await.map_err(|_| stopped())
    }

    /// Register `callback` for session events on `topic`.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(topic, std::sync::Arc::new(callback))
    }

    /// The session this runner drives.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stop the runner and take the session back.
    pub async fn stop(mut self) -> Option<TimedInteractionSession> {
        self.cancel.cancel();
        let handle = self.join_handle.take()?;
        handle.await.ok()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| stopped())
    }
}

fn counting_index(session: &TimedInteractionSession) -> Option<usize> {
    match session.state() {
        SessionState::Counting { index, .. } => Some(index),
        _ => None,
    }
}

fn stopped() -> AppError {
    AppError::NotFound("session runner has stopped".into())
}
