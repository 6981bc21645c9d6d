//! Shared test helpers for integration tests.
//!
//! Provides a scripted in-memory socket (`FakeConnector` / `FakeServer`)
//! and an in-memory `SessionStore` with failure injection, so individual
//! test modules can focus on behaviour rather than plumbing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use interview_link::connection::{ChannelStatus, Connector, Link, ManagerConfig};
use interview_link::interview::SessionStore;
use interview_link::models::envelope::Envelope;
use interview_link::models::session::{Question, Response, SessionSnapshot};
use interview_link::{AppError, BoxFuture, Result};

// ── Fake socket ─────────────────────────────────────────

/// Manager settings with short delays for paused-clock tests.
pub fn test_manager_config(max_attempts: u32) -> ManagerConfig {
    ManagerConfig {
        url: "ws://fake.test/ws/connect/u-1".into(),
        base_delay: Duration::from_millis(100),
        max_attempts,
        handshake_timeout: Duration::from_secs(5),
    }
}

/// Server end of one accepted fake connection.
pub struct ServerConn {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: Option<mpsc::UnboundedSender<String>>,
}

impl ServerConn {
    /// Next envelope written by the client, or `None` once it closed.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        let raw = tokio::time::timeout(Duration::from_secs(30), self.from_client.recv())
            .await
            .expect("client frame before timeout")?;
        Some(Envelope::parse(&raw).expect("client sends valid envelopes"))
    }

    /// Write a raw `{type, data}` frame to the client.
    pub fn send(&self, kind: &str, data: Value) {
        let frame = json!({ "type": kind, "data": data }).to_string();
        self.send_raw(frame);
    }

    /// Write an arbitrary text frame to the client.
    pub fn send_raw(&self, frame: String) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(frame);
        }
    }

    /// Read the client's credential and acknowledge it.
    pub async fn accept(&mut self) -> String {
        let token = self.expect_authenticate().await;
        self.send("authenticated", json!({ "user_id": "u-1" }));
        token
    }

    /// Read the client's credential presentation and return the token.
    pub async fn expect_authenticate(&mut self) -> String {
        let envelope = self.next_envelope().await.expect("authenticate frame");
        assert_eq!(envelope.kind, "authenticate");
        envelope.data["token"]
            .as_str()
            .expect("token is a string")
            .to_owned()
    }

    /// Drop the server side of the socket.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }
}

struct FakeLink {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl Link for FakeLink {
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match &self.outgoing {
                Some(tx) => tx
                    .send(frame)
                    .map_err(|_| AppError::Transport("peer gone".into())),
                None => Err(AppError::Transport("link closed".into())),
            }
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move { Ok(self.incoming.recv().await) })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.outgoing = None;
            self.incoming.close();
        })
    }
}

/// Connector that hands each accepted connection to the test.
pub struct FakeConnector {
    accepted: mpsc::UnboundedSender<ServerConn>,
    refuse_first: AtomicUsize,
    refuse_all: bool,
    attempts: AtomicUsize,
}

impl Connector for FakeConnector {
    fn connect<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<Box<dyn Link>>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let refuse = self.refuse_all
                || self
                    .refuse_first
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if refuse {
                return Err(AppError::Transport("connection refused".into()));
            }

            let (client_tx, from_client) = mpsc::unbounded_channel();
            let (to_client, client_rx) = mpsc::unbounded_channel();
            let _ = self.accepted.send(ServerConn {
                from_client,
                to_client: Some(to_client),
            });
            Ok(Box::new(FakeLink {
                outgoing: Some(client_tx),
                incoming: client_rx,
            }) as Box<dyn Link>)
        })
    }
}

/// Test-side view of the fake server.
pub struct FakeServer {
    connector: Arc<FakeConnector>,
    accepted: mpsc::UnboundedReceiver<ServerConn>,
}

impl FakeServer {
    /// Server that accepts every connection.
    pub fn new() -> Self {
        Self::build(0, false)
    }

    /// Server that refuses the first `n` connection attempts.
    pub fn refusing_first(n: usize) -> Self {
        Self::build(n, false)
    }

    /// Server that refuses every connection attempt.
    pub fn unreachable() -> Self {
        Self::build(0, true)
    }

    fn build(refuse_first: usize, refuse_all: bool) -> Self {
        let (tx, accepted) = mpsc::unbounded_channel();
        Self {
            connector: Arc::new(FakeConnector {
                accepted: tx,
                refuse_first: AtomicUsize::new(refuse_first),
                refuse_all,
                attempts: AtomicUsize::new(0),
            }),
            accepted,
        }
    }

    /// Connector to hand to the manager.
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector) as Arc<dyn Connector>
    }

    /// Total connection attempts, refused ones included.
    pub fn attempts(&self) -> usize {
        self.connector.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection.
    pub async fn next_conn(&mut self) -> ServerConn {
        tokio::time::timeout(Duration::from_secs(30), self.accepted.recv())
            .await
            .expect("connection before timeout")
            .expect("connector alive")
    }
}

/// Next transition, failing the test if none arrives.
pub async fn next_status(rx: &mut broadcast::Receiver<ChannelStatus>) -> ChannelStatus {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("transition before timeout")
        .expect("transition stream open")
}

// ── In-memory session store ─────────────────────────────

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<String, SessionSnapshot>,
    failing_submits: usize,
    submits: Vec<(String, String)>,
}

/// `SessionStore` held in memory, with injectable submit failures.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    /// Store holding one session.
    pub fn with(snapshot: SessionSnapshot) -> Arc<Self> {
        let store = Self::default();
        store
            .inner
            .lock()
            .unwrap()
            .sessions
            .insert(snapshot.session_id.clone(), snapshot);
        Arc::new(store)
    }

    /// Make the next `n` submissions fail.
    pub fn fail_next_submits(&self, n: usize) {
        self.inner.lock().unwrap().failing_submits = n;
    }

    /// Every `(question_id, text)` submission that reached the store.
    pub fn submits(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().submits.clone()
    }

    /// Current record for `session_id`.
    pub fn snapshot(&self, session_id: &str) -> SessionSnapshot {
        self.inner.lock().unwrap().sessions[session_id].clone()
    }
}

impl SessionStore for MemoryStore {
    fn fetch_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<SessionSnapshot>> {
        Box::pin(async move {
            self.inner
                .lock()
                .unwrap()
                .sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))
        })
    }

    fn submit_answer<'a>(
        &'a self,
        session_id: &'a str,
        question_id: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if inner.failing_submits > 0 {
                inner.failing_submits -= 1;
                return Err(AppError::Persistence("store unavailable".into()));
            }
            inner
                .submits
                .push((question_id.to_owned(), text.to_owned()));
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| AppError::NotFound(session_id.to_owned()))?;
            session
                .responses
                .entry(question_id.to_owned())
                .or_insert_with(|| Response::text(text));
            Ok(())
        })
    }
}

/// Session `id` with `count` questions `q1..qN`, each budgeted `budget`
/// seconds.
pub fn session_with(id: &str, count: usize, budget: i64) -> SessionSnapshot {
    SessionSnapshot {
        session_id: id.into(),
        questions: (1..=count)
            .map(|n| Question::new(format!("q{n}"), format!("Question {n}?"), budget))
            .collect(),
        responses: HashMap::new(),
        status: Some("in_progress".into()),
    }
}
