//! Push channel lifecycle driver.
//!
//! A [`ConnectionManager`] owns exactly one background task. That task owns
//! the channel (socket, credential, attempt counter) and is the only code
//! that mutates it; callers talk to it through an unbounded command queue
//! and observe it through a `watch` snapshot and a `broadcast` stream of
//! transitions.
//!
//! # Reconnection policy
//!
//! Any transport loss or handshake failure while a credential is set bumps
//! the attempt counter and waits `base_delay * attempt` before the next
//! connect. The counter is reset only once the channel is `Ready` again, so
//! an authentication outage cannot hot-loop. When the counter exceeds
//! `max_attempts` the channel stops in `Idle` and stays there until
//! [`ConnectionManager::set_credential`] is called again.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ConnectionConfig;
use crate::connection::state::{ChannelStatus, ConnectionState};
use crate::connection::transport::{Connector, Link, WsConnector};
use crate::dispatch::{Callback, Registry, Subscription};
use crate::models::envelope::{control, Envelope};
use crate::{BoxFuture, Result};

/// Capacity of the transition broadcast; slow observers lose the oldest.
const TRANSITION_CAPACITY: usize = 64;

/// Upper bound on a graceful socket close during teardown.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Ceiling for any single backoff or handshake wait.
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Runtime settings for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Endpoint to connect to.
    pub url: String,
    /// Linear backoff unit.
    pub base_delay: Duration,
    /// Reconnect attempts allowed before failing stop.
    pub max_attempts: u32,
    /// Time allowed for the authentication acknowledgement.
    pub handshake_timeout: Duration,
}

impl From<&ConnectionConfig> for ManagerConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            url: config.url.clone(),
            base_delay: config.base_delay(),
            max_attempts: config.max_attempts,
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

enum Command {
    SetCredential(Option<String>),
    Publish(Envelope),
}

/// Handle to the push channel.
///
/// Dropping the handle cancels the background task; call
/// [`shutdown`](Self::shutdown) to also wait for it.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    registry: Registry<Envelope>,
    status: watch::Receiver<ChannelStatus>,
    transitions: broadcast::Sender<ChannelStatus>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Spawn a manager that connects with `connector`.
    ///
    /// The manager starts `Idle`; nothing is dialled until a credential is
    /// supplied. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::idle());
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let registry = Registry::new();
        let cancel = CancellationToken::new();

        let driver = Driver {
            config,
            connector,
            registry: registry.clone(),
            status_tx,
            transitions: transitions.clone(),
            commands: command_rx,
            cancel: cancel.clone(),
            credential: None,
            state: ConnectionState::Idle,
            attempt: 0,
        };
        let task = tokio::spawn(driver.run().instrument(info_span!("connection_manager")));

        Self {
            commands: command_tx,
            registry,
            status: status_rx,
            transitions,
            cancel,
            task: Some(task),
        }
    }

    /// Spawn a manager that speaks WebSocket.
    #[must_use]
    pub fn websocket(config: ManagerConfig) -> Self {
        Self::spawn(config, Arc::new(WsConnector))
    }

    /// Set or clear the credential.
    ///
    /// - `Some(token)` while idle starts connecting.
    /// - `Some(token)` equal to the current credential while a channel
    ///   exists is a no-op.
    /// - `Some(other)` while a channel exists replaces it.
    /// - `None` tears down any channel, cancels pending reconnects, and
    ///   clears the attempt counter.
    pub fn set_credential(&self, token: Option<String>) {
        if self.commands.send(Command::SetCredential(token)).is_err() {
            warn!("set_credential ignored: connection manager stopped");
        }
    }

    /// Publish `payload` on `topic`.
    ///
    /// Only a `Ready` channel accepts messages; otherwise the message is
    /// dropped and `false` is returned. Nothing is queued for later. Reserved
    /// control types cannot be published.
    pub fn publish(&self, topic: &str, payload: Value) -> bool {
        if control::is_reserved(topic) {
            warn!(topic, "refusing to publish on a reserved control type");
            return false;
        }
        if !self.status.borrow().state.is_ready() {
            debug!(topic, "publish dropped: channel not ready");
            return false;
        }
        self.commands
            .send(Command::Publish(Envelope::new(topic, payload)))
            .is_ok()
    }

    /// Register `callback` for messages on `topic`.
    ///
    /// Subscribe to [`control::ERROR`] to receive application-level errors
    /// and authentication rejections.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.registry.subscribe(topic, Arc::new(callback))
    }

    /// Register an already shared callback; registering the same `Arc`
    /// twice on a topic delivers once.
    pub fn subscribe_shared(
        &self,
        topic: impl Into<String>,
        callback: Callback<Envelope>,
    ) -> Subscription {
        self.registry.subscribe(topic, callback)
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    /// Receiver that always holds the latest status.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Stream of every state transition from now on.
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<ChannelStatus> {
        self.transitions.subscribe()
    }

    /// Stop the background task and wait for it to release the channel.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Where the driver is in the lifecycle, carrying whatever that stage owns.
enum Phase {
    Idle,
    Connecting(BoxFuture<'static, Result<Box<dyn Link>>>),
    Authenticating {
        link: Box<dyn Link>,
        deadline: Instant,
    },
    Ready(Box<dyn Link>),
    Reconnecting {
        until: Instant,
    },
}

impl Phase {
    fn into_link(self) -> Option<Box<dyn Link>> {
        match self {
            Self::Authenticating { link, .. } | Self::Ready(link) => Some(link),
            Self::Idle | Self::Connecting(_) | Self::Reconnecting { .. } => None,
        }
    }
}

/// What a handshake frame did to the pending authentication.
enum Handshake {
    Pending,
    Accepted,
    Rejected,
}

struct Driver {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    registry: Registry<Envelope>,
    status_tx: watch::Sender<ChannelStatus>,
    transitions: broadcast::Sender<ChannelStatus>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    credential: Option<String>,
    state: ConnectionState,
    attempt: u32,
}

impl Driver {
    async fn run(mut self) {
        let mut phase = Phase::Idle;

        loop {
            phase = match phase {
                Phase::Idle => tokio::select! {
                    () = self.cancel.cancelled() => break,
                    cmd = self.commands.recv() => match cmd {
                        Some(cmd) => self.on_command(cmd, Phase::Idle).await,
                        None => break,
                    },
                },
                Phase::Connecting(mut pending) => tokio::select! {
                    () = self.cancel.cancelled() => break,
                    cmd = self.commands.recv() => match cmd {
                        Some(cmd) => self.on_command(cmd, Phase::Connecting(pending)).await,
                        None => break,
                    },
                    opened = &mut pending => match opened {
                        Ok(link) => self.on_open(link).await,
                        Err(err) => {
                            warn!(%err, attempt = self.attempt, "connect failed");
                            self.on_failure()
                        }
                    },
                },
                Phase::Authenticating { mut link, deadline } => tokio::select! {
                    () = self.cancel.cancelled() => {
                        close_link(link).await;
                        break;
                    }
                    cmd = self.commands.recv() => match cmd {
                        Some(cmd) => {
                            self.on_command(cmd, Phase::Authenticating { link, deadline }).await
                        }
                        None => {
                            close_link(link).await;
                            break;
                        }
                    },
                    () = sleep_until(deadline) => {
                        warn!(timeout = ?self.config.handshake_timeout, "authentication timed out");
                        close_link(link).await;
                        self.on_failure()
                    }
                    frame = link.recv() => match frame {
                        Ok(Some(raw)) => match self.on_handshake_frame(&mut link, &raw).await {
                            Handshake::Pending => Phase::Authenticating { link, deadline },
                            Handshake::Accepted => {
                                self.attempt = 0;
                                self.transition(ConnectionState::Ready);
                                Phase::Ready(link)
                            }
                            Handshake::Rejected => {
                                close_link(link).await;
                                self.on_failure()
                            }
                        },
                        Ok(None) => {
                            info!("channel closed during authentication");
                            self.on_failure()
                        }
                        Err(err) => {
                            warn!(%err, "transport error during authentication");
                            self.on_failure()
                        }
                    },
                },
                Phase::Ready(mut link) => tokio::select! {
                    () = self.cancel.cancelled() => {
                        close_link(link).await;
                        break;
                    }
                    cmd = self.commands.recv() => match cmd {
                        Some(cmd) => self.on_command(cmd, Phase::Ready(link)).await,
                        None => {
                            close_link(link).await;
                            break;
                        }
                    },
                    frame = link.recv() => match frame {
                        Ok(Some(raw)) => match self.on_ready_frame(&mut link, &raw).await {
                            Ok(true) => Phase::Ready(link),
                            Ok(false) => {
                                close_link(link).await;
                                self.on_failure()
                            }
                            Err(err) => {
                                warn!(%err, "transport error while ready");
                                self.on_failure()
                            }
                        },
                        Ok(None) => {
                            info!("channel closed by server");
                            self.on_failure()
                        }
                        Err(err) => {
                            warn!(%err, "transport error while ready");
                            self.on_failure()
                        }
                    },
                },
                Phase::Reconnecting { until } => tokio::select! {
                    () = self.cancel.cancelled() => break,
                    cmd = self.commands.recv() => match cmd {
                        Some(cmd) => self.on_command(cmd, Phase::Reconnecting { until }).await,
                        None => break,
                    },
                    () = sleep_until(until) => self.begin_connect(),
                },
            };
        }

        if self.state.is_active() {
            self.credential = None;
            self.attempt = 0;
            self.transition(ConnectionState::Idle);
        }
        debug!("connection manager stopped");
    }

    async fn on_command(&mut self, cmd: Command, phase: Phase) -> Phase {
        match cmd {
            Command::SetCredential(None) => {
                if matches!(phase, Phase::Idle) && self.credential.is_none() {
                    return phase;
                }
                if let Some(link) = phase.into_link() {
                    close_link(link).await;
                }
                self.credential = None;
                self.attempt = 0;
                self.transition(ConnectionState::Idle);
                info!("credential cleared; channel torn down");
                Phase::Idle
            }
            Command::SetCredential(Some(token)) => {
                let unchanged = self.credential.as_deref() == Some(token.as_str());
                if unchanged && !matches!(phase, Phase::Idle) {
                    debug!(state = ?self.state, "credential unchanged; ignoring");
                    return phase;
                }
                if let Some(link) = phase.into_link() {
                    close_link(link).await;
                }
                self.credential = Some(token);
                self.attempt = 0;
                self.begin_connect()
            }
            Command::Publish(envelope) => match phase {
                Phase::Ready(mut link) => match send_envelope(&mut link, &envelope).await {
                    Ok(()) => {
                        debug!(topic = %envelope.kind, "published");
                        Phase::Ready(link)
                    }
                    Err(err) => {
                        warn!(%err, topic = %envelope.kind, "publish failed; channel lost");
                        self.on_failure()
                    }
                },
                other => {
                    debug!(topic = %envelope.kind, "publish dropped: channel not ready");
                    other
                }
            },
        }
    }

    fn begin_connect(&mut self) -> Phase {
        self.transition(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        Phase::Connecting(Box::pin(async move { connector.connect(&url).await }))
    }

    async fn on_open(&mut self, mut link: Box<dyn Link>) -> Phase {
        self.transition(ConnectionState::Open);

        let Some(token) = self.credential.clone() else {
            close_link(link).await;
            self.transition(ConnectionState::Idle);
            return Phase::Idle;
        };

        if let Err(err) = send_envelope(&mut link, &Envelope::authenticate(&token)).await {
            warn!(%err, "failed to present credential");
            return self.on_failure();
        }

        self.transition(ConnectionState::Authenticating);
        Phase::Authenticating {
            link,
            deadline: Instant::now() + self.config.handshake_timeout.min(MAX_WAIT),
        }
    }

    async fn on_handshake_frame(&self, link: &mut Box<dyn Link>, raw: &str) -> Handshake {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(%err, "skipping malformed frame during handshake");
                return Handshake::Pending;
            }
        };

        match envelope.kind.as_str() {
            control::AUTHENTICATED => {
                info!("channel authenticated");
                Handshake::Accepted
            }
            control::AUTH_FAILED => {
                warn!(reason = %envelope.reason(), "authentication rejected");
                self.registry.dispatch(control::ERROR, &envelope);
                Handshake::Rejected
            }
            control::ERROR => {
                self.registry.dispatch(control::ERROR, &envelope);
                Handshake::Pending
            }
            control::PING => {
                if let Err(err) = send_envelope(link, &Envelope::pong(&envelope)).await {
                    debug!(%err, "pong failed during handshake");
                }
                Handshake::Pending
            }
            other => {
                debug!(topic = other, "dropping message received before authentication");
                Handshake::Pending
            }
        }
    }

    /// Handle one frame on a ready channel.
    ///
    /// Returns `Ok(false)` when the server revoked the session and the
    /// channel must be re-established.
    async fn on_ready_frame(&self, link: &mut Box<dyn Link>, raw: &str) -> Result<bool> {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(%err, "skipping malformed frame");
                return Ok(true);
            }
        };

        match envelope.kind.as_str() {
            control::PING => send_envelope(link, &Envelope::pong(&envelope)).await?,
            control::ERROR => {
                warn!(reason = %envelope.reason(), "server reported an error");
                self.registry.dispatch(control::ERROR, &envelope);
            }
            control::AUTH_FAILED => {
                warn!(reason = %envelope.reason(), "credential rejected on a ready channel");
                self.registry.dispatch(control::ERROR, &envelope);
                return Ok(false);
            }
            control::AUTHENTICATED | control::AUTHENTICATE | control::PONG => {
                debug!(kind = %envelope.kind, "ignoring control message");
            }
            topic => {
                let delivered = self.registry.dispatch(topic, &envelope);
                debug!(topic, delivered, "dispatched");
            }
        }
        Ok(true)
    }

    /// Count a failed attempt and decide between backoff and fail-stop.
    fn on_failure(&mut self) -> Phase {
        if self.credential.is_none() {
            self.attempt = 0;
            self.transition(ConnectionState::Idle);
            return Phase::Idle;
        }

        self.attempt = self.attempt.saturating_add(1);
        if self.attempt > self.config.max_attempts {
            warn!(
                attempts = self.attempt - 1,
                "reconnect budget exhausted; waiting for a new credential"
            );
            self.credential = None;
            self.attempt = 0;
            self.transition(ConnectionState::Idle);
            return Phase::Idle;
        }

        let delay = self.config.base_delay.saturating_mul(self.attempt).min(MAX_WAIT);
        info!(attempt = self.attempt, ?delay, "scheduling reconnect");
        self.transition(ConnectionState::Reconnecting);
        Phase::Reconnecting {
            until: Instant::now() + delay,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            warn!(from = ?self.state, to = ?next, "unexpected connection transition");
        }
        self.state = next;
        let status = ChannelStatus {
            state: next,
            attempt: self.attempt,
        };
        self.status_tx.send_replace(status);
        // No receivers is fine.
        let _ = self.transitions.send(status);
        debug!(state = ?next, attempt = self.attempt, "connection state changed");
    }
}

async fn send_envelope(link: &mut Box<dyn Link>, envelope: &Envelope) -> Result<()> {
    let frame = envelope.to_json()?;
    link.send(frame).await
}

async fn close_link(mut link: Box<dyn Link>) {
    if timeout(CLOSE_GRACE, link.close()).await.is_err() {
        debug!("socket close timed out");
    }
}
