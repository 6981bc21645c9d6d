#![forbid(unsafe_code)]

//! `interview-link`: push channel watcher and terminal interview client.
//!
//! `watch` keeps an authenticated push channel open and logs every message
//! on the requested topics. `interview` resumes a timed interview session
//! and drives it from standard input.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use interview_link::config::GlobalConfig;
use interview_link::connection::{ConnectionManager, ManagerConfig};
use interview_link::interview::session::topics;
use interview_link::interview::{
    HttpSessionStore, SessionEvent, SessionRunner, SessionRunnerHandle, SessionState,
    SubmitOutcome, TimedInteractionSession,
};
use interview_link::models::envelope::control;
use interview_link::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "interview-link", about = "Push channel and timed interview client", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Keep the push channel open and log messages on the given topics.
    Watch {
        /// Topic to subscribe to; repeatable.
        #[arg(long = "topic", required = true)]
        topics: Vec<String>,
    },
    /// Resume an interview session and answer from standard input.
    ///
    /// Type an answer line by line. `:start` starts the countdown,
    /// `:submit` sends the composed answer, `:clear` discards it.
    Interview {
        /// Session identifier.
        #[arg(long)]
        session: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_credentials().await?;
    info!("configuration loaded");

    match args.command {
        Command::Watch { topics } => watch(&config, topics).await,
        Command::Interview { session } => interview(&config, session).await,
    }
}

async fn watch(config: &GlobalConfig, topics: Vec<String>) -> Result<()> {
    let manager = ConnectionManager::websocket(ManagerConfig::from(&config.connection));

    let mut subscriptions = Vec::with_capacity(topics.len() + 1);
    for topic in topics {
        subscriptions.push(manager.subscribe(topic, |envelope| {
            info!(
                topic = %envelope.kind,
                message_id = envelope.message_id.as_deref().unwrap_or_default(),
                data = %envelope.data,
                "message"
            );
        }));
    }
    subscriptions.push(manager.subscribe(control::ERROR, |envelope| {
        warn!(reason = %envelope.reason(), "server reported an error");
    }));

    let mut transitions = manager.transitions();
    let status_log = tokio::spawn(async move {
        while let Ok(status) = transitions.recv().await {
            info!(state = ?status.state, attempt = status.attempt, "channel transition");
        }
    });

    manager.set_credential(Some(config.connection.token.clone()));
    info!(url = %config.connection.url, "push channel watcher started");

    shutdown_signal().await;
    info!("shutdown signal received");

    drop(subscriptions);
    manager.shutdown().await;
    status_log.abort();
    info!("interview-link shut down");
    Ok(())
}

async fn interview(config: &GlobalConfig, session_id: String) -> Result<()> {
    let store = Arc::new(HttpSessionStore::new(
        &config.interview.api_base_url,
        Some(config.connection.token.clone()),
    )?);
    let session =
        TimedInteractionSession::hydrate(store, session_id, config.interview.flow).await?;
    if session.is_complete() {
        info!(session_id = session.session_id(), "session already complete");
        return Ok(());
    }

    let ct = CancellationToken::new();
    let runner = SessionRunner::new(session, config.interview.tick_interval(), ct.clone()).spawn();

    let done = Arc::new(tokio::sync::Notify::new());
    let done_signal = Arc::clone(&done);
    let _state_sub = runner.subscribe(topics::STATE, move |event| {
        if let SessionEvent::StateChanged(state) = event {
            info!(?state, "session state");
            if *state == SessionState::Complete {
                done_signal.notify_one();
            }
        }
    });
    let _clock_sub = runner.subscribe(topics::CLOCK, |event| {
        if let SessionEvent::Tick { remaining, .. } = event {
            if *remaining <= 10 {
                info!(remaining, "time left");
            }
        }
    });
    let (advanced_tx, mut advanced) = tokio::sync::mpsc::unbounded_channel();
    let _submission_sub = runner.subscribe(topics::SUBMISSION, move |event| match event {
        SessionEvent::Recorded { question_id } => {
            info!(%question_id, "answer recorded");
            let _ = advanced_tx.send(());
        }
        SessionEvent::Lapsed { question_id } => {
            warn!(%question_id, "time ran out");
            let _ = advanced_tx.send(());
        }
        SessionEvent::SubmitFailed { question_id, error } => {
            error!(%question_id, %error, "answer not saved, try again");
        }
        _ => {}
    });

    announce(&runner).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            () = done.notified() => {
                info!("all questions resolved");
                break;
            }
            Some(()) = advanced.recv() => announce(&runner).await?,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                handle_line(&runner, &line).await?;
            }
        }
    }

    ct.cancel();
    let _ = runner.stop().await;
    Ok(())
}

/// Apply one line of terminal input to the running session.
///
/// The answer buffer lives in the session, so text typed after a question
/// times out starts the next answer afresh.
async fn handle_line(runner: &SessionRunnerHandle, line: &str) -> Result<()> {
    match line.trim() {
        ":start" => {
            if !runner.start().await? {
                warn!("countdown already running or not available");
            }
        }
        ":clear" => runner.set_draft("").await?,
        ":submit" => {
            let view = runner.view().await?;
            let Some(question) = view.current else {
                return Ok(());
            };
            match runner.submit(question.id, view.draft).await {
                Ok(SubmitOutcome::Recorded { .. }) => {}
                Ok(SubmitOutcome::Ignored(reason)) => warn!(?reason, "submission ignored"),
                Err(err) => error!(%err, "submission failed"),
            }
        }
        _ => runner.append_draft(line).await?,
    }
    Ok(())
}

async fn announce(runner: &SessionRunnerHandle) -> Result<()> {
    if let Some(question) = runner.view().await?.current {
        info!(question_id = %question.id, budget = question.time_budget, "{}", question.text);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
