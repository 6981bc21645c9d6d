#![forbid(unsafe_code)]

//! `interview-link` keeps a candidate client's push channel alive and runs
//! timed interview sessions against the session backend.
//!
//! - [`connection`]: authenticated, self-healing duplex channel with topic
//!   fan-out.
//! - [`interview`]: ordered, per-question countdown state machine with
//!   idempotent answer submission and resume-after-reload.
//! - [`dispatch`]: the subscription registry both of them publish through.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod interview;
pub mod models;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

/// Boxed, sendable future returned by the crate's collaborator traits.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
