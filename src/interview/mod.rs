//! Timed interview engine.
//!
//! | Module | Role |
//! |--------|------|
//! | [`clock`] | Per-question countdown |
//! | [`store`] | Session persistence seam and REST implementation |
//! | [`session`] | Ordered question state machine |
//! | [`runner`] | Background task feeding the state machine ticks and commands |

pub mod clock;
pub mod runner;
pub mod session;
pub mod store;

pub use runner::{SessionRunner, SessionRunnerHandle, SessionView};
pub use session::{
    AdvanceFlow, ExpiryOutcome, IgnoreReason, SessionEvent, SessionState, SubmitOutcome,
    TickOutcome, TimedInteractionSession,
};
pub use store::{HttpSessionStore, SessionStore};
