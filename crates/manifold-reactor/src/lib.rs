//! # manifold-reactor
//!
//! A multi-worker non-blocking I/O reactor. A main selector loop accepts
//! or connects channels and places each newly connected socket onto one of
//! N worker reactors; every worker runs its own select-dispatch-timeout
//! loop on a dedicated OS thread and owns its sessions outright.
//!
//! ```text
//!  caller / listener hooks
//!        │ enqueue_pending_session (round robin)
//!        ▼
//!  ┌─────────────────┐   MPSC queue + wakeup   ┌────────────────┐
//!  │ MultiWorkerReactor ├────────────────────▶ │ WorkerReactor 0 │──▶ sessions
//!  │  (main selector)   ├────────────────────▶ │ WorkerReactor 1 │──▶ sessions
//!  └─────────────────┘          ...            └────────────────┘
//! ```
//!
//! Sessions never hop threads after placement: all handler callbacks for a
//! session run on its worker's thread, serialized, which is what lets the
//! per-session state go unlocked. Shutdown is a three-phase state machine
//! (active, graceful drain, forced close) with every teardown error
//! recorded in an audit log.
//!
//! The reactor moves bytes for its callers and never interprets them;
//! protocol logic lives behind the [`EventHandler`] trait.

pub mod audit;
pub mod config;
pub mod handler;
pub mod multi;
pub mod pending;
pub mod request;
pub mod selector;
pub mod session;
mod sockopt;
pub mod worker;

pub use audit::{AuditLog, ExceptionEvent};
pub use config::ReactorConfig;
pub use handler::{EventHandler, EventHandlerFactory, ReactorExceptionHandler};
pub use multi::{
    DefaultThreadFactory, MultiWorkerReactor, NullHooks, ReactorHandle, ReactorHooks,
    ThreadFactory,
};
pub use pending::PendingSession;
pub use request::{RequestOutcome, SessionId, SessionRequest, SessionRequestCallback};
pub use selector::Selector;
pub use session::{IoSession, SessionStatus, ATTACHMENT_KEY};
pub use worker::{WorkerHandle, WorkerReactor};

pub use manifold_core::{ReactorError, ReactorResult, ReactorStatus};

// The readiness types that appear in the public API surface.
pub use mio::{event::Event, Events, Interest, Registry, Token};
