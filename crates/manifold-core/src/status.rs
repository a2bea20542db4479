//! Reactor lifecycle status
//!
//! Every reactor (the main reactor and each worker) carries one
//! `StatusCell`. The status ordering is total and transitions only move
//! forward; `SHUT_DOWN` is terminal. Readers outside the owning loop may
//! observe a value that lags a transition by one select tick.

use core::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle phase of a reactor, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReactorStatus {
    /// Constructed, event loop not yet running
    Inactive = 0,

    /// Event loop running, accepting new sessions
    Active = 1,

    /// Controlled teardown requested, loop has not observed it yet
    ShutdownRequest = 2,

    /// Teardown in progress: draining sessions, no new intake
    ShuttingDown = 3,

    /// Terminal. All channels released, loop exited
    ShutDown = 4,
}

impl ReactorStatus {
    /// True once the reactor has left its active phase for good.
    #[inline]
    pub const fn shutdown_started(&self) -> bool {
        (*self as u8) > ReactorStatus::Active as u8
    }

    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, ReactorStatus::ShutDown)
    }
}

impl From<u8> for ReactorStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => ReactorStatus::Inactive,
            1 => ReactorStatus::Active,
            2 => ReactorStatus::ShutdownRequest,
            3 => ReactorStatus::ShuttingDown,
            _ => ReactorStatus::ShutDown,
        }
    }
}

impl fmt::Display for ReactorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReactorStatus::Inactive => "INACTIVE",
            ReactorStatus::Active => "ACTIVE",
            ReactorStatus::ShutdownRequest => "SHUTDOWN_REQUEST",
            ReactorStatus::ShuttingDown => "SHUTTING_DOWN",
            ReactorStatus::ShutDown => "SHUT_DOWN",
        };
        f.write_str(name)
    }
}

/// Atomic holder for a `ReactorStatus` with forward-only transitions.
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub const fn new(initial: ReactorStatus) -> Self {
        StatusCell(AtomicU8::new(initial as u8))
    }

    #[inline]
    pub fn load(&self) -> ReactorStatus {
        ReactorStatus::from(self.0.load(Ordering::Acquire))
    }

    /// Advances the status to `target` if it is currently behind it.
    ///
    /// Returns true if this call performed the transition. A status never
    /// moves backward; racing callers settle on the furthest state.
    pub fn advance(&self, target: ReactorStatus) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current >= target as u8 {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Performs the `from` -> `to` transition only if the status is exactly
    /// `from`. Used where a transition is legal from a single state, e.g.
    /// graceful shutdown of a worker that must already be active.
    pub fn advance_from(&self, from: ReactorStatus, to: ReactorStatus) -> bool {
        debug_assert!((from as u8) < (to as u8));
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for StatusCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StatusCell").field(&self.load()).finish()
    }
}
