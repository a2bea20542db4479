//! One-shot session request handle
//!
//! A `SessionRequest` rides along with a channel into the pending queue
//! and settles exactly once: completed with the placed session's identity,
//! failed with the error that prevented placement, or cancelled by
//! shutdown. Settlement is first-caller-wins; later signals are no-ops.

use std::any::Any;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Identity of a placed session: which worker owns it and its slab token
/// there. Sessions are confined to their worker thread, so cross-thread
/// observers get this identity rather than the session itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId {
    pub worker: usize,
    pub token: usize,
}

/// Terminal state of a request, or `Pending` while in flight.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Pending,
    Completed(SessionId),
    Failed(Arc<io::Error>),
    Cancelled,
}

impl RequestOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, RequestOutcome::Pending)
    }
}

/// Completion callbacks, invoked on the thread that settles the request.
pub trait SessionRequestCallback: Send + Sync {
    fn completed(&self, request: &SessionRequest) {
        let _ = request;
    }
    fn failed(&self, request: &SessionRequest) {
        let _ = request;
    }
    fn cancelled(&self, request: &SessionRequest) {
        let _ = request;
    }
}

struct RequestInner {
    remote: SocketAddr,
    attachment: Mutex<Option<Box<dyn Any + Send>>>,
    state: Mutex<RequestOutcome>,
    cond: Condvar,
    callback: Option<Box<dyn SessionRequestCallback>>,
}

/// Future-like handle for an outbound connect. Cloneable; all clones
/// observe the same settlement.
#[derive(Clone)]
pub struct SessionRequest {
    inner: Arc<RequestInner>,
}

impl SessionRequest {
    pub fn new(remote: SocketAddr) -> Self {
        Self::build(remote, None)
    }

    pub fn with_callback(remote: SocketAddr, callback: Box<dyn SessionRequestCallback>) -> Self {
        Self::build(remote, Some(callback))
    }

    fn build(remote: SocketAddr, callback: Option<Box<dyn SessionRequestCallback>>) -> Self {
        SessionRequest {
            inner: Arc::new(RequestInner {
                remote,
                attachment: Mutex::new(None),
                state: Mutex::new(RequestOutcome::Pending),
                cond: Condvar::new(),
                callback,
            }),
        }
    }

    /// The endpoint this request targets.
    pub fn remote(&self) -> SocketAddr {
        self.inner.remote
    }

    /// Attach an opaque value; it transfers into the session's attribute
    /// map (under [`ATTACHMENT_KEY`]) when the session is registered.
    ///
    /// [`ATTACHMENT_KEY`]: crate::session::ATTACHMENT_KEY
    pub fn attach(&self, value: Box<dyn Any + Send>) {
        let mut slot = self
            .inner
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(value);
    }

    pub(crate) fn take_attachment(&self) -> Option<Box<dyn Any + Send>> {
        self.inner
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn outcome(&self) -> RequestOutcome {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Signal successful placement. Returns false if already settled.
    pub fn completed(&self, session: SessionId) -> bool {
        if !self.settle(RequestOutcome::Completed(session)) {
            return false;
        }
        if let Some(cb) = &self.inner.callback {
            cb.completed(self);
        }
        true
    }

    /// Signal failure. Returns false if already settled.
    pub fn failed(&self, err: io::Error) -> bool {
        if !self.settle(RequestOutcome::Failed(Arc::new(err))) {
            return false;
        }
        if let Some(cb) = &self.inner.callback {
            cb.failed(self);
        }
        true
    }

    /// Signal cancellation. Returns false if already settled.
    pub fn cancel(&self) -> bool {
        if !self.settle(RequestOutcome::Cancelled) {
            return false;
        }
        if let Some(cb) = &self.inner.callback {
            cb.cancelled(self);
        }
        true
    }

    fn settle(&self, outcome: RequestOutcome) -> bool {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !state.is_pending() {
            return false;
        }
        *state = outcome;
        self.inner.cond.notify_all();
        true
    }

    /// Block until the request settles or the timeout elapses; zero waits
    /// indefinitely. Returns the outcome at that point, `Pending` on a
    /// timeout.
    pub fn wait_for(&self, timeout: Duration) -> RequestOutcome {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if timeout.is_zero() {
            while state.is_pending() {
                state = self
                    .inner
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        } else {
            let deadline = Instant::now() + timeout;
            while state.is_pending() {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, _) = self
                    .inner
                    .cond
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
            }
        }
        state.clone()
    }
}

impl fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRequest")
            .field("remote", &self.inner.remote)
            .field("outcome", &self.outcome())
            .finish()
    }
}
