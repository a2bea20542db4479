//! Single-worker event loop
//!
//! One `WorkerReactor` owns one selector and a dense slab of sessions,
//! and runs the select-dispatch-timeout loop on a single OS thread:
//!
//! 1. Bounded select
//! 2. Exit at once on a hard stop
//! 3. On graceful drain, close every session and cancel the pending queue
//! 4. Dispatch readiness (read before write, timestamps reset first)
//! 5. Idle-timeout check over all sessions
//! 6. Reap closed sessions, firing `disconnected` exactly once each
//! 7. While active, drain the pending queue into new sessions
//! 8. Leave once stopping and empty
//!
//! The terminal step always force-releases whatever remains, so an error
//! thrown out of the loop still frees the channels. Cross-thread callers
//! steer the loop through a `WorkerHandle`: status flag plus selector
//! wakeup only, never direct slab access.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use mio::{Interest, Token, Waker};
use slab::Slab;

use manifold_core::{rdebug, rtrace, ReactorError, ReactorResult, ReactorStatus, StatusCell};

use crate::config::ReactorConfig;
use crate::handler::{
    new_exception_slot, EventHandler, EventHandlerFactory, ExceptionHandlerSlot,
    ReactorExceptionHandler,
};
use crate::pending::{PendingQueue, PendingSession};
use crate::request::SessionId;
use crate::selector::{Selector, WAKER_TOKEN};
use crate::session::{IoSession, SessionStatus, ATTACHMENT_KEY};

/// State shared between a worker loop and the handles steering it.
pub(crate) struct WorkerShared {
    index: usize,
    status: StatusCell,
    pending: PendingQueue,
    waker: Waker,
    lock: Mutex<()>,
    cond: Condvar,
}

impl WorkerShared {
    fn wake(&self) {
        // A failed wakeup only delays the loop by one select interval
        let _ = self.waker.wake();
    }

    fn mark_shut_down(&self) {
        self.status.advance(ReactorStatus::ShutDown);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }
}

/// Cloneable cross-thread control handle for one worker reactor.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    pub fn index(&self) -> usize {
        self.shared.index
    }

    pub fn status(&self) -> ReactorStatus {
        self.shared.status.load()
    }

    /// Hand a connected channel to this worker. Publishes to the pending
    /// queue, then wakes the selector; the worker registers the session on
    /// its next pass.
    pub fn enqueue(&self, pending: PendingSession) {
        self.shared.pending.push(pending);
        self.shared.wake();
    }

    /// Ask the worker to drain and stop. Idempotent; a no-op unless the
    /// worker is currently active.
    pub fn graceful_shutdown(&self) {
        if self
            .shared
            .status
            .advance_from(ReactorStatus::Active, ReactorStatus::ShuttingDown)
        {
            self.shared.wake();
        }
    }

    /// Demand an immediate stop. The flag is observed by the owner thread,
    /// which releases all channels in its terminal step; this call only
    /// raises the flag and wakes the selector.
    pub fn hard_shutdown(&self) {
        if self.shared.status.advance(ReactorStatus::ShutDown) {
            self.shared.wake();
        }
    }

    /// Block until the worker reports SHUT_DOWN or the timeout elapses;
    /// zero waits indefinitely. Returns true if shutdown was reached.
    pub fn await_shutdown(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        let mut guard = shared.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if timeout.is_zero() {
            while shared.status.load() != ReactorStatus::ShutDown {
                guard = shared
                    .cond
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            return true;
        }
        let deadline = Instant::now() + timeout;
        while shared.status.load() != ReactorStatus::ShutDown {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, _) = shared
                .cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = g;
        }
        true
    }
}

/// Readiness snapshot taken off the event buffer before dispatch, so the
/// buffer borrow does not outlive the loop body.
#[derive(Clone, Copy)]
struct ReadyEvent {
    token: usize,
    readable: bool,
    writable: bool,
}

pub struct WorkerReactor {
    shared: Arc<WorkerShared>,
    selector: Selector,
    sessions: Slab<IoSession>,
    /// Tokens awaiting reaping; populated only from the owner thread
    closed: VecDeque<usize>,
    ready: Vec<ReadyEvent>,
    expired: Vec<usize>,
    factory: Arc<dyn EventHandlerFactory>,
    exception_handler: ExceptionHandlerSlot,
    select_interval: Duration,
    so_timeout: Duration,
}

impl WorkerReactor {
    /// Standalone worker with its own exception handler slot.
    pub fn new(
        index: usize,
        factory: Arc<dyn EventHandlerFactory>,
        config: &ReactorConfig,
    ) -> ReactorResult<Self> {
        manifold_core::rlog::init();
        Self::with_exception_slot(index, factory, new_exception_slot(), config)
    }

    pub(crate) fn with_exception_slot(
        index: usize,
        factory: Arc<dyn EventHandlerFactory>,
        exception_handler: ExceptionHandlerSlot,
        config: &ReactorConfig,
    ) -> ReactorResult<Self> {
        let selector = Selector::new().map_err(ReactorError::selector)?;
        let waker = selector.new_waker().map_err(ReactorError::selector)?;
        let shared = Arc::new(WorkerShared {
            index,
            status: StatusCell::new(ReactorStatus::Inactive),
            pending: PendingQueue::new(),
            waker,
            lock: Mutex::new(()),
            cond: Condvar::new(),
        });
        Ok(WorkerReactor {
            shared,
            selector,
            sessions: Slab::new(),
            closed: VecDeque::new(),
            ready: Vec::with_capacity(256),
            expired: Vec::new(),
            factory,
            exception_handler,
            select_interval: config.select_interval,
            so_timeout: config.so_timeout,
        })
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Replace the exception handler consulted before an intake error is
    /// treated as fatal.
    pub fn set_exception_handler(&self, handler: Arc<dyn ReactorExceptionHandler>) {
        let mut slot = self
            .exception_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(handler);
    }

    /// Run the event loop until shutdown. Only selector failures and
    /// unhandled intake errors come back as `Err`; everything else is
    /// delivered to sessions or swallowed on the teardown path. All
    /// channels are released before this returns.
    pub fn execute(&mut self) -> ReactorResult<()> {
        self.shared.status.advance(ReactorStatus::Active);
        rdebug!("io-dispatch-{}: loop starting", self.shared.index);
        let result = self.event_loop();
        self.shutdown_cleanup();
        self.shared.mark_shut_down();
        rdebug!("io-dispatch-{}: loop stopped", self.shared.index);
        result
    }

    fn event_loop(&mut self) -> ReactorResult<()> {
        loop {
            let ready_count = self
                .selector
                .select(self.select_interval)
                .map_err(ReactorError::selector)?;

            let status = self.shared.status.load();
            if status == ReactorStatus::ShutDown {
                // Hard stop demanded from outside; cleanup happens in the
                // terminal step
                break;
            }
            if status == ReactorStatus::ShuttingDown {
                self.close_all_sessions();
                self.cancel_pending_sessions();
            }

            if ready_count > 0 {
                self.dispatch_events();
            }

            self.check_timeouts();
            self.reap_closed_sessions();

            if self.shared.status.load() == ReactorStatus::Active {
                if let Err(err) = self.intake_pending_sessions() {
                    if !self.error_handled(&err) {
                        return Err(err);
                    }
                }
            }

            if self.shared.status.load() > ReactorStatus::Active && self.sessions.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn error_handled(&self, err: &ReactorError) -> bool {
        let slot = self
            .exception_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(handler) => handler.handle(err),
            None => false,
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    fn dispatch_events(&mut self) {
        self.ready.clear();
        for event in self.selector.events().iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            self.ready.push(ReadyEvent {
                token: event.token().0,
                // A peer half-close surfaces as readable end-of-stream
                readable: event.is_readable() || event.is_read_closed(),
                writable: event.is_writable(),
            });
        }
        let now = Instant::now();
        for i in 0..self.ready.len() {
            let ReadyEvent {
                token,
                readable,
                writable,
            } = self.ready[i];
            if readable {
                if let Some(session) = self.sessions.get_mut(token) {
                    session.touch_read(now);
                }
                self.invoke(token, |handler, session| handler.input_ready(session));
            }
            if writable {
                if let Some(session) = self.sessions.get_mut(token) {
                    session.touch_write(now);
                }
                self.invoke(token, |handler, session| handler.output_ready(session));
            }
            self.finish_dispatch(token);
        }
    }

    /// Run one handler callback with the handler detached from its
    /// session. A callback error goes to the exception hook and shuts the
    /// session.
    fn invoke<F>(&mut self, token: usize, f: F)
    where
        F: FnOnce(&mut dyn EventHandler, &mut IoSession) -> io::Result<()>,
    {
        let Some(session) = self.sessions.get_mut(token) else {
            return;
        };
        let Some(mut handler) = session.take_handler() else {
            return;
        };
        if let Err(err) = f(handler.as_mut(), session) {
            rtrace!(
                "io-dispatch-{}: session {} error: {}",
                self.shared.index,
                token,
                err
            );
            handler.exception(session, &err);
            session.shutdown();
        }
        session.restore_handler(handler);
    }

    /// Post-callback bookkeeping: queue a closing session for reaping,
    /// otherwise push any interest change down to the selector.
    fn finish_dispatch(&mut self, token: usize) {
        let Some(session) = self.sessions.get_mut(token) else {
            return;
        };
        if session.status() != SessionStatus::Active {
            if session.mark_close_queued() {
                self.closed.push_back(token);
            }
            return;
        }
        if session.interest_changed() && session.apply_interest(self.selector.registry()).is_err()
        {
            // The registration vanished under us; same treatment as a
            // cancelled key mid-dispatch
            session.shutdown();
            if session.mark_close_queued() {
                self.closed.push_back(token);
            }
        }
    }

    // ── Timeouts ─────────────────────────────────────────────────────

    fn check_timeouts(&mut self) {
        let now = Instant::now();
        self.expired.clear();
        for (token, session) in self.sessions.iter() {
            let timeout = session.socket_timeout();
            if timeout.is_zero() || session.status() != SessionStatus::Active {
                continue;
            }
            if session.last_access_time() + timeout < now {
                self.expired.push(token);
            }
        }
        for i in 0..self.expired.len() {
            let token = self.expired[i];
            self.invoke(token, |handler, session| handler.timeout(session));
            self.finish_dispatch(token);
        }
    }

    // ── Session teardown ─────────────────────────────────────────────

    fn reap_closed_sessions(&mut self) {
        while let Some(token) = self.closed.pop_front() {
            let Some(mut session) = self.sessions.try_remove(token) else {
                continue;
            };
            session.deregister(self.selector.registry());
            session.mark_closed();
            if let Some(mut handler) = session.take_handler() {
                handler.disconnected(&mut session);
            }
            // Dropping the session closes its channel
        }
    }

    fn close_all_sessions(&mut self) {
        let tokens: Vec<usize> = self.sessions.iter().map(|(token, _)| token).collect();
        for token in tokens {
            if let Some(session) = self.sessions.get_mut(token) {
                session.close();
                if session.mark_close_queued() {
                    self.closed.push_back(token);
                }
            }
        }
    }

    fn cancel_pending_sessions(&mut self) {
        while let Some(pending) = self.shared.pending.pop() {
            if let Some(request) = pending.request {
                request.cancel();
            }
            // The socket drops here, closing the channel
        }
    }

    /// Terminal hard shutdown, always run on the owner thread: cancel
    /// whatever is still queued, release every channel, deliver the final
    /// `disconnected` round.
    fn shutdown_cleanup(&mut self) {
        self.shared.status.advance(ReactorStatus::ShutDown);
        self.cancel_pending_sessions();
        let tokens: Vec<usize> = self.sessions.iter().map(|(token, _)| token).collect();
        for token in tokens {
            if let Some(session) = self.sessions.get_mut(token) {
                session.shutdown();
                if session.mark_close_queued() {
                    self.closed.push_back(token);
                }
            }
        }
        self.reap_closed_sessions();
    }

    // ── Intake ───────────────────────────────────────────────────────

    /// Drain the pending queue into registered sessions. A closed-channel
    /// registration failure fails that request and ends the drain for this
    /// tick; any other failure is fatal unless the exception handler
    /// claims it.
    fn intake_pending_sessions(&mut self) -> ReactorResult<()> {
        while let Some(pending) = self.shared.pending.pop() {
            let PendingSession { socket, request } = pending;

            if let Err(err) = socket.set_nonblocking(true) {
                // The channel died before we ever saw it
                if let Some(request) = request {
                    request.failed(err);
                }
                return Ok(());
            }
            let mut channel = mio::net::TcpStream::from_std(socket);

            let entry = self.sessions.vacant_entry();
            let token = entry.key();
            match self
                .selector
                .registry()
                .register(&mut channel, Token(token), Interest::READABLE)
            {
                Ok(()) => {}
                Err(err) if is_closed_channel(&err) => {
                    if let Some(request) = request {
                        request.failed(err);
                    }
                    return Ok(());
                }
                Err(err) => return Err(ReactorError::registration(err)),
            }

            let mut session = IoSession::new(token, channel, self.so_timeout);
            let handler = match self.factory.create_handler(&mut session) {
                Ok(handler) => handler,
                Err(err) => {
                    if let Some(request) = &request {
                        request.failed(io::Error::new(err.kind(), err.to_string()));
                    }
                    session.deregister(self.selector.registry());
                    return Err(ReactorError::handler_factory(err));
                }
            };
            session.set_handler(handler);

            if let Some(request) = request {
                if let Some(attachment) = request.take_attachment() {
                    session.set_attribute(ATTACHMENT_KEY, attachment);
                }
                entry.insert(session);
                request.completed(SessionId {
                    worker: self.shared.index,
                    token,
                });
            } else {
                entry.insert(session);
            }

            self.invoke(token, |handler, session| handler.connected(session));
            self.finish_dispatch(token);
        }
        Ok(())
    }
}

/// Registration failures that mean the channel itself is already gone, as
/// opposed to the selector being broken.
fn is_closed_channel(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EBADF) | Some(libc::ENOTSOCK)
    ) || matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_closed_channel_classification() {
        assert!(is_closed_channel(&io::Error::from_raw_os_error(libc::EBADF)));
        assert!(is_closed_channel(&io::Error::from_raw_os_error(
            libc::ENOTSOCK
        )));
        assert!(is_closed_channel(&io::Error::new(
            io::ErrorKind::NotConnected,
            "gone"
        )));
        assert!(!is_closed_channel(&io::Error::new(
            io::ErrorKind::PermissionDenied,
            "sealed"
        )));
    }

    #[test]
    fn test_handle_status_before_execute() {
        struct NoFactory;
        impl crate::handler::EventHandlerFactory for NoFactory {
            fn create_handler(
                &self,
                _session: &mut IoSession,
            ) -> io::Result<Box<dyn EventHandler>> {
                Err(io::Error::new(io::ErrorKind::Other, "unused"))
            }
        }
        let config = ReactorConfig::from_env();
        let worker = WorkerReactor::new(0, Arc::new(NoFactory), &config).unwrap();
        let handle = worker.handle();
        assert_eq!(handle.status(), ReactorStatus::Inactive);
        assert_eq!(handle.index(), 0);
        // Hard shutdown before the loop ever ran is observable at once
        handle.hard_shutdown();
        assert!(handle.await_shutdown(Duration::from_millis(10)));
    }
}
