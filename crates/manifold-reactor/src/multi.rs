//! Multi-worker reactor
//!
//! Runs the main selector loop on the calling thread and N worker
//! reactors on their own threads. New channels are distributed round
//! robin across the workers; accept/connect specializations plug in
//! through [`ReactorHooks`] rather than subclassing. Shutdown is a
//! monotonic state machine; every error met during teardown lands in the
//! audit log together with the failure that started it.

use std::io;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mio::{Events, Registry, Waker};

use manifold_core::{rdebug, rinfo, rwarn, ReactorError, ReactorResult, ReactorStatus, StatusCell};

use crate::audit::{AuditLog, ExceptionEvent};
use crate::config::ReactorConfig;
use crate::handler::{
    new_exception_slot, EventHandlerFactory, ExceptionHandlerSlot, ReactorExceptionHandler,
};
use crate::pending::PendingSession;
use crate::request::SessionRequest;
use crate::selector::Selector;
use crate::sockopt::prepare_socket;
use crate::worker::{WorkerHandle, WorkerReactor};

/// Default wait for [`ReactorHandle::shutdown`].
const DEFAULT_SHUTDOWN_WAIT: Duration = Duration::from_millis(2000);

/// Accept/connect specialization of the main selector loop.
///
/// The hooks own whatever channels they register (listeners, in-flight
/// connects); the reactor never enumerates them, so [`close_channels`]
/// is where they must be released during shutdown.
///
/// [`close_channels`]: ReactorHooks::close_channels
pub trait ReactorHooks: Send {
    /// The main selector is live; register listening or connecting
    /// channels against `registry`.
    fn activate(&mut self, registry: &Registry) -> io::Result<()> {
        let _ = registry;
        Ok(())
    }

    /// One main-selector tick. Runs on every pass while the reactor is
    /// active, whether or not any event fired. An error is fatal to the
    /// reactor.
    fn process_events(&mut self, events: &Events, reactor: &ReactorHandle) -> io::Result<()> {
        let _ = (events, reactor);
        Ok(())
    }

    /// Cancel outstanding session requests during shutdown.
    fn cancel_requests(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Release the channels this hook owns.
    fn close_channels(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hooks for a reactor that is fed sessions directly through
/// [`ReactorHandle::enqueue_pending_session`].
pub struct NullHooks;

impl ReactorHooks for NullHooks {}

/// Spawns named reactor threads. Lets embedders impose their own naming
/// or pooling policy.
pub trait ThreadFactory: Send + Sync {
    fn spawn(
        &self,
        name: String,
        body: Box<dyn FnOnce() + Send>,
    ) -> io::Result<JoinHandle<()>>;
}

pub struct DefaultThreadFactory;

impl ThreadFactory for DefaultThreadFactory {
    fn spawn(
        &self,
        name: String,
        body: Box<dyn FnOnce() + Send>,
    ) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new().name(name).spawn(body)
    }
}

/// State shared between the main loop and every `ReactorHandle`.
struct ReactorShared {
    status: StatusCell,
    lock: Mutex<()>,
    cond: Condvar,
    workers: Vec<WorkerHandle>,
    /// Error captured from a worker thread; any entry is fatal
    faults: Vec<Mutex<Option<ReactorError>>>,
    /// Round-robin placement counter; wraparound is tolerated
    placement: AtomicI64,
    audit: AuditLog,
    waker: Waker,
    hooks: Mutex<Box<dyn ReactorHooks>>,
    exception_handler: ExceptionHandlerSlot,
    config: ReactorConfig,
}

impl ReactorShared {
    fn notify_waiters(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }
}

/// Cloneable cross-thread surface of a [`MultiWorkerReactor`]: session
/// placement, shutdown, status and audit reads.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<ReactorShared>,
}

impl ReactorHandle {
    pub fn status(&self) -> ReactorStatus {
        self.shared.status.load()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// Snapshot of the audit log.
    pub fn audit_log(&self) -> Vec<ExceptionEvent> {
        self.shared.audit.snapshot()
    }

    /// Replace the hook consulted by workers before an internal error is
    /// treated as fatal. Set this before `execute`.
    pub fn set_exception_handler(&self, handler: Arc<dyn ReactorExceptionHandler>) {
        let mut slot = self
            .shared
            .exception_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(handler);
    }

    /// Apply the configured socket options to a connected channel and
    /// place it on a worker, round robin. The optional request settles
    /// exactly once: completed by the worker after registration, failed
    /// here on a socket-option error, or cancelled if the reactor is
    /// already past its active phase.
    pub fn enqueue_pending_session(
        &self,
        socket: std::net::TcpStream,
        request: Option<SessionRequest>,
    ) -> ReactorResult<()> {
        if self.shared.status.load() > ReactorStatus::Active {
            if let Some(request) = request {
                request.cancel();
            }
            return Err(ReactorError::Terminated);
        }
        if let Err(err) = prepare_socket(&socket, &self.shared.config) {
            if let Some(request) = &request {
                request.failed(io::Error::new(err.kind(), err.to_string()));
            }
            return Err(ReactorError::io(err));
        }
        let slot = self.shared.placement.fetch_add(1, Ordering::Relaxed);
        let index = placement_index(slot, self.shared.workers.len());
        self.shared.workers[index].enqueue(PendingSession::new(socket, request));
        Ok(())
    }

    /// Controlled teardown with the default wait.
    pub fn shutdown(&self) {
        self.shutdown_within(DEFAULT_SHUTDOWN_WAIT)
    }

    /// Controlled teardown. Past-active calls are no-ops. From INACTIVE
    /// the reactor jumps straight to SHUT_DOWN without a loop ever having
    /// run; otherwise this requests shutdown, wakes the main selector and
    /// waits up to `wait` for the loop to finish the job.
    pub fn shutdown_within(&self, wait: Duration) {
        {
            let _guard = self
                .shared
                .lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let status = self.shared.status.load();
            if status > ReactorStatus::Active {
                return;
            }
            if status == ReactorStatus::Inactive {
                self.shared.status.advance(ReactorStatus::ShutDown);
                let mut hooks = self
                    .shared
                    .hooks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Err(err) = hooks.cancel_requests() {
                    self.shared.audit.record(ReactorError::io(err));
                }
                self.shared.cond.notify_all();
                return;
            }
            self.shared.status.advance(ReactorStatus::ShutdownRequest);
        }
        let _ = self.shared.waker.wake();
        self.await_shutdown(wait);
    }

    /// Block until the reactor reports SHUT_DOWN or the timeout elapses;
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

/// Round-robin worker index from a monotonic counter value. The absolute
/// value runs first so a wrapped counter still lands in range.
fn placement_index(counter: i64, worker_count: usize) -> usize {
    (counter.unsigned_abs() % worker_count as u64) as usize
}

pub struct MultiWorkerReactor {
    shared: Arc<ReactorShared>,
    selector: Selector,
    /// Worker loop cores, moved onto their threads at execute time
    workers: Vec<Option<WorkerReactor>>,
    threads: Vec<Option<JoinHandle<()>>>,
    thread_factory: Arc<dyn ThreadFactory>,
}

impl MultiWorkerReactor {
    /// Reactor with no accept/connect hooks; sessions arrive through
    /// [`ReactorHandle::enqueue_pending_session`].
    pub fn new(
        factory: Arc<dyn EventHandlerFactory>,
        config: ReactorConfig,
    ) -> ReactorResult<Self> {
        Self::with_hooks(
            factory,
            config,
            Box::new(NullHooks),
            Arc::new(DefaultThreadFactory),
        )
    }

    pub fn with_hooks(
        factory: Arc<dyn EventHandlerFactory>,
        config: ReactorConfig,
        hooks: Box<dyn ReactorHooks>,
        thread_factory: Arc<dyn ThreadFactory>,
    ) -> ReactorResult<Self> {
        manifold_core::rlog::init();
        let selector = Selector::new().map_err(ReactorError::selector)?;
        let waker = selector.new_waker().map_err(ReactorError::selector)?;
        let worker_count = config.io_thread_count.max(1);
        let exception_handler = new_exception_slot();

        let mut cores = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        let mut faults = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let core = WorkerReactor::with_exception_slot(
                index,
                factory.clone(),
                exception_handler.clone(),
                &config,
            )?;
            handles.push(core.handle());
            faults.push(Mutex::new(None));
            cores.push(Some(core));
        }

        let shared = Arc::new(ReactorShared {
            status: StatusCell::new(ReactorStatus::Inactive),
            lock: Mutex::new(()),
            cond: Condvar::new(),
            workers: handles,
            faults,
            placement: AtomicI64::new(0),
            audit: AuditLog::new(),
            waker,
            hooks: Mutex::new(hooks),
            exception_handler,
            config,
        });

        Ok(MultiWorkerReactor {
            shared,
            selector,
            workers: cores,
            threads: Vec::with_capacity(worker_count),
            thread_factory,
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn status(&self) -> ReactorStatus {
        self.shared.status.load()
    }

    pub fn audit_log(&self) -> Vec<ExceptionEvent> {
        self.shared.audit.snapshot()
    }

    pub fn set_exception_handler(&self, handler: Arc<dyn ReactorExceptionHandler>) {
        self.handle().set_exception_handler(handler)
    }

    /// See [`ReactorHandle::shutdown`].
    pub fn shutdown(&self) {
        self.handle().shutdown()
    }

    /// See [`ReactorHandle::shutdown_within`].
    pub fn shutdown_within(&self, wait: Duration) {
        self.handle().shutdown_within(wait)
    }

    /// Run the reactor on the calling thread until shutdown.
    ///
    /// Starts the worker pool, then drives the main selector: hook events
    /// while active, worker fault checks every tick, exit once the status
    /// leaves ACTIVE. The terminal step always performs the orderly
    /// teardown of [`Self::do_shutdown`] before SHUT_DOWN is signalled.
    pub fn execute(&mut self) -> ReactorResult<()> {
        {
            let _guard = self
                .shared
                .lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let status = self.shared.status.load();
            if status >= ReactorStatus::ShutdownRequest {
                // Shutdown won the race before the loop ever started
                self.shared.status.advance(ReactorStatus::ShutDown);
                self.shared.cond.notify_all();
                return Ok(());
            }
            if status != ReactorStatus::Inactive {
                return Err(ReactorError::IllegalState(status));
            }
            self.shared.status.advance(ReactorStatus::Active);
        }

        let result = self.run_main();
        if let Err(err) = &result {
            self.shared.audit.record(err.clone());
        }
        let shutdown_result = self.do_shutdown();
        self.shared.status.advance(ReactorStatus::ShutDown);
        self.shared.notify_waiters();
        result.and(shutdown_result)
    }

    fn run_main(&mut self) -> ReactorResult<()> {
        rinfo!(
            "reactor: starting {} I/O dispatch workers",
            self.workers.len()
        );
        for index in 0..self.workers.len() {
            if self.shared.status.load() != ReactorStatus::Active {
                return Ok(());
            }
            let Some(mut core) = self.workers[index].take() else {
                continue;
            };
            let shared = self.shared.clone();
            let worker = core.handle();
            let body = Box::new(move || {
                let sentinel = PanicSentinel {
                    shared: shared.clone(),
                    worker,
                    index,
                    armed: true,
                };
                let result = core.execute();
                sentinel.disarm();
                if let Err(err) = result {
                    let mut slot = shared.faults[index]
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    *slot = Some(err);
                }
            });
            let thread = self
                .thread_factory
                .spawn(format!("io-dispatch-{}", index), body)
                .map_err(ReactorError::io)?;
            self.threads.push(Some(thread));
        }

        {
            let mut hooks = self
                .shared
                .hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            hooks
                .activate(self.selector.registry())
                .map_err(ReactorError::io)?;
        }

        let handle = self.handle();
        let select_interval = self.shared.config.select_interval;
        loop {
            if let Err(err) = self.selector.select(select_interval) {
                return Err(ReactorError::selector(err));
            }

            if self.shared.status.load() == ReactorStatus::Active {
                let mut hooks = self
                    .shared
                    .hooks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                hooks
                    .process_events(self.selector.events(), &handle)
                    .map_err(ReactorError::io)?;
            }

            for index in 0..self.shared.workers.len() {
                let fault = self.shared.faults[index]
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(cause) = fault {
                    rwarn!("reactor: worker {} terminated abnormally: {}", index, cause);
                    return Err(ReactorError::WorkerTerminated {
                        worker: index,
                        cause: Box::new(cause),
                    });
                }
            }

            if self.shared.status.load() > ReactorStatus::Active {
                return Ok(());
            }
        }
    }

    /// Orderly teardown, run once: cancel hook requests, release hook
    /// channels, shut workers down gracefully, force the stragglers after
    /// the grace period, collect the threads. Errors along the way are
    /// audited, never propagated, except an abnormal thread exit.
    fn do_shutdown(&mut self) -> ReactorResult<()> {
        {
            let _guard = self
                .shared
                .lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.shared.status.load() >= ReactorStatus::ShuttingDown {
                return Ok(());
            }
            self.shared.status.advance(ReactorStatus::ShuttingDown);
        }
        rdebug!("reactor: orderly shutdown starting");

        {
            let mut hooks = self
                .shared
                .hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = hooks.cancel_requests() {
                self.shared.audit.record(ReactorError::io(err));
            }
            let _ = self.shared.waker.wake();
            if let Err(err) = hooks.close_channels() {
                self.shared.audit.record(ReactorError::io(err));
            }
        }

        for worker in &self.shared.workers {
            worker.graceful_shutdown();
        }

        let grace = self.shared.config.shutdown_grace_period;
        for worker in &self.shared.workers {
            if worker.status() != ReactorStatus::Inactive {
                worker.await_shutdown(grace);
            }
            if worker.status() != ReactorStatus::ShutDown {
                worker.hard_shutdown();
            }
        }

        let mut result = Ok(());
        for index in 0..self.threads.len() {
            let Some(thread) = self.threads[index].take() else {
                continue;
            };
            if self.shared.workers[index].await_shutdown(grace) {
                if thread.join().is_err() {
                    let err = ReactorError::WorkerPanic { worker: index };
                    self.shared.audit.record(err.clone());
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            } else {
                // The worker never signalled; abandon its thread rather
                // than block shutdown forever
                self.shared
                    .audit
                    .record(ReactorError::JoinTimeout { worker: index });
            }
        }
        rdebug!("reactor: orderly shutdown finished");
        result
    }
}

/// Captures a worker thread that unwinds out of its loop. A panicking
/// handler must still surface as a worker fault, and the worker's status
/// must still reach SHUT_DOWN for the joiners.
struct PanicSentinel {
    shared: Arc<ReactorShared>,
    worker: WorkerHandle,
    index: usize,
    armed: bool,
}

impl PanicSentinel {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PanicSentinel {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.shared.faults[self.index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(ReactorError::WorkerPanic { worker: self.index });
        }
        self.worker.hard_shutdown();
    }
}

impl Drop for MultiWorkerReactor {
    fn drop(&mut self) {
        // Harmless after execute; releases hook requests if the loop
        // never ran
        self.handle().shutdown_within(DEFAULT_SHUTDOWN_WAIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_index_covers_all_workers() {
        let mut counts = [0usize; 4];
        for counter in 0..400 {
            counts[placement_index(counter, 4)] += 1;
        }
        assert_eq!(counts, [100, 100, 100, 100]);
    }

    #[test]
    fn test_placement_index_tolerates_wraparound() {
        // A wrapped counter goes negative; the index must stay in range
        for counter in [i64::MAX, i64::MIN, -1, -17] {
            let index = placement_index(counter, 4);
            assert!(index < 4);
        }
        assert_eq!(placement_index(-1, 4), 1);
        assert_eq!(placement_index(i64::MIN, 1), 0);
    }
}
