//! Shutdown state machine and failure escalation

mod common;

use std::io;
use std::net::TcpListener;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use manifold_reactor::{
    EventHandler, EventHandlerFactory, IoSession, MultiWorkerReactor, ReactorConfig,
    ReactorError, ReactorStatus, RequestOutcome, SessionRequest,
};

use common::*;

fn base_config(workers: usize) -> ReactorConfig {
    ReactorConfig::from_env()
        .io_thread_count(workers)
        .select_interval(Duration::from_millis(50))
        .shutdown_grace_period(Duration::from_millis(500))
}

#[test]
fn test_graceful_shutdown_delivers_in_flight_output() {
    let counters = Counters::new();
    let payload = vec![0xabu8; 10 * 1024];
    let reactor = MultiWorkerReactor::new(
        writer_factory(counters.clone(), payload.clone()),
        base_config(1),
    )
    .unwrap();
    let (handle, reactor_thread) = spawn_reactor(reactor);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let (mut client, server) = socket_pair(&listener);
    handle.enqueue_pending_session(server, None).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        counters.connected.load(Ordering::SeqCst) == 1
    }));
    handle.shutdown_within(Duration::from_millis(2000));

    assert_eq!(read_to_end_counting(&mut client), payload.len());
    assert_eq!(counters.disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(handle.status(), ReactorStatus::ShutDown);
    assert!(handle.audit_log().is_empty());
    reactor_thread.join().unwrap().unwrap();
}

#[test]
fn test_hard_shutdown_releases_stuck_session() {
    let counters = Counters::new();
    let config = base_config(1).shutdown_grace_period(Duration::from_millis(100));
    let reactor = MultiWorkerReactor::new(idle_factory(counters.clone()), config).unwrap();
    let (handle, reactor_thread) = spawn_reactor(reactor);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let (mut client, server) = socket_pair(&listener);
    handle.enqueue_pending_session(server, None).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        counters.connected.load(Ordering::SeqCst) == 1
    }));

    let start = Instant::now();
    handle.shutdown_within(Duration::from_millis(100));
    assert!(handle.await_shutdown(Duration::from_secs(2)));
    assert!(start.elapsed() < Duration::from_secs(2));

    // The channel was forcibly released: the peer sees end-of-stream
    assert_eq!(read_to_end_counting(&mut client), 0);
    assert_eq!(counters.disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(handle.status(), ReactorStatus::ShutDown);
    reactor_thread.join().unwrap().unwrap();
}

#[test]
fn test_factory_failure_fails_request_and_reactor() {
    let factory: Arc<dyn EventHandlerFactory> = Arc::new(|_session: &mut IoSession| {
        Err::<Box<dyn EventHandler>, io::Error>(io::Error::new(
            io::ErrorKind::Other,
            "refused to build a handler",
        ))
    });
    let reactor = MultiWorkerReactor::new(factory, base_config(1)).unwrap();
    let (handle, reactor_thread) = spawn_reactor(reactor);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let (_client, server) = socket_pair(&listener);
    let request = SessionRequest::new(listener.local_addr().unwrap());
    handle
        .enqueue_pending_session(server, Some(request.clone()))
        .unwrap();

    // The paired request fails right away
    assert!(matches!(
        request.wait_for(Duration::from_secs(5)),
        RequestOutcome::Failed(_)
    ));

    // The worker dies; the main loop spots it and brings everything down
    let err = reactor_thread.join().unwrap().unwrap_err();
    assert!(matches!(
        err,
        ReactorError::WorkerTerminated { worker: 0, .. }
    ));
    assert_eq!(handle.status(), ReactorStatus::ShutDown);

    // The audit log holds the root cause
    let audit = handle.audit_log();
    assert!(!audit.is_empty());
    assert!(audit.iter().any(|event| matches!(
        event.error().root_cause(),
        ReactorError::HandlerFactory(_)
    )));
}

#[test]
fn test_shutdown_is_idempotent() {
    let counters = Counters::new();
    let reactor =
        MultiWorkerReactor::new(idle_factory(counters.clone()), base_config(2)).unwrap();
    let (handle, reactor_thread) = spawn_reactor(reactor);

    assert!(wait_until(Duration::from_secs(5), || {
        handle.status() == ReactorStatus::Active
    }));
    handle.shutdown_within(Duration::from_secs(5));
    assert_eq!(handle.status(), ReactorStatus::ShutDown);

    // Again, from the terminal state: a no-op that returns at once
    let start = Instant::now();
    handle.shutdown_within(Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(handle.status(), ReactorStatus::ShutDown);

    reactor_thread.join().unwrap().unwrap();
    assert!(handle.audit_log().is_empty());
}

#[test]
fn test_shutdown_from_inactive_never_runs_the_loop() {
    let counters = Counters::new();
    let mut reactor =
        MultiWorkerReactor::new(idle_factory(counters.clone()), base_config(1)).unwrap();
    let handle = reactor.handle();
    assert_eq!(handle.status(), ReactorStatus::Inactive);

    handle.shutdown();
    assert_eq!(handle.status(), ReactorStatus::ShutDown);
    assert!(handle.await_shutdown(Duration::from_millis(10)));

    // A late execute on the shut-down reactor is a clean no-op
    reactor.execute().unwrap();
    assert_eq!(reactor.status(), ReactorStatus::ShutDown);
}

#[test]
fn test_enqueue_after_shutdown_cancels_request() {
    let counters = Counters::new();
    let reactor =
        MultiWorkerReactor::new(idle_factory(counters.clone()), base_config(1)).unwrap();
    let (handle, reactor_thread) = spawn_reactor(reactor);
    handle.shutdown_within(Duration::from_secs(5));
    reactor_thread.join().unwrap().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let (_client, server) = socket_pair(&listener);
    let request = SessionRequest::new(listener.local_addr().unwrap());
    let result = handle.enqueue_pending_session(server, Some(request.clone()));
    assert!(matches!(result, Err(ReactorError::Terminated)));
    assert!(matches!(request.outcome(), RequestOutcome::Cancelled));
}

#[test]
fn test_status_only_moves_forward() {
    let counters = Counters::new();
    let reactor =
        MultiWorkerReactor::new(idle_factory(counters.clone()), base_config(1)).unwrap();
    let handle = reactor.handle();
    assert_eq!(handle.status(), ReactorStatus::Inactive);

    let (handle, reactor_thread) = spawn_reactor(reactor);
    assert!(wait_until(Duration::from_secs(5), || {
        handle.status() == ReactorStatus::Active
    }));

    handle.shutdown_within(Duration::from_secs(5));
    assert_eq!(handle.status(), ReactorStatus::ShutDown);
    reactor_thread.join().unwrap().unwrap();

    // Terminal is sticky
    handle.shutdown();
    assert_eq!(handle.status(), ReactorStatus::ShutDown);
}
