//! Echo server on the manifold reactor
//!
//! A listening socket registered with the main selector; accepted
//! connections are distributed across the worker pool and echoed back.
//!
//! Usage:
//!     manifold-echo [port]
//!
//! Test with:
//!     printf 'hello' | nc 127.0.0.1 7878

use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Registry, Token};

use manifold_core::rinfo;
use manifold_reactor::{
    DefaultThreadFactory, EventHandler, EventHandlerFactory, IoSession, MultiWorkerReactor,
    ReactorConfig, ReactorHandle, ReactorHooks,
};

const LISTENER: Token = Token(0);

struct Stats {
    accepts: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    active: AtomicU64,
    errors: AtomicU64,
}

impl Stats {
    fn new() -> Self {
        Stats {
            accepts: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            active: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

struct AcceptHooks {
    listener: Option<TcpListener>,
    stats: Arc<Stats>,
}

impl ReactorHooks for AcceptHooks {
    fn activate(&mut self, registry: &Registry) -> io::Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "listener already closed"))?;
        listener.set_nonblocking(true)?;
        registry.register(
            &mut SourceFd(&listener.as_raw_fd()),
            LISTENER,
            Interest::READABLE,
        )
    }

    fn process_events(&mut self, events: &Events, reactor: &ReactorHandle) -> io::Result<()> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(());
        };
        for event in events.iter() {
            if event.token() != LISTENER {
                continue;
            }
            loop {
                match listener.accept() {
                    Ok((socket, _peer)) => {
                        self.stats.accepts.fetch_add(1, Ordering::Relaxed);
                        if reactor.enqueue_pending_session(socket, None).is_err() {
                            return Ok(());
                        }
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    fn close_channels(&mut self) -> io::Result<()> {
        drop(self.listener.take());
        Ok(())
    }
}

struct EchoHandler {
    stats: Arc<Stats>,
    backlog: Vec<u8>,
}

impl EchoHandler {
    fn new(stats: Arc<Stats>) -> Self {
        EchoHandler {
            stats,
            backlog: Vec::new(),
        }
    }

    fn flush_backlog(&mut self, session: &mut IoSession) -> io::Result<()> {
        while !self.backlog.is_empty() {
            match session.write(&self.backlog) {
                Ok(n) => {
                    self.stats.bytes_out.fetch_add(n as u64, Ordering::Relaxed);
                    self.backlog.drain(..n);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    session.request_output();
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
        session.suspend_output();
        Ok(())
    }
}

impl EventHandler for EchoHandler {
    fn connected(&mut self, _session: &mut IoSession) -> io::Result<()> {
        self.stats.active.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn input_ready(&mut self, session: &mut IoSession) -> io::Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            match session.read(&mut buf) {
                Ok(0) => {
                    session.close();
                    break;
                }
                Ok(n) => {
                    self.stats.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
                    self.backlog.extend_from_slice(&buf[..n]);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        self.flush_backlog(session)
    }

    fn output_ready(&mut self, session: &mut IoSession) -> io::Result<()> {
        self.flush_backlog(session)
    }

    fn exception(&mut self, _session: &mut IoSession, _err: &io::Error) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn disconnected(&mut self, _session: &mut IoSession) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}

fn main() {
    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(7878);

    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("manifold-echo: bind failed on port {}: {}", port, err);
            std::process::exit(1);
        }
    };

    let stats = Arc::new(Stats::new());
    let config = ReactorConfig::from_env().tcp_nodelay(true);
    rinfo!(
        "manifold-echo: listening on 127.0.0.1:{} with {} workers",
        port,
        config.io_thread_count
    );

    let handler_stats = stats.clone();
    let factory: Arc<dyn EventHandlerFactory> = Arc::new(move |_session: &mut IoSession| -> std::io::Result<Box<dyn EventHandler>> {
        Ok(Box::new(EchoHandler::new(handler_stats.clone())) as Box<dyn EventHandler>)
    });
    let hooks = AcceptHooks {
        listener: Some(listener),
        stats: stats.clone(),
    };

    let mut reactor = match MultiWorkerReactor::with_hooks(
        factory,
        config,
        Box::new(hooks),
        Arc::new(DefaultThreadFactory),
    ) {
        Ok(reactor) => reactor,
        Err(err) => {
            eprintln!("manifold-echo: reactor setup failed: {}", err);
            std::process::exit(1);
        }
    };

    let report_stats = stats.clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(Duration::from_secs(5));
        rinfo!(
            "manifold-echo: accepts={} active={} in={}B out={}B errors={}",
            report_stats.accepts.load(Ordering::Relaxed),
            report_stats.active.load(Ordering::Relaxed),
            report_stats.bytes_in.load(Ordering::Relaxed),
            report_stats.bytes_out.load(Ordering::Relaxed),
            report_stats.errors.load(Ordering::Relaxed),
        );
    });

    if let Err(err) = reactor.execute() {
        eprintln!("manifold-echo: reactor failed: {}", err);
        for event in reactor.audit_log() {
            eprintln!("manifold-echo: audit: {}", event);
        }
        std::process::exit(1);
    }
}
