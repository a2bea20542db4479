//! Shared fixtures for the reactor integration tests
#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use manifold_reactor::{
    EventHandler, EventHandlerFactory, IoSession, MultiWorkerReactor, ReactorHandle,
    ReactorResult,
};

#[derive(Default)]
pub struct Counters {
    pub connected: AtomicUsize,
    pub disconnected: AtomicUsize,
    pub timeouts: AtomicUsize,
    pub errors: AtomicUsize,
}

impl Counters {
    pub fn new() -> Arc<Self> {
        Arc::new(Counters::default())
    }
}

/// Run the reactor on a background thread; steer it through the handle.
pub fn spawn_reactor(
    mut reactor: MultiWorkerReactor,
) -> (ReactorHandle, thread::JoinHandle<ReactorResult<()>>) {
    let handle = reactor.handle();
    let thread = thread::spawn(move || reactor.execute());
    (handle, thread)
}

/// Poll `cond` until it holds or the deadline passes.
pub fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// A connected loopback pair: (client side, server side).
pub fn socket_pair(listener: &TcpListener) -> (TcpStream, TcpStream) {
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

pub fn read_to_end_counting(stream: &mut TcpStream) -> usize {
    let mut total = 0;
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return total,
            Ok(n) => total += n,
            Err(_) => return total,
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Echoes input back, closing on end-of-stream.
pub struct EchoHandler {
    counters: Arc<Counters>,
    backlog: Vec<u8>,
}

impl EchoHandler {
    fn flush(&mut self, session: &mut IoSession) -> io::Result<()> {
        while !self.backlog.is_empty() {
            match session.write(&self.backlog) {
                Ok(n) => {
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
        self.counters.connected.fetch_add(1, Ordering::SeqCst);
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
                Ok(n) => self.backlog.extend_from_slice(&buf[..n]),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        self.flush(session)
    }

    fn output_ready(&mut self, session: &mut IoSession) -> io::Result<()> {
        self.flush(session)
    }

    fn exception(&mut self, _session: &mut IoSession, _err: &io::Error) {
        self.counters.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnected(&mut self, _session: &mut IoSession) {
        self.counters.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn echo_factory(counters: Arc<Counters>) -> Arc<dyn EventHandlerFactory> {
    Arc::new(move |_session: &mut IoSession| -> std::io::Result<Box<dyn EventHandler>> {
        Ok(Box::new(EchoHandler {
            counters: counters.clone(),
            backlog: Vec::new(),
        }) as Box<dyn EventHandler>)
    })
}

/// Writes a fixed payload on connect, then closes once it has all left.
pub struct WriterHandler {
    counters: Arc<Counters>,
    backlog: Vec<u8>,
}

impl WriterHandler {
    fn flush_and_close(&mut self, session: &mut IoSession) -> io::Result<()> {
        while !self.backlog.is_empty() {
            match session.write(&self.backlog) {
                Ok(n) => {
                    self.backlog.drain(..n);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    session.request_output();
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
        session.close();
        Ok(())
    }
}

impl EventHandler for WriterHandler {
    fn connected(&mut self, session: &mut IoSession) -> io::Result<()> {
        self.counters.connected.fetch_add(1, Ordering::SeqCst);
        self.flush_and_close(session)
    }

    fn input_ready(&mut self, _session: &mut IoSession) -> io::Result<()> {
        Ok(())
    }

    fn output_ready(&mut self, session: &mut IoSession) -> io::Result<()> {
        self.flush_and_close(session)
    }

    fn disconnected(&mut self, _session: &mut IoSession) {
        self.counters.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn writer_factory(counters: Arc<Counters>, payload: Vec<u8>) -> Arc<dyn EventHandlerFactory> {
    Arc::new(move |_session: &mut IoSession| -> std::io::Result<Box<dyn EventHandler>> {
        Ok(Box::new(WriterHandler {
            counters: counters.clone(),
            backlog: payload.clone(),
        }) as Box<dyn EventHandler>)
    })
}

/// Does nothing at all; sessions stay open until torn down from outside.
pub struct IdleHandler {
    counters: Arc<Counters>,
}

impl EventHandler for IdleHandler {
    fn connected(&mut self, _session: &mut IoSession) -> io::Result<()> {
        self.counters.connected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn input_ready(&mut self, _session: &mut IoSession) -> io::Result<()> {
        Ok(())
    }

    fn timeout(&mut self, session: &mut IoSession) -> io::Result<()> {
        self.counters.timeouts.fetch_add(1, Ordering::SeqCst);
        session.close();
        Ok(())
    }

    fn disconnected(&mut self, _session: &mut IoSession) {
        self.counters.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn idle_factory(counters: Arc<Counters>) -> Arc<dyn EventHandlerFactory> {
    Arc::new(move |_session: &mut IoSession| -> std::io::Result<Box<dyn EventHandler>> {
        Ok(Box::new(IdleHandler {
            counters: counters.clone(),
        }) as Box<dyn EventHandler>)
    })
}
