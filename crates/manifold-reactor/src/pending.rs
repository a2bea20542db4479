//! Hand-off of new channels to their assigned worker
//!
//! Producers on any thread push a `PendingSession`; only the owning
//! worker pops. The queue publishes before the producer wakes the
//! worker's selector, so the worker observes the entry on its next pass.

use crossbeam_queue::SegQueue;

use crate::request::SessionRequest;

/// A connected channel awaiting registration, with the session request
/// that produced it (outbound connects) if there was one.
pub struct PendingSession {
    pub(crate) socket: std::net::TcpStream,
    pub(crate) request: Option<SessionRequest>,
}

impl PendingSession {
    pub fn new(socket: std::net::TcpStream, request: Option<SessionRequest>) -> Self {
        PendingSession { socket, request }
    }

    pub fn request(&self) -> Option<&SessionRequest> {
        self.request.as_ref()
    }
}

/// MPSC queue of pending sessions. Unbounded: enqueue must never block
/// and never drop a channel on the floor.
pub(crate) struct PendingQueue {
    inner: SegQueue<PendingSession>,
}

impl PendingQueue {
    pub fn new() -> Self {
        PendingQueue {
            inner: SegQueue::new(),
        }
    }

    pub fn push(&self, pending: PendingSession) {
        self.inner.push(pending);
    }

    pub fn pop(&self) -> Option<PendingSession> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}
