//! Per-connection session state
//!
//! An `IoSession` binds one TCP channel to one worker. It lives in the
//! worker's slab, keyed by the token registered with the selector, and is
//! only ever touched from that worker's thread; nothing in here needs a
//! lock. Timestamps and the attribute map belong to the session; the
//! handler rides along in a slot that the worker takes out for the
//! duration of each callback.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::handler::EventHandler;

/// Attribute key under which a session request's attachment lands.
pub const ATTACHMENT_KEY: &str = "manifold.session.attachment";

/// Session lifecycle. `Closing` means the close is queued with the worker;
/// `Closed` means the channel has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Closing,
    Closed,
}

pub struct IoSession {
    token: usize,
    channel: TcpStream,
    status: SessionStatus,
    want_read: bool,
    want_write: bool,
    /// Interest currently registered with the selector, if any
    registered: Option<Interest>,
    last_read: Instant,
    last_write: Instant,
    /// Zero disables the idle timeout check
    socket_timeout: Duration,
    attributes: HashMap<String, Box<dyn Any + Send>>,
    handler: Option<Box<dyn EventHandler>>,
    close_queued: bool,
}

impl IoSession {
    pub(crate) fn new(token: usize, channel: TcpStream, socket_timeout: Duration) -> Self {
        let now = Instant::now();
        IoSession {
            token,
            channel,
            status: SessionStatus::Active,
            want_read: true,
            want_write: false,
            registered: Some(Interest::READABLE),
            last_read: now,
            last_write: now,
            socket_timeout,
            attributes: HashMap::new(),
            handler: None,
            close_queued: false,
        }
    }

    /// Slab index of this session on its worker; doubles as the selector
    /// token.
    #[inline]
    pub fn token(&self) -> usize {
        self.token
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.channel.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.channel.peer_addr()
    }

    #[inline]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// True once a close has been requested or performed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.status != SessionStatus::Active
    }

    /// Request an orderly close. The worker releases the channel and fires
    /// `disconnected` on its current loop pass.
    pub fn close(&mut self) {
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::Closing;
        }
    }

    /// Tear the session down without ceremony. Same path as `close` today;
    /// also legal on a session that is already closing.
    pub fn shutdown(&mut self) {
        if self.status != SessionStatus::Closed {
            self.status = SessionStatus::Closing;
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        self.status = SessionStatus::Closed;
    }

    /// One-shot guard for the worker's closed-session queue.
    pub(crate) fn mark_close_queued(&mut self) -> bool {
        if self.close_queued {
            false
        } else {
            self.close_queued = true;
            true
        }
    }

    // ── Timeout accounting ───────────────────────────────────────────

    #[inline]
    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    pub fn set_socket_timeout(&mut self, timeout: Duration) {
        self.socket_timeout = timeout;
    }

    #[inline]
    pub fn last_read_time(&self) -> Instant {
        self.last_read
    }

    #[inline]
    pub fn last_write_time(&self) -> Instant {
        self.last_write
    }

    /// The later of the last read and last write; the reference point for
    /// the idle timeout check. Monotonically non-decreasing.
    #[inline]
    pub fn last_access_time(&self) -> Instant {
        self.last_read.max(self.last_write)
    }

    pub(crate) fn touch_read(&mut self, now: Instant) {
        self.last_read = now;
    }

    pub(crate) fn touch_write(&mut self, now: Instant) {
        self.last_write = now;
    }

    // ── Interest set ─────────────────────────────────────────────────

    pub fn request_input(&mut self) {
        self.want_read = true;
    }

    pub fn suspend_input(&mut self) {
        self.want_read = false;
    }

    /// Ask for `output_ready` callbacks while the channel can accept data.
    pub fn request_output(&mut self) {
        self.want_write = true;
    }

    pub fn suspend_output(&mut self) {
        self.want_write = false;
    }

    pub fn input_requested(&self) -> bool {
        self.want_read
    }

    pub fn output_requested(&self) -> bool {
        self.want_write
    }

    fn desired_interest(&self) -> Option<Interest> {
        if self.status != SessionStatus::Active {
            return None;
        }
        match (self.want_read, self.want_write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    pub(crate) fn interest_changed(&self) -> bool {
        self.desired_interest() != self.registered
    }

    /// Push the requested interest set down to the selector. An empty set
    /// deregisters the channel; interest re-registers it.
    pub(crate) fn apply_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let desired = self.desired_interest();
        if desired == self.registered {
            return Ok(());
        }
        match (self.registered, desired) {
            (Some(_), Some(interest)) => {
                registry.reregister(&mut self.channel, Token(self.token), interest)?;
            }
            (Some(_), None) => {
                registry.deregister(&mut self.channel)?;
            }
            (None, Some(interest)) => {
                registry.register(&mut self.channel, Token(self.token), interest)?;
            }
            (None, None) => {}
        }
        self.registered = desired;
        Ok(())
    }

    pub(crate) fn deregister(&mut self, registry: &Registry) {
        if self.registered.take().is_some() {
            let _ = registry.deregister(&mut self.channel);
        }
    }

    // ── Attributes ───────────────────────────────────────────────────

    /// Store an arbitrary named value on the session, returning any
    /// previous value under that name.
    pub fn set_attribute(
        &mut self,
        name: &str,
        value: Box<dyn Any + Send>,
    ) -> Option<Box<dyn Any + Send>> {
        self.attributes.insert(name.to_owned(), value)
    }

    /// Borrow an attribute downcast to `T`.
    pub fn attribute<T: 'static>(&self, name: &str) -> Option<&T> {
        self.attributes.get(name).and_then(|v| v.downcast_ref())
    }

    pub fn take_attribute(&mut self, name: &str) -> Option<Box<dyn Any + Send>> {
        self.attributes.remove(name)
    }

    // ── Handler slot ─────────────────────────────────────────────────

    pub(crate) fn set_handler(&mut self, handler: Box<dyn EventHandler>) {
        self.handler = Some(handler);
    }

    pub(crate) fn take_handler(&mut self) -> Option<Box<dyn EventHandler>> {
        self.handler.take()
    }

    pub(crate) fn restore_handler(&mut self, handler: Box<dyn EventHandler>) {
        self.handler = Some(handler);
    }

    pub(crate) fn channel_mut(&mut self) -> &mut TcpStream {
        &mut self.channel
    }
}

impl Read for IoSession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }
}

impl Write for IoSession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.channel.flush()
    }
}

impl fmt::Debug for IoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoSession")
            .field("token", &self.token)
            .field("status", &self.status)
            .field("want_read", &self.want_read)
            .field("want_write", &self.want_write)
            .field("socket_timeout", &self.socket_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn loopback_session() -> (IoSession, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let channel = TcpStream::from_std(accepted);
        (IoSession::new(0, channel, Duration::ZERO), client)
    }

    #[test]
    fn test_close_transitions_once() {
        let (mut session, _client) = loopback_session();
        assert_eq!(session.status(), SessionStatus::Active);
        session.close();
        assert_eq!(session.status(), SessionStatus::Closing);
        session.close();
        assert_eq!(session.status(), SessionStatus::Closing);
        assert!(session.mark_close_queued());
        assert!(!session.mark_close_queued());
    }

    #[test]
    fn test_attributes_roundtrip() {
        let (mut session, _client) = loopback_session();
        session.set_attribute("peer.name", Box::new(String::from("origin")));
        assert_eq!(
            session.attribute::<String>("peer.name").map(String::as_str),
            Some("origin")
        );
        assert!(session.attribute::<u64>("peer.name").is_none());
        assert!(session.take_attribute("peer.name").is_some());
        assert!(session.attribute::<String>("peer.name").is_none());
    }

    #[test]
    fn test_last_access_is_max_of_read_write() {
        let (mut session, _client) = loopback_session();
        let t0 = Instant::now();
        session.touch_read(t0);
        let t1 = t0 + Duration::from_millis(10);
        session.touch_write(t1);
        assert_eq!(session.last_access_time(), t1);
        let t2 = t1 + Duration::from_millis(10);
        session.touch_read(t2);
        assert_eq!(session.last_access_time(), t2);
    }

    #[test]
    fn test_interest_edits_mark_dirty() {
        let (mut session, _client) = loopback_session();
        assert!(!session.interest_changed());
        session.request_output();
        assert!(session.interest_changed());
        session.suspend_output();
        assert!(!session.interest_changed());
        // Closing always drops interest
        session.close();
        assert!(session.interest_changed());
    }
}
