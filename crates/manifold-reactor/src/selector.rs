//! Thin wrapper around the OS readiness primitive
//!
//! One `Selector` per reactor. Channels are registered against its
//! registry with a slab token as user-data; `select` fills the event
//! buffer and reports how many channels turned ready. Cross-thread
//! wakeups go through a `Waker` bound to a reserved token; multiple
//! wakeups before the loop runs coalesce into a single event.

use std::io;
use std::time::Duration;

use mio::{Events, Poll, Registry, Token, Waker};

/// Token reserved for the wakeup channel; never a valid slab index.
pub(crate) const WAKER_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 256;

pub struct Selector {
    poll: Poll,
    events: Events,
}

impl Selector {
    pub fn new() -> io::Result<Self> {
        Ok(Selector {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
        })
    }

    /// Create the wakeup handle for this selector. At most one per selector.
    pub fn new_waker(&self) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), WAKER_TOKEN)
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Wait up to `timeout` for readiness and return the number of ready
    /// channels. A bare wakeup or a signal interrupt reports zero.
    pub fn select(&mut self, timeout: Duration) -> io::Result<usize> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => Ok(self
                .events
                .iter()
                .filter(|event| event.token() != WAKER_TOKEN)
                .count()),
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(err) => Err(err),
        }
    }

    /// Events gathered by the last `select` call.
    pub fn events(&self) -> &Events {
        &self.events
    }
}
