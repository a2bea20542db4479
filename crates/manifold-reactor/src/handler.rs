//! Event handler seams
//!
//! The reactor dispatches readiness to these traits and never interprets
//! bytes itself. Handlers run on the owning worker's thread only, one
//! callback at a time per session.

use std::io;
use std::sync::{Arc, Mutex};

use manifold_core::ReactorError;

use crate::session::IoSession;

/// Per-session protocol callbacks.
///
/// An `Err` returned from a fallible callback is routed to [`exception`]
/// and closes the session; it never reaches the reactor. Exactly one
/// [`disconnected`] fires per session, after its channel is released.
///
/// [`exception`]: EventHandler::exception
/// [`disconnected`]: EventHandler::disconnected
pub trait EventHandler: Send {
    /// The session has been registered with its worker and may be used.
    fn connected(&mut self, session: &mut IoSession) -> io::Result<()>;

    /// The channel has input ready (or the peer closed its side; the next
    /// read returns zero).
    fn input_ready(&mut self, session: &mut IoSession) -> io::Result<()>;

    /// The channel can accept output. Only delivered while the session has
    /// output interest requested.
    fn output_ready(&mut self, session: &mut IoSession) -> io::Result<()> {
        let _ = session;
        Ok(())
    }

    /// The session sat idle past its socket timeout. The default closes;
    /// override to extend instead.
    fn timeout(&mut self, session: &mut IoSession) -> io::Result<()> {
        session.close();
        Ok(())
    }

    /// A transport error occurred on this session. The session closes
    /// after this returns.
    fn exception(&mut self, session: &mut IoSession, err: &io::Error) {
        let _ = (session, err);
    }

    /// The session's channel has been released.
    fn disconnected(&mut self, session: &mut IoSession);
}

/// Produces one [`EventHandler`] per new session.
///
/// A factory error fails the session's request and is fatal to the worker
/// unless a [`ReactorExceptionHandler`] claims it.
pub trait EventHandlerFactory: Send + Sync {
    fn create_handler(&self, session: &mut IoSession) -> io::Result<Box<dyn EventHandler>>;
}

impl<F> EventHandlerFactory for F
where
    F: Fn(&mut IoSession) -> io::Result<Box<dyn EventHandler>> + Send + Sync,
{
    fn create_handler(&self, session: &mut IoSession) -> io::Result<Box<dyn EventHandler>> {
        self(session)
    }
}

/// Last-chance hook consulted by workers before an internal error is
/// treated as fatal. Return true to swallow the error and keep the
/// reactor alive. Absent a hook, such errors shut the reactor down.
pub trait ReactorExceptionHandler: Send + Sync {
    fn handle(&self, err: &ReactorError) -> bool;
}

/// Shared slot for the optional exception handler; replaceable up until
/// the reactor starts, read by workers when an error surfaces.
pub(crate) type ExceptionHandlerSlot = Arc<Mutex<Option<Arc<dyn ReactorExceptionHandler>>>>;

pub(crate) fn new_exception_slot() -> ExceptionHandlerSlot {
    Arc::new(Mutex::new(None))
}
