//! Error types for the I/O reactor

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::status::ReactorStatus;

/// Result type for reactor operations
pub type ReactorResult<T> = Result<T, ReactorError>;

/// Errors raised by the reactor machinery itself.
///
/// Per-session transport errors never take this form; they are delivered
/// to the session's event handler and close that session only. Everything
/// here is either fatal to a reactor or recorded in its audit log during
/// shutdown. I/O causes are reference-counted so an error can sit in the
/// audit log and propagate to the caller at the same time.
#[derive(Debug, Clone)]
pub enum ReactorError {
    /// The readiness selector failed in a way the loop cannot recover from
    Selector(Arc<io::Error>),

    /// Registering a channel with the selector failed (channel not closed)
    Registration(Arc<io::Error>),

    /// The event handler factory refused to produce a handler
    HandlerFactory(Arc<io::Error>),

    /// A dispatch worker's loop terminated abnormally
    WorkerTerminated { worker: usize, cause: Box<ReactorError> },

    /// A dispatch worker thread panicked
    WorkerPanic { worker: usize },

    /// A dispatch worker failed to stop within the shutdown grace period
    JoinTimeout { worker: usize },

    /// Operation attempted in a state that does not permit it
    IllegalState(ReactorStatus),

    /// Operation attempted on a reactor that is past its active phase
    Terminated,

    /// Any other I/O failure in the reactor machinery
    Io(Arc<io::Error>),
}

impl ReactorError {
    pub fn selector(err: io::Error) -> Self {
        ReactorError::Selector(Arc::new(err))
    }

    pub fn registration(err: io::Error) -> Self {
        ReactorError::Registration(Arc::new(err))
    }

    pub fn handler_factory(err: io::Error) -> Self {
        ReactorError::HandlerFactory(Arc::new(err))
    }

    pub fn io(err: io::Error) -> Self {
        ReactorError::Io(Arc::new(err))
    }

    /// Walks the cause chain to the innermost reactor error.
    ///
    /// `WorkerTerminated` wraps the error captured on the worker thread;
    /// audit log readers generally want the original.
    pub fn root_cause(&self) -> &ReactorError {
        match self {
            ReactorError::WorkerTerminated { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorError::Selector(err) => write!(f, "unexpected selector failure: {}", err),
            ReactorError::Registration(err) => {
                write!(f, "failure registering channel with the selector: {}", err)
            }
            ReactorError::HandlerFactory(err) => {
                write!(f, "event handler creation failed: {}", err)
            }
            ReactorError::WorkerTerminated { worker, cause } => {
                write!(f, "I/O dispatch worker {} terminated abnormally: {}", worker, cause)
            }
            ReactorError::WorkerPanic { worker } => {
                write!(f, "I/O dispatch worker {} panicked", worker)
            }
            ReactorError::JoinTimeout { worker } => {
                write!(f, "I/O dispatch worker {} did not stop within the grace period", worker)
            }
            ReactorError::IllegalState(status) => write!(f, "illegal reactor state: {}", status),
            ReactorError::Terminated => write!(f, "I/O reactor has been shut down"),
            ReactorError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for ReactorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReactorError::Selector(err)
            | ReactorError::Registration(err)
            | ReactorError::HandlerFactory(err)
            | ReactorError::Io(err) => Some(err.as_ref()),
            ReactorError::WorkerTerminated { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for ReactorError {
    fn from(err: io::Error) -> Self {
        ReactorError::io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = ReactorError::Terminated;
        assert_eq!(format!("{}", e), "I/O reactor has been shut down");

        let e = ReactorError::selector(io::Error::new(io::ErrorKind::Other, "epoll gone"));
        assert_eq!(format!("{}", e), "unexpected selector failure: epoll gone");

        let e = ReactorError::WorkerTerminated {
            worker: 3,
            cause: Box::new(ReactorError::WorkerPanic { worker: 3 }),
        };
        assert_eq!(
            format!("{}", e),
            "I/O dispatch worker 3 terminated abnormally: I/O dispatch worker 3 panicked"
        );
    }

    #[test]
    fn test_root_cause_unwraps_worker_layers() {
        let inner = ReactorError::registration(io::Error::new(io::ErrorKind::Other, "nope"));
        let outer = ReactorError::WorkerTerminated {
            worker: 0,
            cause: Box::new(inner),
        };
        assert!(matches!(outer.root_cause(), ReactorError::Registration(_)));
    }

    #[test]
    fn test_io_conversion() {
        let err: ReactorError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, ReactorError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
