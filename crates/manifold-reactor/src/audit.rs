//! Shutdown audit log
//!
//! Append-only record of the error that brought a reactor down plus every
//! error met during teardown, in order. Operators read it to decide
//! whether a restart is safe. Readers get a snapshot copy; the log itself
//! is never handed out.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use manifold_core::ReactorError;

/// One recorded failure with the wall-clock time it was observed.
#[derive(Debug, Clone)]
pub struct ExceptionEvent {
    error: ReactorError,
    timestamp: SystemTime,
}

impl ExceptionEvent {
    pub fn error(&self) -> &ReactorError {
        &self.error
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

impl fmt::Display for ExceptionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.timestamp, self.error)
    }
}

pub struct AuditLog {
    entries: Mutex<Vec<ExceptionEvent>>,
}

impl AuditLog {
    pub(crate) fn new() -> Self {
        AuditLog {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append an error, stamped with the current time.
    pub(crate) fn record(&self, error: ReactorError) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        entries.push(ExceptionEvent {
            error,
            timestamp: SystemTime::now(),
        });
    }

    /// Copy of the log at this moment.
    pub fn snapshot(&self) -> Vec<ExceptionEvent> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_a_copy() {
        let log = AuditLog::new();
        assert!(log.is_empty());
        log.record(ReactorError::Terminated);
        let snap = log.snapshot();
        assert_eq!(snap.len(), 1);
        log.record(ReactorError::WorkerPanic { worker: 0 });
        // The earlier snapshot is unaffected
        assert_eq!(snap.len(), 1);
        assert_eq!(log.snapshot().len(), 2);
    }

    #[test]
    fn test_order_is_preserved() {
        let log = AuditLog::new();
        log.record(ReactorError::Terminated);
        log.record(ReactorError::JoinTimeout { worker: 2 });
        let snap = log.snapshot();
        assert!(matches!(snap[0].error(), ReactorError::Terminated));
        assert!(matches!(snap[1].error(), ReactorError::JoinTimeout { worker: 2 }));
        assert!(snap[0].timestamp() <= snap[1].timestamp());
    }
}
