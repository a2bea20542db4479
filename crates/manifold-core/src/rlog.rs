//! Reactor logging
//!
//! Minimal leveled logger for the reactor crates. Lines are formatted in
//! full before a single locked write to stderr, so concurrent dispatch
//! workers never interleave within a line, and the level gate sits in the
//! macro so disabled calls do not evaluate their format arguments.
//!
//! The filter is read once, from `MFD_LOG` ("error" through "trace", or
//! "off"); `MFD_LOG_FLUSH` forces a flush after every line for crash
//! debugging. The reactor constructor calls [`init`] so the env lookup
//! happens at startup rather than under the first log line; [`set_filter`]
//! overrides the filter at runtime.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use crate::env::EnvPrefix;

const ENV: EnvPrefix = EnvPrefix("MFD_");

/// Severity of one log line. The filter admits a level and everything
/// above it; silence is expressed as `set_filter(None)`, not a variant.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let s = s.trim();
        for level in [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            if s.eq_ignore_ascii_case(level.tag()) {
                return Ok(level);
            }
        }
        Err(())
    }
}

struct LogState {
    /// 0 silences everything, otherwise the highest admitted level
    filter: AtomicU8,
    flush_each_line: bool,
}

static STATE: OnceLock<LogState> = OnceLock::new();

fn state() -> &'static LogState {
    STATE.get_or_init(|| {
        let filter = match std::env::var("MFD_LOG") {
            Ok(raw) if raw.trim().eq_ignore_ascii_case("off") => 0,
            Ok(raw) => raw
                .parse::<LogLevel>()
                .map(|level| level as u8)
                .unwrap_or(LogLevel::Warn as u8),
            Err(_) => LogLevel::Warn as u8,
        };
        LogState {
            filter: AtomicU8::new(filter),
            flush_each_line: ENV.get_bool("LOG_FLUSH", false),
        }
    })
}

/// Resolve the environment now. Idempotent; the reactor constructor calls
/// this so logging is configured before any worker thread starts.
pub fn init() {
    let _ = state();
}

/// Replace the filter; `None` silences all output.
pub fn set_filter(level: Option<LogLevel>) {
    state()
        .filter
        .store(level.map_or(0, |l| l as u8), Ordering::Relaxed);
}

#[inline]
pub fn enabled(level: LogLevel) -> bool {
    level as u8 <= state().filter.load(Ordering::Relaxed)
}

/// Internal: render and write one line. Callers have already passed the
/// level gate.
#[doc(hidden)]
pub fn _emit(level: LogLevel, args: fmt::Arguments<'_>) {
    let line = format!("{}: {}\n", level, args);
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_all(line.as_bytes());
    if state().flush_each_line {
        let _ = handle.flush();
    }
}

/// Log at an explicit level. The wrappers below are the usual spelling.
#[macro_export]
macro_rules! rlog {
    ($level:expr, $($arg:tt)*) => {{
        let level = $level;
        if $crate::rlog::enabled(level) {
            $crate::rlog::_emit(level, format_args!($($arg)*));
        }
    }};
}

/// Error level log
#[macro_export]
macro_rules! rerror {
    ($($arg:tt)*) => {
        $crate::rlog!($crate::rlog::LogLevel::Error, $($arg)*)
    };
}

/// Warning level log
#[macro_export]
macro_rules! rwarn {
    ($($arg:tt)*) => {
        $crate::rlog!($crate::rlog::LogLevel::Warn, $($arg)*)
    };
}

/// Info level log
#[macro_export]
macro_rules! rinfo {
    ($($arg:tt)*) => {
        $crate::rlog!($crate::rlog::LogLevel::Info, $($arg)*)
    };
}

/// Debug level log
#[macro_export]
macro_rules! rdebug {
    ($($arg:tt)*) => {
        $crate::rlog!($crate::rlog::LogLevel::Debug, $($arg)*)
    };
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! rtrace {
    ($($arg:tt)*) => {
        $crate::rlog!($crate::rlog::LogLevel::Trace, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_parse_accepts_tags_case_insensitively() {
        assert_eq!("error".parse::<LogLevel>(), Ok(LogLevel::Error));
        assert_eq!(" Trace ".parse::<LogLevel>(), Ok(LogLevel::Trace));
        assert_eq!("INFO".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    // One test owns the global filter; parallel tests must not share it
    #[test]
    fn test_filter_gates_levels_and_macros() {
        set_filter(Some(LogLevel::Info));
        assert!(enabled(LogLevel::Error));
        assert!(enabled(LogLevel::Info));
        assert!(!enabled(LogLevel::Debug));

        set_filter(None);
        assert!(!enabled(LogLevel::Error));

        // Silenced, so these only prove the macros expand
        rlog!(LogLevel::Warn, "base {}", 0);
        rerror!("err {}", 1);
        rwarn!("warn");
        rinfo!("info {}", "x");
        rdebug!("debug");
        rtrace!("trace");
    }
}
