//! Environment overrides
//!
//! Configuration ships with compiled defaults; a process can override any
//! of them through prefixed environment variables. An `EnvPrefix` scopes
//! the lookups so a caller spells its namespace once and the variable
//! names stay short at the call site. Malformed values keep the default;
//! startup never fails because of a stray variable.

use std::str::FromStr;
use std::time::Duration;

/// Namespace for one family of environment overrides.
#[derive(Debug, Clone, Copy)]
pub struct EnvPrefix(pub &'static str);

impl EnvPrefix {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(format!("{}{}", self.0, name)).ok()
    }

    /// Parse the override as `T`, or keep the default when the variable
    /// is unset or malformed.
    pub fn get<T: FromStr>(&self, name: &str, default: T) -> T {
        match self.lookup(name) {
            Some(raw) => raw.trim().parse().unwrap_or(default),
            None => default,
        }
    }

    /// Boolean override. "1", "true", "yes", "on" enable; "0", "false",
    /// "no", "off" disable; anything else keeps the default.
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        let raw = match self.lookup(name) {
            Some(raw) => raw,
            None => return default,
        };
        let raw = raw.trim();
        if ["1", "true", "yes", "on"]
            .iter()
            .any(|v| raw.eq_ignore_ascii_case(v))
        {
            return true;
        }
        if ["0", "false", "no", "off"]
            .iter()
            .any(|v| raw.eq_ignore_ascii_case(v))
        {
            return false;
        }
        default
    }

    /// Override holding a millisecond count, as a `Duration`.
    pub fn get_millis(&self, name: &str, default: Duration) -> Duration {
        match self.lookup(name).and_then(|raw| raw.trim().parse::<u64>().ok()) {
            Some(ms) => Duration::from_millis(ms),
            None => default,
        }
    }
}
