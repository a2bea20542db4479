//! Reactor configuration
//!
//! Compile-time defaults with runtime environment overrides, in priority
//! order (highest wins):
//!
//! 1. Builder methods
//! 2. Environment variables (`MFD_*`)
//! 3. Library defaults

use std::time::Duration;

use manifold_core::env::EnvPrefix;

const ENV: EnvPrefix = EnvPrefix("MFD_");

/// Compiled defaults. One dispatch thread per available core.
pub mod defaults {
    use std::time::Duration;

    pub const SELECT_INTERVAL: Duration = Duration::from_millis(1000);
    pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(500);
    /// Zero disables the session timeout check.
    pub const SO_TIMEOUT: Duration = Duration::ZERO;
    pub const TCP_NODELAY: bool = false;
    pub const SO_KEEPALIVE: bool = false;
    /// Zero leaves the kernel default in place.
    pub const SND_BUF_SIZE: usize = 0;
    pub const RCV_BUF_SIZE: usize = 0;

    pub fn io_thread_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
    }
}

/// I/O reactor configuration.
///
/// Use `from_env()` to start from the defaults with any environment
/// overrides applied, then refine with the builder methods.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Number of worker reactor threads
    pub io_thread_count: usize,
    /// Upper bound on one selector wait; the loop's polling period
    pub select_interval: Duration,
    /// How long a graceful shutdown may drain before force-closing.
    /// Zero waits indefinitely.
    pub shutdown_grace_period: Duration,
    /// Idle timeout applied to new sessions; zero disables
    pub so_timeout: Duration,
    /// Disable Nagle's algorithm on new channels
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive on new channels
    pub so_keepalive: bool,
    /// Linger-on-close; `None` leaves the kernel default
    pub so_linger: Option<Duration>,
    /// Socket send buffer size; zero leaves the kernel default
    pub snd_buf_size: usize,
    /// Socket receive buffer size; zero leaves the kernel default
    pub rcv_buf_size: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ReactorConfig {
    /// Create a config from compiled defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `MFD_IO_THREADS` - Number of worker threads
    /// - `MFD_SELECT_INTERVAL_MS` - Selector polling period
    /// - `MFD_GRACE_PERIOD_MS` - Shutdown grace period
    /// - `MFD_SO_TIMEOUT_MS` - Session idle timeout (0 = off)
    /// - `MFD_TCP_NODELAY` - Disable Nagle (0/1)
    /// - `MFD_SO_KEEPALIVE` - TCP keepalive (0/1)
    /// - `MFD_SO_LINGER_S` - Linger seconds; negative leaves default
    /// - `MFD_SNDBUF` / `MFD_RCVBUF` - Buffer sizes in bytes (0 = default)
    pub fn from_env() -> Self {
        let linger_s: i64 = ENV.get("SO_LINGER_S", -1);
        Self {
            io_thread_count: ENV.get("IO_THREADS", defaults::io_thread_count()).max(1),
            select_interval: ENV.get_millis("SELECT_INTERVAL_MS", defaults::SELECT_INTERVAL),
            shutdown_grace_period: ENV
                .get_millis("GRACE_PERIOD_MS", defaults::SHUTDOWN_GRACE_PERIOD),
            so_timeout: ENV.get_millis("SO_TIMEOUT_MS", defaults::SO_TIMEOUT),
            tcp_nodelay: ENV.get_bool("TCP_NODELAY", defaults::TCP_NODELAY),
            so_keepalive: ENV.get_bool("SO_KEEPALIVE", defaults::SO_KEEPALIVE),
            so_linger: if linger_s < 0 {
                None
            } else {
                Some(Duration::from_secs(linger_s as u64))
            },
            snd_buf_size: ENV.get("SNDBUF", defaults::SND_BUF_SIZE),
            rcv_buf_size: ENV.get("RCVBUF", defaults::RCV_BUF_SIZE),
        }
    }

    pub fn io_thread_count(mut self, count: usize) -> Self {
        self.io_thread_count = count.max(1);
        self
    }

    pub fn select_interval(mut self, interval: Duration) -> Self {
        self.select_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace;
        self
    }

    pub fn so_timeout(mut self, timeout: Duration) -> Self {
        self.so_timeout = timeout;
        self
    }

    pub fn tcp_nodelay(mut self, on: bool) -> Self {
        self.tcp_nodelay = on;
        self
    }

    pub fn so_keepalive(mut self, on: bool) -> Self {
        self.so_keepalive = on;
        self
    }

    pub fn so_linger(mut self, linger: Option<Duration>) -> Self {
        self.so_linger = linger;
        self
    }

    pub fn snd_buf_size(mut self, bytes: usize) -> Self {
        self.snd_buf_size = bytes;
        self
    }

    pub fn rcv_buf_size(mut self, bytes: usize) -> Self {
        self.rcv_buf_size = bytes;
        self
    }
}
