//! # Runtime Configuration
//!
//! Tunables shared by every server, call, proxy and discovery instance of a
//! `Runtime`. Defaults are named constants; `Config::from_env` applies
//! `REMO_*` overrides on top of them.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const MIN_CALL_TIMEOUT: Duration = Duration::from_millis(100);
pub const MAX_CALL_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 20;
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
pub const DEFAULT_DISCOVERY_PORT: u16 = 55001;
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_millis(2000);
pub const MIN_DISCOVERY_INTERVAL: Duration = Duration::from_millis(1);

pub const ENV_CALL_TIMEOUT_MS: &str = "REMO_CALL_TIMEOUT_MS";
pub const ENV_MAX_CONCURRENT_CALLS: &str = "REMO_MAX_CONCURRENT_CALLS";
pub const ENV_MAX_FRAME_LEN: &str = "REMO_MAX_FRAME_LEN";
pub const ENV_DISCOVERY_PORT: &str = "REMO_DISCOVERY_PORT";
pub const ENV_DISCOVERY_INTERVAL_MS: &str = "REMO_DISCOVERY_INTERVAL_MS";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Deadline for connecting and for each request awaiting its response.
    pub call_timeout: Duration,
    /// Upper bound on calls in `Connecting` or `Sent` at the same time.
    pub max_concurrent_calls: usize,
    /// Frames declaring a longer payload are malformed.
    pub max_frame_len: usize,
    pub discovery_port: u16,
    pub discovery_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
        }
    }
}

impl Config {
    /// Defaults with environment overrides applied. Unparseable values are
    /// logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_override::<u64>(ENV_CALL_TIMEOUT_MS) {
            config.call_timeout = clamp_call_timeout(Duration::from_millis(ms));
        }
        if let Some(n) = env_override::<usize>(ENV_MAX_CONCURRENT_CALLS) {
            if n == 0 {
                warn!(var = ENV_MAX_CONCURRENT_CALLS, "ignoring zero call limit");
            } else {
                config.max_concurrent_calls = n;
            }
        }
        if let Some(len) = env_override::<usize>(ENV_MAX_FRAME_LEN) {
            config.max_frame_len = len;
        }
        if let Some(port) = env_override::<u16>(ENV_DISCOVERY_PORT) {
            config.discovery_port = port;
        }
        if let Some(ms) = env_override::<u64>(ENV_DISCOVERY_INTERVAL_MS) {
            config.discovery_interval = clamp_discovery_interval(Duration::from_millis(ms));
        }

        config
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = clamp_call_timeout(timeout);
        self
    }

    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = clamp_discovery_interval(interval);
        self
    }
}

/// Clamps a call timeout to `[MIN_CALL_TIMEOUT, MAX_CALL_TIMEOUT]`.
pub fn clamp_call_timeout(timeout: Duration) -> Duration {
    timeout.clamp(MIN_CALL_TIMEOUT, MAX_CALL_TIMEOUT)
}

/// Raises a beacon period to at least `MIN_DISCOVERY_INTERVAL`.
pub fn clamp_discovery_interval(interval: Duration) -> Duration {
    interval.max(MIN_DISCOVERY_INTERVAL)
}

fn env_override<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring invalid configuration value");
            None
        }
    }
}
