//! Connection tuning knobs.

use std::fmt;
use std::time::Duration;

use crate::transport::DEFAULT_MAX_FRAME_LEN;

pub const ENV_CALL_TIMEOUT_MS: &str = "RIPERMI_CALL_TIMEOUT_MS";
pub const ENV_MAX_FRAME_LEN: &str = "RIPERMI_MAX_FRAME_LEN";
pub const ENV_MAX_CONCURRENT_CALLS: &str = "RIPERMI_MAX_CONCURRENT_CALLS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Invalid { var: &'static str, value: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { var, value } => write!(f, "Invalid value for {}: {:?}", var, value),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How long a caller waits for its Return. `None` waits until the
    /// connection closes.
    pub call_timeout: Option<Duration>,
    /// Frames longer than this are refused in both directions, on top of
    /// any limit the transport enforces itself.
    pub max_frame_len: usize,
    /// Upper bound on inbound calls executing at once. `None` is unbounded.
    /// Callbacks into a saturated connection wait for a free worker, so
    /// nested call chains need a bound above their depth.
    pub max_concurrent_calls: Option<usize>,
    /// Sets `TCP_NODELAY` on sockets opened by `net`.
    pub nodelay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            call_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_concurrent_calls: None,
            nodelay: true,
        }
    }
}

impl Config {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn with_max_concurrent_calls(mut self, limit: usize) -> Self {
        self.max_concurrent_calls = Some(limit);
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Defaults overridden by `RIPERMI_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = parse(&lookup, ENV_CALL_TIMEOUT_MS)? {
            config.call_timeout = Some(Duration::from_millis(ms as u64));
        }
        if let Some(len) = parse(&lookup, ENV_MAX_FRAME_LEN)? {
            config.max_frame_len = len;
        }
        if let Some(limit) = parse(&lookup, ENV_MAX_CONCURRENT_CALLS)? {
            if limit == 0 {
                return Err(Error::Invalid { var: ENV_MAX_CONCURRENT_CALLS, value: "0".into() });
            }
            config.max_concurrent_calls = Some(limit);
        }
        Ok(config)
    }
}

fn parse(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<usize>> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Invalid { var, value: raw }),
    }
}
