use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
// 4kb, same as the server side.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

pub const DEFAULT_MAX_DEPTH: usize = 512;
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

const READ_TIMEOUT_VAR: &str = "RESPIO_READ_TIMEOUT_MS";
const WRITE_TIMEOUT_VAR: &str = "RESPIO_WRITE_TIMEOUT_MS";
const MAX_DEPTH_VAR: &str = "RESPIO_MAX_DEPTH";
const MAX_BULK_LEN_VAR: &str = "RESPIO_MAX_BULK_LEN";

/// Bounds applied while reading frames, so a hostile peer can't make us recurse or allocate
/// without limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum nesting of multi-bulk replies.
    pub max_depth: usize,
    /// Maximum declared length of a single bulk string.
    pub max_bulk_len: usize,
    /// Maximum length of a header line, terminator included.
    pub max_line_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_bulk_len: DEFAULT_MAX_BULK_LEN,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

/// Connection settings. A zero timeout disables that deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub read_buffer_capacity: usize,
    pub write_buffer_capacity: usize,
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            write_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            limits: Limits::default(),
        }
    }
}

impl Config {
    /// Defaults, overridden by any `RESPIO_*` variables present in the environment.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(ms) = env_var::<u64>(READ_TIMEOUT_VAR)? {
            config.read_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_var::<u64>(WRITE_TIMEOUT_VAR)? {
            config.write_timeout = Duration::from_millis(ms);
        }
        if let Some(depth) = env_var::<usize>(MAX_DEPTH_VAR)? {
            config.limits.max_depth = depth;
        }
        if let Some(len) = env_var::<usize>(MAX_BULK_LEN_VAR)? {
            config.limits.max_bulk_len = len;
        }

        Ok(config)
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

fn env_var<T: FromStr>(name: &str) -> Result<Option<T>, Error> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} must be a number, got {value:?}"))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            Err(Error::Config(format!("{name} is not valid unicode")))
        }
    }
}
