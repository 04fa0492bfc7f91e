use std::time::Duration;

use crate::Segment::Segment::WaitPolicy;

pub const DEFAULT_KEY: &str = "dmxp_events";
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Resolved transport settings. Build with [`TransportBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Name of the top-level segment; children derive theirs from it.
    pub key: String,
    pub capacity: usize,
    pub child_capacity: usize,
    /// `None` waits for the monitor until interrupted.
    pub attach_timeout: Option<Duration>,
    pub wait_policy: WaitPolicy,
    pub install_signal_handlers: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportBuilder::default().build()
    }
}

pub struct TransportBuilder {
    key: String,
    capacity: usize,
    child_capacity: Option<usize>,
    attach_timeout: Option<Duration>,
    check_interval: u32,
    max_wait_retries: Option<u64>,
    install_signal_handlers: bool,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        let policy = WaitPolicy::default();
        Self {
            key: DEFAULT_KEY.to_string(),
            capacity: DEFAULT_CAPACITY, // 64KB default
            child_capacity: None,       // same as capacity
            attach_timeout: None,
            check_interval: policy.check_interval,
            max_wait_retries: policy.max_retries,
            install_signal_handlers: true,
        }
    }
}

impl TransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `DMXP_EVT_KEY`, `DMXP_EVT_CAPACITY` and
    /// `DMXP_EVT_ATTACH_TIMEOUT_MS`. Unparsable values are ignored with a
    /// warning.
    pub fn from_env() -> Self {
        let mut builder = Self::default();
        if let Ok(key) = std::env::var("DMXP_EVT_KEY") {
            builder.key = key;
        }
        if let Some(capacity) = env_number("DMXP_EVT_CAPACITY") {
            builder.capacity = capacity as usize;
        }
        if let Some(ms) = env_number("DMXP_EVT_ATTACH_TIMEOUT_MS") {
            builder.attach_timeout = Some(Duration::from_millis(ms));
        }
        builder
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_child_capacity(mut self, capacity: usize) -> Self {
        self.child_capacity = Some(capacity);
        self
    }

    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = Some(timeout);
        self
    }

    pub fn with_check_interval(mut self, retries: u32) -> Self {
        self.check_interval = retries.max(1);
        self
    }

    pub fn with_max_wait_retries(mut self, retries: u64) -> Self {
        self.max_wait_retries = Some(retries);
        self
    }

    pub fn with_signal_handlers(mut self, install: bool) -> Self {
        self.install_signal_handlers = install;
        self
    }

    pub fn build(self) -> TransportConfig {
        TransportConfig {
            child_capacity: self.child_capacity.unwrap_or(self.capacity),
            key: self.key,
            capacity: self.capacity,
            attach_timeout: self.attach_timeout,
            wait_policy: WaitPolicy {
                check_interval: self.check_interval,
                max_retries: self.max_wait_retries,
            },
            install_signal_handlers: self.install_signal_handlers,
        }
    }
}

fn env_number(var: &str) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(var, value = %raw, error = %e, "ignoring invalid environment value");
            None
        }
    }
}
