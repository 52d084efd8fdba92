use crate::tier::TierPolicy;
use beads_core::DEFAULT_MAX_RECORD_BYTES;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const ENV_DEBOUNCE_MS: &str = "BEADS_DASH_DEBOUNCE_MS";
pub const ENV_CHANNEL_BUFFER: &str = "BEADS_DASH_CHANNEL_BUFFER";
pub const ENV_HEARTBEAT_INTERVAL_S: &str = "BEADS_DASH_HEARTBEAT_INTERVAL_S";
pub const ENV_WATCHDOG_INTERVAL_S: &str = "BEADS_DASH_WATCHDOG_INTERVAL_S";
pub const ENV_MAX_LINE_SIZE_MB: &str = "BEADS_DASH_MAX_LINE_SIZE_MB";
pub const ENV_IDLE_GC: &str = "BEADS_DASH_IDLE_GC";
pub const ENV_FORCE_POLL: &str = "BEADS_DASH_FORCE_POLL";
pub const ENV_POLL_INTERVAL_MS: &str = "BEADS_DASH_POLL_INTERVAL_MS";

/// Largest message queue the worker will allocate.
pub const MAX_CHANNEL_BUFFER: usize = 4096;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
    #[error("watch directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),
    #[error("failed to create watcher for {}: {source}", path.display())]
    Watcher {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleGcConfig {
    pub enabled: bool,
    pub idle_threshold: Duration,
    pub check_every: Duration,
    pub min_interval: Duration,
    /// Share of pooled issue buffers kept after a reclamation pass.
    pub retain_percent: u8,
}

impl Default for IdleGcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_threshold: Duration::from_secs(5),
            check_every: Duration::from_secs(1),
            min_interval: Duration::from_secs(30),
            retain_percent: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Beads JSONL file. Empty means refreshes are only triggered manually.
    pub path: PathBuf,
    pub watch: bool,
    /// Poll the file instead of using native change notifications.
    pub force_poll: bool,
    pub poll_interval: Duration,
    pub debounce_delay: Duration,
    pub channel_buffer: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub watchdog_interval: Duration,
    pub processing_timeout: Duration,
    pub max_recoveries: u32,
    pub idle_gc: IdleGcConfig,
    pub tiers: TierPolicy,
    pub max_record_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            watch: true,
            force_poll: false,
            poll_interval: Duration::from_secs(2),
            debounce_delay: Duration::from_millis(200),
            channel_buffer: 8,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(10),
            processing_timeout: Duration::from_secs(30),
            max_recoveries: 3,
            idle_gc: IdleGcConfig::default(),
            tiers: TierPolicy::default(),
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

impl WorkerConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `BEADS_DASH_*` environment variables.
    pub fn from_env(path: impl Into<PathBuf>) -> Self {
        Self::from_lookup(path, |key| std::env::var(key).ok())
    }

    fn from_lookup(path: impl Into<PathBuf>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(path);
        let positive = |key: &str| {
            lookup(key)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|value| *value > 0)
        };

        if let Some(ms) = positive(ENV_DEBOUNCE_MS) {
            config.debounce_delay = Duration::from_millis(ms);
        }
        if let Some(buffer) = positive(ENV_CHANNEL_BUFFER) {
            config.channel_buffer = usize::try_from(buffer).unwrap_or(config.channel_buffer);
        }
        if let Some(secs) = positive(ENV_HEARTBEAT_INTERVAL_S) {
            let interval = Duration::from_secs(secs);
            if interval < config.heartbeat_timeout {
                config.heartbeat_interval = interval;
            }
        }
        if let Some(secs) = positive(ENV_WATCHDOG_INTERVAL_S) {
            config.watchdog_interval = Duration::from_secs(secs);
        }
        if let Some(mb) = positive(ENV_MAX_LINE_SIZE_MB) {
            config.max_record_bytes = usize::try_from(mb)
                .ok()
                .and_then(|mb| mb.checked_mul(1024 * 1024))
                .unwrap_or(config.max_record_bytes);
        }
        if let Some(enabled) = lookup(ENV_IDLE_GC).as_deref().and_then(parse_flag) {
            config.idle_gc.enabled = enabled;
        }
        if let Some(force) = lookup(ENV_FORCE_POLL).as_deref().and_then(parse_flag) {
            config.force_poll = force;
        }
        if let Some(ms) = positive(ENV_POLL_INTERVAL_MS) {
            config.poll_interval = Duration::from_millis(ms);
        }
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
        if self.channel_buffer == 0 {
            return invalid("channel_buffer", "must be at least 1");
        }
        if self.channel_buffer > MAX_CHANNEL_BUFFER {
            return invalid("channel_buffer", "must be at most 4096");
        }
        if self.poll_interval.is_zero() {
            return invalid("poll_interval", "must be positive");
        }
        if self.debounce_delay.is_zero() {
            return invalid("debounce_delay", "must be positive");
        }
        if self.heartbeat_interval.is_zero() {
            return invalid("heartbeat_interval", "must be positive");
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return invalid("heartbeat_timeout", "must exceed heartbeat_interval");
        }
        if self.watchdog_interval.is_zero() {
            return invalid("watchdog_interval", "must be positive");
        }
        if self.processing_timeout.is_zero() {
            return invalid("processing_timeout", "must be positive");
        }
        if self.tiers.large_threshold >= self.tiers.huge_threshold {
            return invalid("tiers", "large threshold must be below huge threshold");
        }
        if self.idle_gc.enabled && self.idle_gc.check_every.is_zero() {
            return invalid("idle_gc.check_every", "must be positive when idle gc is enabled");
        }
        if self.idle_gc.retain_percent > 100 {
            return invalid("idle_gc.retain_percent", "must be at most 100");
        }
        if self.max_record_bytes == 0 {
            return invalid("max_record_bytes", "must be positive");
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
