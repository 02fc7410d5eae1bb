//! Session configuration.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TUNMUX_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tunmux/config.toml
//!   3. ~/.config/tunmux/config.toml
//!
//! The timing values are part of the protocol contract. Both peers of a
//! session should run with the same ping interval, or the slower side's
//! liveness deadline will misjudge the faster one.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{
    IDLE_CLOSE_SECS, LIVENESS_MULTIPLIER, LOOKUP_TIMEOUT_SECS, PING_INTERVAL_SECS,
    STREAM_QUEUE_CAPACITY,
};

/// Upper bounds enforced by `validate`. Anything longer is a typo, and
/// larger values stop fitting in timer arithmetic.
pub const MAX_PING_INTERVAL_SECS: u64 = 86_400;
pub const MAX_LIVENESS_MULTIPLIER: u32 = 1_000;
pub const MAX_TIMER_SECS: u64 = 30 * 86_400;

/// What the dispatch loop does when a stream's inbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the frame and remove the stream. Other streams are unaffected.
    #[default]
    DropStream,
    /// Drop the frame, remove the stream, and close the whole session.
    CloseSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay between receiving a liveness signal and answering with a PING.
    pub ping_interval_secs: u64,
    /// Liveness deadline, in ping intervals.
    pub liveness_multiplier: u32,
    /// How long a session with no streams stays open.
    pub idle_close_secs: u64,
    /// Inbound frames buffered per stream.
    pub queue_capacity: usize,
    /// Timeout for hostname lookups served on behalf of the peer.
    pub lookup_timeout_secs: u64,
    pub overflow_policy: OverflowPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: PING_INTERVAL_SECS,
            liveness_multiplier: LIVENESS_MULTIPLIER,
            idle_close_secs: IDLE_CLOSE_SECS,
            queue_capacity: STREAM_QUEUE_CAPACITY,
            lookup_timeout_secs: LOOKUP_TIMEOUT_SECS,
            overflow_policy: OverflowPolicy::DropStream,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("tunmux")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SessionConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml_str(&text)?
        } else {
            SessionConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TUNMUX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid("ping_interval_secs must be positive"));
        }
        if self.ping_interval_secs > MAX_PING_INTERVAL_SECS {
            return Err(ConfigError::Invalid("ping_interval_secs is longer than a day"));
        }
        if self.liveness_multiplier == 0 {
            return Err(ConfigError::Invalid("liveness_multiplier must be positive"));
        }
        if self.liveness_multiplier > MAX_LIVENESS_MULTIPLIER {
            return Err(ConfigError::Invalid("liveness_multiplier is above 1000"));
        }
        if self.idle_close_secs > MAX_TIMER_SECS {
            return Err(ConfigError::Invalid("idle_close_secs is longer than 30 days"));
        }
        if self.lookup_timeout_secs > MAX_TIMER_SECS {
            return Err(ConfigError::Invalid("lookup_timeout_secs is longer than 30 days"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive"));
        }
        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Silence longer than this closes the session. Saturates rather than
    /// overflowing on a config that skipped `validate`.
    pub fn liveness_deadline(&self) -> Duration {
        self.ping_interval().saturating_mul(self.liveness_multiplier)
    }

    pub fn idle_close(&self) -> Duration {
        Duration::from_secs(self.idle_close_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    /// Apply TUNMUX_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("TUNMUX_PING_INTERVAL_SECS") {
            self.ping_interval_secs = v;
        }
        if let Some(v) = env_parse("TUNMUX_LIVENESS_MULTIPLIER") {
            self.liveness_multiplier = v;
        }
        if let Some(v) = env_parse("TUNMUX_IDLE_CLOSE_SECS") {
            self.idle_close_secs = v;
        }
        if let Some(v) = env_parse("TUNMUX_QUEUE_CAPACITY") {
            self.queue_capacity = v;
        }
        if let Some(v) = env_parse("TUNMUX_LOOKUP_TIMEOUT_SECS") {
            self.lookup_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("TUNMUX_OVERFLOW_POLICY") {
            match v.as_str() {
                "drop_stream" => self.overflow_policy = OverflowPolicy::DropStream,
                "close_session" => self.overflow_policy = OverflowPolicy::CloseSession,
                _ => {}
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
