//! Engine tuning knobs, loadable from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::recovery::BackoffPolicy;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timing: TimingConfig,
    pub recovery: RecoveryConfig,
    pub buffer: BufferConfig,
    pub client: ClientConfig,
}

/// Timers for command correlation and liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Fixed delay after a command write before the response is taken.
    pub settle_ms: u64,
    /// Hard timeout used when the caller supplies none.
    pub command_timeout_ms: u64,
    pub min_command_timeout_ms: u64,
    pub max_command_timeout_ms: u64,
    /// Advisory pacing hint surfaced in status; never enforced here.
    pub default_delay_ms: u64,
    /// Socket idle timeout; firing counts as a transport fault.
    pub idle_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
}

/// Reconnection after unexpected loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the uniform random jitter added to each delay.
    pub jitter_ms: u64,
}

/// Memory bounds on inbound data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub ceiling_bytes: usize,
    pub decoder_chunk_cap: usize,
    pub subnegotiation_cap: usize,
}

/// How this client names itself during terminal-type negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub product: String,
    pub version: String,
    pub terminal_type: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            command_timeout_ms: 30_000,
            min_command_timeout_ms: 100,
            max_command_timeout_ms: 300_000,
            default_delay_ms: 1_000,
            idle_timeout_ms: 30_000,
            connect_timeout_ms: 30_000,
            keepalive_interval_ms: 15_000,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ms: 1_000,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            ceiling_bytes: 256 * 1024,
            decoder_chunk_cap: crate::protocol::decoder::DEFAULT_CHUNK_CAP,
            subnegotiation_cap: crate::protocol::decoder::DEFAULT_SUBNEG_CAP,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            product: "MUDLINK".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            terminal_type: "XTERM-256COLOR".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Clamp a caller-supplied command timeout into the configured range.
    pub fn command_timeout(&self, requested: Option<Duration>) -> Duration {
        let t = &self.timing;
        let min = t.min_command_timeout_ms.min(t.max_command_timeout_ms);
        let ms = requested
            .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
            .unwrap_or(t.command_timeout_ms)
            .clamp(min, t.max_command_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.timing.settle_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.timing.keepalive_interval_ms.max(1))
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.recovery.base_delay_ms),
            cap: Duration::from_millis(self.recovery.max_delay_ms),
            jitter: Duration::from_millis(self.recovery.jitter_ms),
            max_attempts: self.recovery.max_attempts,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&EngineConfig::default()).unwrap();
        assert!(text.contains("settle_ms"));
        assert!(text.contains("max_attempts"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: EngineConfig = toml::from_str("[timing]\nsettle_ms = 250\n").unwrap();
        assert_eq!(cfg.timing.settle_ms, 250);
        assert_eq!(cfg.timing.command_timeout_ms, 30_000);
        assert_eq!(cfg.buffer.ceiling_bytes, 256 * 1024);
    }

    #[test]
    fn command_timeout_is_clamped() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.command_timeout(None), Duration::from_secs(30));
        assert_eq!(
            cfg.command_timeout(Some(Duration::from_millis(1))),
            Duration::from_millis(100)
        );
        assert_eq!(
            cfg.command_timeout(Some(Duration::from_secs(3600))),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn missing_file_falls_back() {
        let cfg = EngineConfig::load(Path::new("/nonexistent/mudlink.toml"));
        assert_eq!(cfg.recovery.max_attempts, 3);
    }
}
