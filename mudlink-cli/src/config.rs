//! Driver configuration: the engine tuning plus logging and identity.

use std::path::Path;

use mudlink_core::{ClientIdentity, EngineConfig, StaticIdentity};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Engine timing, recovery and buffer limits.
    pub engine: EngineConfig,
    /// Logging.
    pub logging: LoggingConfig,
    /// Who is driving the session.
    pub identity: IdentityConfig,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, overridden by `RUST_LOG`.
    pub level: String,
    /// Also log every session event.
    pub events: bool,
}

/// Identity advertised in the first terminal-type answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub name: String,
    pub version: String,
    pub provider: String,
    /// Refuse to connect until `name` is set.
    pub required: bool,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            events: true,
        }
    }
}

impl IdentityConfig {
    /// The gate handed to the engine.
    pub fn gate(&self) -> StaticIdentity {
        if !self.name.is_empty() {
            StaticIdentity::identified(ClientIdentity {
                name: self.name.clone(),
                version: self.version.clone(),
                provider: self.provider.clone(),
            })
        } else if self.required {
            StaticIdentity::unidentified()
        } else {
            StaticIdentity::anonymous()
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load from a TOML file, falling back to defaults.
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

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────
