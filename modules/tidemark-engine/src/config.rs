use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;

/// Engine configuration. Loaded from a TOML file or from environment
/// variables; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Default audit-cache flush frequency for actions built from this config.
    pub flush_frequency: Option<u64>,
    /// Upper bound on ticks for `Scheduler::run_until_idle`.
    pub max_ticks: usize,
}

pub const DEFAULT_MAX_TICKS: usize = 1024;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_frequency: None,
            max_ticks: DEFAULT_MAX_TICKS,
        }
    }
}

impl EngineConfig {
    /// Load from `TIDEMARK_FLUSH_FREQUENCY` and `TIDEMARK_MAX_TICKS`.
    /// Unset variables keep their defaults; unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = optional_env("TIDEMARK_FLUSH_FREQUENCY") {
            config.flush_frequency = Some(
                raw.parse::<u64>()
                    .with_context(|| format!("TIDEMARK_FLUSH_FREQUENCY must be a number, got {raw:?}"))?,
            );
        }
        if let Some(raw) = optional_env("TIDEMARK_MAX_TICKS") {
            config.max_ticks = raw
                .parse::<usize>()
                .with_context(|| format!("TIDEMARK_MAX_TICKS must be a number, got {raw:?}"))?;
        }
        Ok(config)
    }

    pub fn log_summary(&self) {
        info!(
            flush_frequency = ?self.flush_frequency,
            max_ticks = self.max_ticks,
            "Engine config"
        );
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<EngineConfig> {
    let config: EngineConfig = toml::from_str(content)?;
    Ok(config)
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
