//! Runtime configuration
//!
//! Defaults, overridden by `GENSTATUS_*` environment variables (the binary
//! loads `.env` first), overridden in turn by command-line flags.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::PhaseCatalog;
use crate::gate::GateConfig;

pub const ENV_BASE_URL: &str = "GENSTATUS_BASE_URL";
pub const ENV_WS_URL: &str = "GENSTATUS_WS_URL";
pub const ENV_POLL_INTERVAL_MS: &str = "GENSTATUS_POLL_INTERVAL_MS";
pub const ENV_GATE_MIN_DELAY_MS: &str = "GENSTATUS_GATE_MIN_DELAY_MS";
pub const ENV_GATE_MAX_DELAY_MS: &str = "GENSTATUS_GATE_MAX_DELAY_MS";
pub const ENV_GATE_MAX_ATTEMPTS: &str = "GENSTATUS_GATE_MAX_ATTEMPTS";
pub const ENV_CATALOG: &str = "GENSTATUS_CATALOG";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "GENSTATUS_CONNECT_TIMEOUT_MS";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub base_url: String,
    pub ws_url: String,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub gate: GateConfig,
    /// Explicit catalog file; `None` falls back to the user config dir
    pub catalog_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ws_url: ws_url_for(DEFAULT_BASE_URL),
            poll_interval: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(5000),
            gate: GateConfig::default(),
            catalog_path: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(base_url) = lookup(ENV_BASE_URL) {
            config = config.with_base_url(base_url);
        }
        if let Some(ws_url) = lookup(ENV_WS_URL) {
            config.ws_url = ws_url.trim_end_matches('/').to_string();
        }
        if let Some(ms) = lookup(ENV_POLL_INTERVAL_MS) {
            config.poll_interval = parse_millis(ENV_POLL_INTERVAL_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout = parse_millis(ENV_CONNECT_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_GATE_MIN_DELAY_MS) {
            config.gate.min_delay = parse_millis(ENV_GATE_MIN_DELAY_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_GATE_MAX_DELAY_MS) {
            config.gate.max_delay = parse_millis(ENV_GATE_MAX_DELAY_MS, &ms)?;
        }
        if let Some(attempts) = lookup(ENV_GATE_MAX_ATTEMPTS) {
            config.gate.max_attempts = attempts
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number", ENV_GATE_MAX_ATTEMPTS))?;
        }
        if let Some(path) = lookup(ENV_CATALOG) {
            config.catalog_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.poll_interval.is_zero(),
            "poll interval must be at least 1 ms ({} or --poll-interval-ms)",
            ENV_POLL_INTERVAL_MS
        );
        Ok(())
    }

    /// Point at another backend; the push URL follows the new base
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self.ws_url = ws_url_for(&self.base_url);
        self
    }

    /// Catalog from the configured file, the user config dir, or built in
    pub fn load_catalog(&self) -> Result<PhaseCatalog> {
        if let Some(path) = &self.catalog_path {
            return PhaseCatalog::load(path);
        }

        match PhaseCatalog::default_path().filter(|path| path.exists()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using catalog from config dir");
                PhaseCatalog::load(&path)
            }
            None => Ok(PhaseCatalog::survey_generation()),
        }
    }
}

/// `http(s)://` base URL to its `ws(s)://` counterpart
pub fn ws_url_for(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    let ms: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a number of milliseconds, got '{}'", key, value))?;
    Ok(Duration::from_millis(ms))
}
