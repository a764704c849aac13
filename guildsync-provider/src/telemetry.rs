//! Tracing subscriber initialisation.
//!
//! Library crates only emit `tracing` events. Binaries embedding the
//! provider call [`init_tracing`] once at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "guildsync=info";

/// Error installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to init subscriber: {reason}")]
    SubscriberInit { reason: String },
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive, e.g. `guildsync=debug,info`.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Read `GUILDSYNC_LOG` and `GUILDSYNC_LOG_JSON`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let filter = lookup("GUILDSYNC_LOG")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let json = lookup("GUILDSYNC_LOG_JSON")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);
        Self { filter, json }
    }

    fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        EnvFilter::try_new(&self.filter).map_err(|e| TelemetryError::InvalidFilter {
            filter: self.filter.clone(),
            reason: e.to_string(),
        })
    }
}

/// Install the global tracing subscriber.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = config.env_filter()?;
    let json_layer = config.json.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!config.json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit {
            reason: e.to_string(),
        })?;

    tracing::info!(filter = %config.filter, json = config.json, "Telemetry initialized");
    Ok(())
}
