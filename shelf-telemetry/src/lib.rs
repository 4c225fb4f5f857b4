//! Structured logging setup for prompt-shelf binaries.
//!
//! Library crates only emit `tracing` events; an application calls
//! [`init`] once to route them to stderr.

#![warn(missing_docs, clippy::pedantic)]

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset and none is configured.
pub const DEFAULT_FILTER: &str = "info";

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive, e.g. `info,shelf_state=debug`.
    pub filter: String,
    /// Include the event target (module path) in each line.
    pub with_target: bool,
    /// Emit ANSI colours.
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_owned(),
            with_target: false,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Creates a configuration with the supplied filter directive.
    #[must_use]
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..Self::default()
        }
    }

    /// Toggles target display.
    #[must_use]
    pub const fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Toggles ANSI colours.
    #[must_use]
    pub const fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    /// Parses the filter, letting `RUST_LOG` take precedence when set.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured directive is malformed.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.filter)
            .with_context(|| format!("invalid log filter `{}`", self.filter))
    }
}

/// Installs the global fmt subscriber.
///
/// # Errors
///
/// Returns an error if the filter is malformed or a global subscriber is
/// already installed.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let filter = config.env_filter()?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?;
    tracing::debug!(filter = %config.filter, "telemetry initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_directive() {
        let config = TelemetryConfig::new("shelf_state=loud");
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(config.env_filter().is_err());
        }
    }

    #[test]
    fn second_install_fails_cleanly() {
        let config = TelemetryConfig::default().with_ansi(false);
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
