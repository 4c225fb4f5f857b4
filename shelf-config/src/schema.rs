//! Strongly typed configuration schema.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail, ensure};
use serde::{Deserialize, Serialize};
use shelf_primitives::SortOption;
use shelf_state::{DEFAULT_MAX_IN_FLIGHT, DispatchConfig, LibraryConfig};

/// Filter directive used when none is configured.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Request timeout, in seconds, for the remote backends.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

const fn default_max_in_flight() -> NonZeroUsize {
    DEFAULT_MAX_IN_FLIGHT
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShelfConfig {
    /// Which backend persists the library.
    #[serde(default)]
    pub backend: BackendConfig,
    /// `EnvFilter` directive handed to the telemetry layer.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Upper bound on gateway calls in flight.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: NonZeroUsize,
    /// Sort applied before the user picks one.
    #[serde(default)]
    pub default_sort: SortOption,
}

impl Default for ShelfConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            log_filter: default_log_filter(),
            max_in_flight: default_max_in_flight(),
            default_sort: SortOption::default(),
        }
    }
}

impl ShelfConfig {
    /// Checks values serde cannot reject on its own.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.log_filter.trim().is_empty(),
            "log_filter must not be blank"
        );
        self.backend.validate()
    }

    /// Library tunables derived from this configuration.
    #[must_use]
    pub fn library_config(&self) -> LibraryConfig {
        LibraryConfig::default()
            .with_dispatch(DispatchConfig::new(self.max_in_flight))
            .with_default_sort(self.default_sort)
    }
}

/// Backend selection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum BackendConfig {
    /// JSON documents on disk, or memory only when `data_dir` is absent.
    Local {
        /// Directory holding `library.json` and `users.json`.
        #[serde(default)]
        data_dir: Option<PathBuf>,
    },
    /// Generic REST API.
    Rest {
        /// API root, e.g. `https://api.example.com`.
        base_url: String,
        /// Per-request timeout.
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Hosted database with a PostgREST-style interface.
    Hosted {
        /// Project URL.
        url: String,
        /// Public API key sent on every request.
        anon_key: String,
        /// Per-request timeout.
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Local { data_dir: None }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { data_dir } => {
                f.debug_struct("Local").field("data_dir", data_dir).finish()
            }
            Self::Rest {
                base_url,
                timeout_secs,
            } => f
                .debug_struct("Rest")
                .field("base_url", base_url)
                .field("timeout_secs", timeout_secs)
                .finish(),
            Self::Hosted {
                url, timeout_secs, ..
            } => f
                .debug_struct("Hosted")
                .field("url", url)
                .field("anon_key", &"<redacted>")
                .field("timeout_secs", timeout_secs)
                .finish(),
        }
    }
}

impl BackendConfig {
    /// Short label used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Rest { .. } => "rest",
            Self::Hosted { .. } => "hosted",
        }
    }

    /// Request timeout for remote backends; `None` for local.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Local { .. } => None,
            Self::Rest { timeout_secs, .. } | Self::Hosted { timeout_secs, .. } => {
                Some(Duration::from_secs(*timeout_secs))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Local { data_dir } => {
                if data_dir.as_ref().is_some_and(|dir| dir.as_os_str().is_empty()) {
                    bail!("backend.data_dir must not be empty");
                }
            }
            Self::Rest {
                base_url,
                timeout_secs,
            } => {
                ensure!(!base_url.trim().is_empty(), "backend.base_url must not be blank");
                ensure!(*timeout_secs > 0, "backend.timeout_secs must be positive");
            }
            Self::Hosted {
                url,
                anon_key,
                timeout_secs,
            } => {
                ensure!(!url.trim().is_empty(), "backend.url must not be blank");
                ensure!(!anon_key.trim().is_empty(), "backend.anon_key must not be blank");
                ensure!(*timeout_secs > 0, "backend.timeout_secs must be positive");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ShelfConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ShelfConfig::default());
        assert_eq!(config.backend, BackendConfig::Local { data_dir: None });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tagged_backend_parses() {
        let config: ShelfConfig = serde_json::from_str(
            r#"{
                "backend": { "kind": "hosted", "url": "https://x.example", "anon_key": "k" },
                "default_sort": "alphabetical",
                "max_in_flight": 4
            }"#,
        )
        .unwrap();
        assert_eq!(config.backend.kind(), "hosted");
        assert_eq!(config.backend.timeout(), Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)));
        assert_eq!(config.default_sort, SortOption::Alphabetical);

        let library = config.library_config();
        assert_eq!(library.dispatch().max_in_flight().get(), 4);
        assert_eq!(library.default_sort(), SortOption::Alphabetical);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_str::<ShelfConfig>(r#"{ "backend": { "kind": "ftp" } }"#);
        assert!(err.is_err());
        let err = serde_json::from_str::<ShelfConfig>(r#"{ "colour": "blue" }"#);
        assert!(err.is_err());
    }

    #[test]
    fn validation_flags_blank_values() {
        let config = ShelfConfig {
            backend: BackendConfig::Rest {
                base_url: " ".into(),
                timeout_secs: 5,
            },
            ..ShelfConfig::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("base_url"));

        let config = ShelfConfig {
            backend: BackendConfig::Hosted {
                url: "https://x.example".into(),
                anon_key: "k".into(),
                timeout_secs: 0,
            },
            ..ShelfConfig::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("timeout_secs"));
    }

    #[test]
    fn debug_hides_the_key() {
        let backend = BackendConfig::Hosted {
            url: "https://x.example".into(),
            anon_key: "super-secret".into(),
            timeout_secs: 1,
        };
        assert!(!format!("{backend:?}").contains("super-secret"));
    }
}
