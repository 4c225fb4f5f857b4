//! Configuration loaders and backend wiring.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use shelf_gateway::{
    AuthProvider, CredentialStore, HostedAuthProvider, HostedConfig, HostedStore, LIBRARY_FILE,
    LocalAuthProvider, LocalStore, PromptStore, RestAuthProvider, RestConfig, RestStore,
    USERS_FILE,
};
use shelf_primitives::SortOption;
use tracing::{debug, info};

use crate::schema::{BackendConfig, DEFAULT_TIMEOUT_SECS, ShelfConfig};

/// Prefix shared by every recognised environment variable.
pub const ENV_PREFIX: &str = "PROMPT_SHELF_";

/// Reads and validates a JSON configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid JSON for
/// [`ShelfConfig`], or fails [`ShelfConfig::validate`].
pub fn from_path(path: impl AsRef<Path>) -> Result<ShelfConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: ShelfConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    config.validate()?;
    debug!(path = %path.display(), backend = config.backend.kind(), "loaded config file");
    Ok(config)
}

/// Builds a configuration from the process environment.
///
/// See [`from_lookup`] for the recognised variables.
///
/// # Errors
///
/// Propagates any error from [`from_lookup`].
pub fn from_env() -> Result<ShelfConfig> {
    from_lookup(|key| std::env::var(key).ok())
}

/// Builds a configuration from an arbitrary key lookup.
///
/// `PROMPT_SHELF_CONFIG` names a JSON file used as the base; the remaining
/// variables override it:
///
/// | Variable | Meaning |
/// |---|---|
/// | `PROMPT_SHELF_BACKEND` | `local`, `rest`, or `hosted` |
/// | `PROMPT_SHELF_DATA_DIR` | local data directory |
/// | `PROMPT_SHELF_API_URL` | REST base URL |
/// | `PROMPT_SHELF_HOSTED_URL` | hosted project URL |
/// | `PROMPT_SHELF_ANON_KEY` | hosted public key |
/// | `PROMPT_SHELF_TIMEOUT_SECS` | remote request timeout |
/// | `PROMPT_SHELF_LOG` | log filter directive |
/// | `PROMPT_SHELF_MAX_IN_FLIGHT` | gateway concurrency |
/// | `PROMPT_SHELF_SORT` | initial sort option |
///
/// Backend-specific variables are read only when `PROMPT_SHELF_BACKEND` is set.
///
/// # Errors
///
/// Returns an error on unparsable values, a missing required variable, or a
/// configuration that fails validation.
pub fn from_lookup<F>(lookup: F) -> Result<ShelfConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| {
        lookup(&format!("{ENV_PREFIX}{name}")).filter(|value| !value.trim().is_empty())
    };

    let mut config = match var("CONFIG") {
        Some(path) => from_path(path)?,
        None => ShelfConfig::default(),
    };

    if let Some(kind) = var("BACKEND") {
        let timeout_secs = match var("TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{ENV_PREFIX}TIMEOUT_SECS is not a number: `{raw}`"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        let required = |name: &str| {
            var(name)
                .ok_or_else(|| anyhow!("{ENV_PREFIX}{name} is required for the {kind} backend"))
        };
        config.backend = match kind.trim().to_ascii_lowercase().as_str() {
            "local" => BackendConfig::Local {
                data_dir: var("DATA_DIR").map(PathBuf::from),
            },
            "rest" => BackendConfig::Rest {
                base_url: required("API_URL")?,
                timeout_secs,
            },
            "hosted" => BackendConfig::Hosted {
                url: required("HOSTED_URL")?,
                anon_key: required("ANON_KEY")?,
                timeout_secs,
            },
            other => bail!("{ENV_PREFIX}BACKEND has unknown value `{other}`"),
        };
    }

    if let Some(filter) = var("LOG") {
        config.log_filter = filter;
    }
    if let Some(raw) = var("MAX_IN_FLIGHT") {
        config.max_in_flight = raw.trim().parse::<NonZeroUsize>().with_context(|| {
            format!("{ENV_PREFIX}MAX_IN_FLIGHT must be a positive integer: `{raw}`")
        })?;
    }
    if let Some(raw) = var("SORT") {
        config.default_sort = raw.parse::<SortOption>()?;
    }

    config.validate()?;
    Ok(config)
}

/// A connected store and auth provider sharing one credential store.
#[derive(Clone)]
pub struct Backend {
    /// Persistence for prompts, collections, and tags.
    pub store: Arc<dyn PromptStore>,
    /// Sign-in, sign-up, and session handling.
    pub auth: Arc<dyn AuthProvider>,
    /// Session credentials both halves read.
    pub credentials: CredentialStore,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("store", self.store.metadata())
            .field("signed_in", &self.credentials.is_signed_in())
            .finish_non_exhaustive()
    }
}

/// Instantiates the backend selected by `config`.
///
/// # Errors
///
/// Returns an error if a local data file is unreadable or a remote URL is
/// malformed.
pub async fn connect(config: &ShelfConfig) -> Result<Backend> {
    config.validate()?;
    let credentials = CredentialStore::new();

    let (store, auth): (Arc<dyn PromptStore>, Arc<dyn AuthProvider>) = match &config.backend {
        BackendConfig::Local { data_dir: None } => (
            Arc::new(LocalStore::in_memory(credentials.clone())),
            Arc::new(LocalAuthProvider::in_memory(credentials.clone())),
        ),
        BackendConfig::Local {
            data_dir: Some(dir),
        } => {
            let store = LocalStore::open(dir.join(LIBRARY_FILE), credentials.clone())
                .await
                .with_context(|| format!("failed to open library in {}", dir.display()))?;
            let auth = LocalAuthProvider::open(dir.join(USERS_FILE), credentials.clone())
                .await
                .with_context(|| format!("failed to open accounts in {}", dir.display()))?;
            (Arc::new(store), Arc::new(auth))
        }
        BackendConfig::Rest { base_url, .. } => {
            let mut rest = RestConfig::new(base_url).context("invalid REST base URL")?;
            if let Some(timeout) = config.backend.timeout() {
                rest = rest.with_timeout(timeout);
            }
            (
                Arc::new(RestStore::new(&rest, credentials.clone())?),
                Arc::new(RestAuthProvider::new(&rest, credentials.clone())?),
            )
        }
        BackendConfig::Hosted { url, anon_key, .. } => {
            let mut hosted =
                HostedConfig::new(url, anon_key.clone()).context("invalid hosted backend")?;
            if let Some(timeout) = config.backend.timeout() {
                hosted = hosted.with_timeout(timeout);
            }
            (
                Arc::new(HostedStore::new(&hosted, credentials.clone())?),
                Arc::new(HostedAuthProvider::new(&hosted, credentials.clone())?),
            )
        }
    };

    info!(
        backend = config.backend.kind(),
        endpoint = store.metadata().endpoint().unwrap_or("memory"),
        "backend connected"
    );
    Ok(Backend {
        store,
        auth,
        credentials,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use uuid::Uuid;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("shelf-config-{}-{name}", Uuid::new_v4()))
    }

    #[test]
    fn empty_environment_is_in_memory_local() {
        let config = from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ShelfConfig::default());
    }

    #[test]
    fn environment_selects_hosted_backend() {
        let config = from_lookup(lookup(&[
            ("PROMPT_SHELF_BACKEND", "Hosted"),
            ("PROMPT_SHELF_HOSTED_URL", "https://demo.example"),
            ("PROMPT_SHELF_ANON_KEY", "public"),
            ("PROMPT_SHELF_TIMEOUT_SECS", "7"),
            ("PROMPT_SHELF_SORT", "updated"),
            ("PROMPT_SHELF_MAX_IN_FLIGHT", "3"),
        ]))
        .unwrap();

        assert_eq!(
            config.backend,
            BackendConfig::Hosted {
                url: "https://demo.example".into(),
                anon_key: "public".into(),
                timeout_secs: 7,
            }
        );
        assert_eq!(config.default_sort, SortOption::Updated);
        assert_eq!(config.max_in_flight.get(), 3);
    }

    #[test]
    fn missing_required_variable_is_named() {
        let err = from_lookup(lookup(&[("PROMPT_SHELF_BACKEND", "rest")])).unwrap_err();
        assert!(err.to_string().contains("PROMPT_SHELF_API_URL"));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(from_lookup(lookup(&[("PROMPT_SHELF_MAX_IN_FLIGHT", "0")])).is_err());
        assert!(
            from_lookup(lookup(&[
                ("PROMPT_SHELF_BACKEND", "rest"),
                ("PROMPT_SHELF_API_URL", "https://api.example"),
                ("PROMPT_SHELF_TIMEOUT_SECS", "soon"),
            ]))
            .is_err()
        );
        assert!(from_lookup(lookup(&[("PROMPT_SHELF_BACKEND", "ftp")])).is_err());
    }

    #[test]
    fn environment_overrides_config_file() {
        let path = temp_path("config.json");
        std::fs::write(
            &path,
            r#"{
                "backend": { "kind": "rest", "base_url": "https://api.example" },
                "log_filter": "warn"
            }"#,
        )
        .unwrap();

        let config = from_lookup(lookup(&[
            ("PROMPT_SHELF_CONFIG", path.to_str().unwrap()),
            ("PROMPT_SHELF_LOG", "debug,shelf_state=trace"),
        ]))
        .unwrap();
        assert_eq!(config.backend.kind(), "rest");
        assert_eq!(config.log_filter, "debug,shelf_state=trace");

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn unreadable_file_reports_path() {
        let path = temp_path("missing.json");
        let err = from_path(&path).unwrap_err();
        assert!(format!("{err:#}").contains(&path.display().to_string()));
    }

    #[tokio::test]
    async fn connect_local_persists_under_data_dir() {
        let dir = temp_path("data");
        let config = ShelfConfig {
            backend: BackendConfig::Local {
                data_dir: Some(dir.clone()),
            },
            ..ShelfConfig::default()
        };

        let backend = connect(&config).await.unwrap();
        backend
            .auth
            .sign_up("ada", "ada@example.com", "lovelace")
            .await
            .unwrap();
        assert!(backend.credentials.is_signed_in());
        assert!(dir.join(USERS_FILE).exists());
        assert_eq!(backend.store.metadata().backend(), "local");

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn connect_rejects_malformed_url() {
        let config = ShelfConfig {
            backend: BackendConfig::Rest {
                base_url: "not a url".into(),
                timeout_secs: 5,
            },
            ..ShelfConfig::default()
        };
        assert!(connect(&config).await.is_err());
    }
}
