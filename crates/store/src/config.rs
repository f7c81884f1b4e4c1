//! Persistent settings for a trove workspace and the wiring that turns them into a
//! registry, an installer and a manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{io_op, Result, StoreError};
use crate::installer::{HookRunner, Installer, DEFAULT_HOOK_TIMEOUT, DEFAULT_SCAN_TIMEOUT};
use crate::manager::CollectionManager;
use crate::publish::DEFAULT_REGISTRY_REPO;
use crate::registry::{duration_secs, Registry, RegistryConfig};
use crate::scanner::Severity;
use crate::sources::github::DEFAULT_TOPIC;
use crate::sources::LocalSource;
use crate::trust::SecurityPolicy;

pub const CONFIG_FILE: &str = "config.json";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "trove", "trove")
}

pub fn default_config_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".trove").join("config"))
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".trove").join("data"))
}

fn default_cache_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".trove").join("cache"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub install_dir: PathBuf,
    /// Clones of GitHub-hosted collections.
    pub cache_dir: PathBuf,
    /// Directories the local source walks for `collection.yaml`.
    pub search_paths: Vec<PathBuf>,
    pub github_enabled: bool,
    pub github_topic: String,
    /// JSON index documents served over HTTP(S).
    pub http_index_urls: Vec<String>,
    pub registry: RegistryConfig,
    pub policy: SecurityPolicy,
    #[serde(with = "duration_secs")]
    pub hook_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub scan_timeout: Duration,
    /// Registry repository publish targets, `owner/name`.
    pub registry_repo: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            install_dir: data_dir.join("collections"),
            cache_dir: default_cache_dir().join("sources"),
            search_paths: vec![data_dir.join("local")],
            github_enabled: true,
            github_topic: DEFAULT_TOPIC.to_string(),
            http_index_urls: Vec::new(),
            registry: RegistryConfig::default(),
            policy: SecurityPolicy::default(),
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            registry_repo: DEFAULT_REGISTRY_REPO.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn default_path() -> PathBuf {
        default_config_dir().join(CONFIG_FILE)
    }

    /// Reads the config at `path`, or the defaults when the file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(io_op("read config", path)(e)),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_op("create config directory", parent))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .map_err(io_op("write config", path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.install_dir.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfiguration(
                "install_dir must not be empty".to_string(),
            ));
        }
        if self.registry.source_timeout.is_zero() {
            return Err(StoreError::InvalidConfiguration(
                "registry.source_timeout must be at least one second".to_string(),
            ));
        }
        self.policy.validate()
    }

    /// Dotted keys accepted by [`StoreConfig::get_value`] and [`StoreConfig::set_value`].
    pub const KEYS: &'static [&'static str] = &[
        "install_dir",
        "cache_dir",
        "search_paths",
        "github.enabled",
        "github.topic",
        "http.index_urls",
        "registry.source_timeout",
        "registry.cache_ttl",
        "registry.cache_enabled",
        "policy.require_trusted_source",
        "policy.scan_enabled",
        "policy.scan_threshold",
        "policy.trusted_patterns",
        "policy.require_signatures",
        "policy.allow_unsigned",
        "policy.signing_key",
        "hooks.timeout",
        "scan.timeout",
        "publish.registry_repo",
    ];

    pub fn get_value(&self, key: &str) -> Result<String> {
        let join_paths = |paths: &[PathBuf]| {
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        let value = match key {
            "install_dir" => self.install_dir.display().to_string(),
            "cache_dir" => self.cache_dir.display().to_string(),
            "search_paths" => join_paths(&self.search_paths),
            "github.enabled" => self.github_enabled.to_string(),
            "github.topic" => self.github_topic.clone(),
            "http.index_urls" => self.http_index_urls.join(","),
            "registry.source_timeout" => self.registry.source_timeout.as_secs().to_string(),
            "registry.cache_ttl" => self.registry.cache_ttl.as_secs().to_string(),
            "registry.cache_enabled" => self.registry.cache_enabled.to_string(),
            "policy.require_trusted_source" => self.policy.require_trusted_source.to_string(),
            "policy.scan_enabled" => self.policy.scan_enabled.to_string(),
            "policy.scan_threshold" => self.policy.scan_threshold.to_string(),
            "policy.trusted_patterns" => self.policy.trusted_patterns.join(","),
            "policy.require_signatures" => self.policy.require_signatures.to_string(),
            "policy.allow_unsigned" => self.policy.allow_unsigned.to_string(),
            "policy.signing_key" => self
                .policy
                .signing_key
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            "hooks.timeout" => self.hook_timeout.as_secs().to_string(),
            "scan.timeout" => self.scan_timeout.as_secs().to_string(),
            "publish.registry_repo" => self.registry_repo.clone(),
            _ => return Err(unknown_key(key)),
        };
        Ok(value)
    }

    /// Sets one value from its string form. Lists are comma-separated.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "install_dir" => self.install_dir = PathBuf::from(value),
            "cache_dir" => self.cache_dir = PathBuf::from(value),
            "search_paths" => self.search_paths = split_list(value).map(PathBuf::from).collect(),
            "github.enabled" => self.github_enabled = parse_bool(key, value)?,
            "github.topic" => self.github_topic = value.trim().to_string(),
            "http.index_urls" => self.http_index_urls = split_list(value).map(String::from).collect(),
            "registry.source_timeout" => self.registry.source_timeout = parse_secs(key, value)?,
            "registry.cache_ttl" => self.registry.cache_ttl = parse_secs(key, value)?,
            "registry.cache_enabled" => self.registry.cache_enabled = parse_bool(key, value)?,
            "policy.require_trusted_source" => {
                self.policy.require_trusted_source = parse_bool(key, value)?
            }
            "policy.scan_enabled" => self.policy.scan_enabled = parse_bool(key, value)?,
            "policy.scan_threshold" => self.policy.scan_threshold = value.parse::<Severity>()?,
            "policy.trusted_patterns" => {
                self.policy.trusted_patterns = split_list(value).map(String::from).collect()
            }
            "policy.require_signatures" => self.policy.require_signatures = parse_bool(key, value)?,
            "policy.allow_unsigned" => self.policy.allow_unsigned = parse_bool(key, value)?,
            "policy.signing_key" => {
                let value = value.trim();
                self.policy.signing_key = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "hooks.timeout" => self.hook_timeout = parse_secs(key, value)?,
            "scan.timeout" => self.scan_timeout = parse_secs(key, value)?,
            "publish.registry_repo" => self.registry_repo = value.trim().to_string(),
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    /// A registry with the local source and, when enabled, the GitHub and HTTP sources.
    pub fn build_registry(&self, github_token: Option<String>) -> Result<Registry> {
        let mut registry = Registry::new(self.registry.clone())
            .with_source(Arc::new(LocalSource::new(self.search_paths.clone())));

        #[cfg(feature = "github")]
        if self.github_enabled {
            let source = crate::sources::GitHubSource::new(
                &self.cache_dir,
                github_token,
                self.registry.source_timeout,
            )?
            .with_topic(&self.github_topic);
            registry.add_source(Arc::new(source));
        }
        #[cfg(not(feature = "github"))]
        let _ = github_token;

        #[cfg(feature = "http")]
        {
            let source =
                crate::sources::HttpSource::new(self.http_index_urls.clone(), self.registry.source_timeout)?;
            registry.add_source(Arc::new(source));
        }

        Ok(registry)
    }

    pub async fn build_installer(&self, registry: Arc<Registry>) -> Result<Installer> {
        Installer::new(registry, &self.install_dir)
            .await?
            .with_policy(self.policy.clone())
            .map(|installer| {
                installer
                    .with_scan_timeout(self.scan_timeout)
                    .with_hook_runner(HookRunner::new(self.hook_timeout))
            })
    }

    /// Registry, installer and manager in one step. The manager gets a GitHub
    /// publisher when the `github` feature is on.
    pub async fn build_manager(&self, github_token: Option<String>) -> Result<CollectionManager> {
        self.validate()?;
        let registry = Arc::new(self.build_registry(github_token)?);
        let installer = Arc::new(self.build_installer(registry).await?);
        let manager = CollectionManager::new(installer);

        #[cfg(feature = "github")]
        let manager = manager.with_publisher(
            crate::publish::Publisher::github(self.registry.source_timeout)?
                .with_scanner(crate::scanner::SecurityScanner::new().with_threshold(self.policy.scan_threshold)),
        );

        Ok(manager)
    }
}

fn unknown_key(key: &str) -> StoreError {
    StoreError::InvalidConfiguration(format!(
        "unknown configuration key '{}' (known keys: {})",
        key,
        StoreConfig::KEYS.join(", ")
    ))
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .trim()
        .parse::<bool>()
        .map_err(|_| StoreError::InvalidConfiguration(format!("{} expects true or false, got '{}'", key, value)))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| StoreError::InvalidConfiguration(format!("{} expects whole seconds, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_yields_defaults_and_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(CONFIG_FILE);

        let mut config = StoreConfig::load(&path).await.unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.registry.cache_ttl, Duration::from_secs(15 * 60));

        config.set_value("registry.source_timeout", "5").unwrap();
        config.set_value("http.index_urls", "https://a.example/index.json, https://b.example/index.json").unwrap();
        config.save(&path).await.unwrap();

        let loaded = StoreConfig::load(&path).await.unwrap();
        assert_eq!(loaded.registry.source_timeout, Duration::from_secs(5));
        assert_eq!(loaded.http_index_urls.len(), 2);
    }

    #[test]
    fn test_every_key_reads_back() {
        let config = StoreConfig::default();
        for key in StoreConfig::KEYS {
            assert!(config.get_value(key).is_ok(), "key {} is not readable", key);
        }
        assert!(config.get_value("storage.path").is_err());
    }

    #[test]
    fn test_set_value_rejects_bad_input() {
        let mut config = StoreConfig::default();
        assert!(config.set_value("github.enabled", "maybe").is_err());
        assert!(config.set_value("scan.timeout", "-1").is_err());
        assert!(config.set_value("nope", "1").is_err());

        config.set_value("policy.scan_threshold", "high").unwrap();
        assert_eq!(config.policy.scan_threshold, Severity::High);
    }

    #[test]
    fn test_signature_keys() {
        let mut config = StoreConfig::default();
        config.set_value("policy.require_signatures", "true").unwrap();
        assert!(config.validate().is_err());

        config.set_value("policy.allow_unsigned", "false").unwrap();
        config.set_value("policy.signing_key", "/etc/trove/allowed_signers").unwrap();
        config.validate().unwrap();
        assert_eq!(config.get_value("policy.signing_key").unwrap(), "/etc/trove/allowed_signers");

        config.set_value("policy.signing_key", " ").unwrap();
        assert!(config.policy.signing_key.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"github_enabled": false}"#).unwrap();
        assert!(!config.github_enabled);
        assert_eq!(config.registry_repo, DEFAULT_REGISTRY_REPO);
    }

    #[tokio::test]
    async fn test_build_installer_uses_install_dir() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = StoreConfig::default();
        config.install_dir = temp_dir.path().join("collections");
        config.search_paths = vec![temp_dir.path().join("local")];
        config.github_enabled = false;

        let registry = Arc::new(config.build_registry(None).unwrap());
        assert!(registry.source_names().contains(&"local"));
        let installer = config.build_installer(registry).await.unwrap();
        assert_eq!(installer.install_dir(), config.install_dir.as_path());
    }
}
