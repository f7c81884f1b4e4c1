use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use trove_store::StoreConfig;

/// The persisted `config.json` together with where it lives.
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    pub store: StoreConfig,
}

impl Config {
    /// Loads the config, writing the defaults first when the file does not exist yet.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(StoreConfig::default_path);

        if !path.exists() {
            let config = Self {
                path,
                store: StoreConfig::default(),
            };
            config.save().await?;
            return Ok(config);
        }

        let store = StoreConfig::load(&path)
            .await
            .wrap_err_with(|| format!("Failed to read configuration from {}", path.display()))?;
        Ok(Self { path, store })
    }

    pub async fn save(&self) -> Result<()> {
        self.store
            .save(&self.path)
            .await
            .wrap_err_with(|| format!("Failed to write configuration to {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sets a dotted key and rejects values that leave the config invalid.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.store.clone();
        updated.set_value(key, value)?;
        updated.validate()?;
        self.store = updated;
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        Ok(self.store.get_value(key)?)
    }

    pub fn show_all(&self) -> String {
        let value = |key: &str| {
            let value = self.store.get_value(key).unwrap_or_default();
            if value.is_empty() {
                "(not set)".to_string()
            } else {
                value
            }
        };

        format!(
            "Configuration ({}):\n\
             Paths:\n\
             ├─ install_dir: {}\n\
             ├─ cache_dir: {}\n\
             └─ search_paths: {}\n\
             Sources:\n\
             ├─ github.enabled: {}\n\
             ├─ github.topic: {}\n\
             └─ http.index_urls: {}\n\
             Registry:\n\
             ├─ source_timeout: {}s\n\
             ├─ cache_ttl: {}s\n\
             └─ cache_enabled: {}\n\
             Policy:\n\
             ├─ require_trusted_source: {}\n\
             ├─ scan_enabled: {}\n\
             ├─ scan_threshold: {}\n\
             └─ trusted_patterns: {}\n\
             Timeouts:\n\
             ├─ hooks.timeout: {}s\n\
             └─ scan.timeout: {}s\n\
             Publish:\n\
             └─ registry_repo: {}",
            self.path.display(),
            value("install_dir"),
            value("cache_dir"),
            value("search_paths"),
            value("github.enabled"),
            value("github.topic"),
            value("http.index_urls"),
            value("registry.source_timeout"),
            value("registry.cache_ttl"),
            value("registry.cache_enabled"),
            value("policy.require_trusted_source"),
            value("policy.scan_enabled"),
            value("policy.scan_threshold"),
            value("policy.trusted_patterns"),
            value("hooks.timeout"),
            value("scan.timeout"),
            value("publish.registry_repo"),
        )
    }

    pub async fn reset(&mut self) -> Result<()> {
        self.store = StoreConfig::default();
        self.save().await
    }
}
