//! Durable store of install records.
//!
//! Records live in `<install_dir>/.installed.json`. The previous file is copied to
//! `.installed.json.backup` before every save and is read back if the primary file is
//! unreadable or corrupt.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{io_op, Result, StoreError};
use crate::manifest::Manifest;

pub const RECORDS_FILE: &str = ".installed.json";
pub const RECORDS_BACKUP_FILE: &str = ".installed.json.backup";
const RECORDS_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    #[default]
    Installed,
    Failed,
}

impl std::fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallStatus::Installed => f.write_str("installed"),
            InstallStatus::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub name: String,
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRecord {
    /// `author/name`
    pub id: String,
    pub version: String,
    pub uri: String,
    #[serde(default)]
    pub source_name: String,
    pub installed_at: DateTime<Utc>,
    pub install_location: PathBuf,
    /// `algorithm:hex` digest of the installed directory.
    pub checksum: String,
    /// IDs of the collections this one declared as dependencies. A dependency that
    /// could not be resolved to an ID is kept as its URI.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: InstallStatus,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

impl InstallRecord {
    pub fn new(
        manifest: &Manifest,
        uri: &str,
        source_name: &str,
        install_location: PathBuf,
        checksum: String,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            id: manifest.id(),
            version: manifest.version.clone(),
            uri: uri.to_string(),
            source_name: source_name.to_string(),
            installed_at: Utc::now(),
            install_location,
            checksum,
            dependencies,
            status: InstallStatus::Installed,
            metadata: RecordMetadata {
                name: manifest.name.clone(),
                author: manifest.author.clone(),
                description: manifest.description.clone(),
                category: manifest.category.clone(),
                tags: manifest.tags.clone(),
            },
        }
    }

    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.iter().any(|dep| dep == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordsFile {
    version: String,
    last_updated: DateTime<Utc>,
    records: BTreeMap<String, InstallRecord>,
}

impl Default for RecordsFile {
    fn default() -> Self {
        Self {
            version: RECORDS_FORMAT_VERSION.to_string(),
            last_updated: Utc::now(),
            records: BTreeMap::new(),
        }
    }
}

/// Reads may run concurrently; every mutation takes the write lock for the whole
/// update-and-save, so the file on disk always matches memory after a successful call.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    backup_path: PathBuf,
    state: RwLock<RecordsFile>,
}

impl RecordStore {
    pub async fn open(install_dir: &Path) -> Result<Self> {
        fs::create_dir_all(install_dir)
            .await
            .map_err(io_op("create install directory", install_dir))?;

        let path = install_dir.join(RECORDS_FILE);
        let backup_path = install_dir.join(RECORDS_BACKUP_FILE);
        let state = Self::load(&path, &backup_path).await?;
        debug!("Loaded {} install record(s) from {:?}", state.records.len(), path);

        Ok(Self {
            path,
            backup_path,
            state: RwLock::new(state),
        })
    }

    async fn load(path: &Path, backup_path: &Path) -> Result<RecordsFile> {
        if !path.exists() && !backup_path.exists() {
            info!("No install records found, starting empty");
            return Ok(RecordsFile::default());
        }

        let primary = match fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str::<RecordsFile>(&content).map_err(StoreError::from),
            Err(e) => Err(io_op("read install records", path)(e)),
        };

        match primary {
            Ok(state) => Ok(state),
            Err(primary_error) => {
                warn!("Failed to load install records ({}), checking backup", primary_error);
                if !backup_path.exists() {
                    return Err(primary_error);
                }
                let content = fs::read_to_string(backup_path)
                    .await
                    .map_err(io_op("read install records backup", backup_path))?;
                let state: RecordsFile = serde_json::from_str(&content)?;
                info!("Restored install records from backup");
                Ok(state)
            }
        }
    }

    async fn save(&self, state: &mut RecordsFile) -> Result<()> {
        state.last_updated = Utc::now();
        let content = serde_json::to_string_pretty(&*state)?;

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, &self.backup_path).await {
                warn!("Failed to back up install records: {}", e);
            }
        }

        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, content)
            .await
            .map_err(io_op("write install records", &staging))?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(io_op("replace install records", &self.path))?;
        debug!("Saved {} install record(s)", state.records.len());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, id: &str) -> Option<InstallRecord> {
        self.state.read().await.records.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.state.read().await.records.contains_key(id)
    }

    /// All records, ordered by ID.
    pub async fn list(&self) -> Vec<InstallRecord> {
        self.state.read().await.records.values().cloned().collect()
    }

    pub async fn find_by_uri(&self, uri: &str) -> Option<InstallRecord> {
        self.state
            .read()
            .await
            .records
            .values()
            .find(|record| record.uri == uri)
            .cloned()
    }

    /// IDs of the other records that list `id` among their dependencies.
    pub async fn dependents(&self, id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .records
            .values()
            .filter(|record| record.id != id && record.depends_on(id))
            .map(|record| record.id.clone())
            .collect()
    }

    /// Inserts or replaces a record. On a failed save the previous in-memory state is
    /// put back.
    pub async fn upsert(&self, record: InstallRecord) -> Result<Option<InstallRecord>> {
        let mut state = self.state.write().await;
        let previous = state.records.insert(record.id.clone(), record.clone());
        if let Err(e) = self.save(&mut state).await {
            match &previous {
                Some(old) => state.records.insert(record.id.clone(), old.clone()),
                None => state.records.remove(&record.id),
            };
            return Err(e);
        }
        Ok(previous)
    }

    pub async fn remove(&self, id: &str) -> Result<Option<InstallRecord>> {
        let mut state = self.state.write().await;
        let Some(removed) = state.records.remove(id) else {
            return Ok(None);
        };
        if let Err(e) = self.save(&mut state).await {
            state.records.insert(id.to_string(), removed);
            return Err(e);
        }
        Ok(Some(removed))
    }
}
