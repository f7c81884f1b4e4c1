use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{io_op, Result};

pub const PUBLISH_STATE_FILE: &str = ".publish-state.json";

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStage {
    Loaded = 1,
    Validated = 2,
    Scanned = 3,
    Packaged = 4,
    Forked = 5,
    Pushed = 6,
    PullRequestOpened = 7,
}

impl PublishStage {
    pub const TOTAL: u8 = 7;

    pub fn number(self) -> u8 {
        self as u8
    }
}

/// Marker persisted next to the manifest so a retried publish of the same version
/// can skip the fork and reuse the branch and pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishState {
    pub collection_id: String,
    pub version: String,
    pub last_completed: PublishStage,
    #[serde(default)]
    pub fork: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub pr_number: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl PublishState {
    pub fn new(collection_id: &str, version: &str) -> Self {
        Self {
            collection_id: collection_id.to_string(),
            version: version.to_string(),
            last_completed: PublishStage::Loaded,
            fork: None,
            branch: None,
            pr_url: None,
            pr_number: None,
            updated_at: Utc::now(),
        }
    }

    pub fn path(collection_dir: &Path) -> PathBuf {
        collection_dir.join(PUBLISH_STATE_FILE)
    }

    /// The saved state for this collection version. Missing, unreadable or stale
    /// markers yield `None`.
    pub async fn load(collection_dir: &Path, collection_id: &str, version: &str) -> Option<Self> {
        let path = Self::path(collection_dir);
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<Self>(&content) {
            Ok(state) if state.collection_id == collection_id && state.version == version => {
                debug!("Resuming publish of {}@{} after {:?}", collection_id, version, state.last_completed);
                Some(state)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring unreadable publish state {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn complete(&mut self, stage: PublishStage) {
        if stage > self.last_completed {
            self.last_completed = stage;
        }
        self.updated_at = Utc::now();
    }

    pub fn reached(&self, stage: PublishStage) -> bool {
        self.last_completed >= stage
    }

    pub async fn save(&self, state_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(state_dir)
            .await
            .map_err(io_op("create publish state directory", state_dir))?;
        let path = Self::path(state_dir);
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, content)
            .await
            .map_err(io_op("write publish state", &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_state_round_trip_and_staleness() {
        let temp_dir = TempDir::new().unwrap();
        let mut state = PublishState::new("alice/devops", "1.0.0");
        state.fork = Some("alice/registry".to_string());
        state.complete(PublishStage::Forked);
        state.complete(PublishStage::Packaged);
        state.save(temp_dir.path()).await.unwrap();

        let loaded = PublishState::load(temp_dir.path(), "alice/devops", "1.0.0")
            .await
            .unwrap();
        assert_eq!(loaded.last_completed, PublishStage::Forked);
        assert!(loaded.reached(PublishStage::Packaged));
        assert!(!loaded.reached(PublishStage::Pushed));

        assert!(PublishState::load(temp_dir.path(), "alice/devops", "1.1.0")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_save_creates_missing_state_dir() {
        let temp_dir = TempDir::new().unwrap();
        let state_dir = temp_dir.path().join(".publish/alice/devops");
        PublishState::new("alice/devops", "1.0.0")
            .save(&state_dir)
            .await
            .unwrap();
        assert!(state_dir.join(PUBLISH_STATE_FILE).is_file());
    }
}
