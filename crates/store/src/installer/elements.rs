use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::manifest::ElementType;

/// One element file of an installed collection, as handed to an [`ElementRepository`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledElement {
    pub collection_id: String,
    pub element_type: Option<ElementType>,
    /// `/`-separated path relative to the collection root.
    pub relative_path: String,
    pub path: PathBuf,
}

impl InstalledElement {
    /// Stable key of the element: `author/name:relative/path`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.collection_id, self.relative_path)
    }
}

/// Store of individual elements that installed collections are mirrored into.
///
/// The installer treats every failure here as a warning.
#[async_trait]
pub trait ElementRepository: Send + Sync {
    async fn create(&self, element: &InstalledElement) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn list(&self, collection_id: &str) -> Result<Vec<InstalledElement>>;
}
