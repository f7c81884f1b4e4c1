//! Collection sources.
//!
//! A source knows how to browse and fetch collections from one hosting mechanism.
//! Three variants exist: a local filesystem source, a GitHub repository source and a
//! plain HTTP source. The [`Registry`](crate::registry::Registry) fans out over them.

pub mod archive;
#[cfg(feature = "github")]
pub mod github;
#[cfg(feature = "http")]
pub mod http;
pub mod local;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::error::Result;
use crate::manifest::Manifest;

#[cfg(feature = "github")]
pub use github::GitHubSource;
#[cfg(feature = "http")]
pub use http::HttpSource;
pub use local::LocalSource;

#[async_trait]
pub trait CollectionSource: Send + Sync {
    /// Unique name of the source, e.g. `local` or `github`.
    fn name(&self) -> &str;

    /// Whether this source can fetch the given URI.
    fn supports(&self, uri: &str) -> bool;

    /// Lists collections matching `filter`. Filter fields a source cannot honour are
    /// ignored, never rejected.
    async fn browse(&self, filter: &BrowseFilter) -> Result<Vec<CollectionMetadata>>;

    /// Fetches a collection's manifest and content.
    ///
    /// Fails with `NotFound` if the URI does not resolve and with `SourceUnavailable`
    /// for transient failures.
    async fn fetch(&self, uri: &str) -> Result<FetchedCollection>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseFilter {
    pub category: Option<String>,
    pub author: Option<String>,
    /// Every tag must be present.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Case-insensitive substring across name, description and keywords.
    pub query: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl BrowseFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// The same filter without pagination, for sources whose results get merged.
    pub fn unpaginated(&self) -> Self {
        Self {
            limit: None,
            offset: 0,
            ..self.clone()
        }
    }
}

/// Lightweight browse result. Rebuilt on every browse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub stars: u64,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub repository: Option<String>,
}

impl CollectionMetadata {
    pub fn from_manifest(manifest: &Manifest, source_name: &str, uri: &str) -> Self {
        Self {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            author: manifest.author.clone(),
            description: manifest.description.clone(),
            tags: manifest.tags.clone(),
            category: manifest.category.clone(),
            keywords: manifest.keywords.clone(),
            stars: 0,
            downloads: 0,
            updated_at: None,
            source_name: source_name.to_string(),
            uri: uri.to_string(),
            repository: manifest.repository.clone(),
        }
    }

    /// `author/name`
    pub fn id(&self) -> String {
        format!("{}/{}", self.author, self.name)
    }
}

/// Directory holding a fetched collection's files.
///
/// When the content was materialised into a temporary directory, the directory is
/// removed once the last clone of the handle is dropped.
#[derive(Debug, Clone)]
pub struct CollectionContent {
    root: PathBuf,
    guard: Option<Arc<TempDir>>,
}

impl CollectionContent {
    /// Content that lives in a permanent location.
    pub fn persistent(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            guard: None,
        }
    }

    /// Content rooted at `root` inside `guard`, which is deleted with the handle.
    pub fn temporary(root: impl Into<PathBuf>, guard: TempDir) -> Self {
        Self {
            root: root.into(),
            guard: Some(Arc::new(guard)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_temporary(&self) -> bool {
        self.guard.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct FetchedCollection {
    pub metadata: CollectionMetadata,
    pub manifest: Manifest,
    pub content: CollectionContent,
}

impl FetchedCollection {
    pub fn id(&self) -> String {
        self.manifest.id()
    }
}

/// URI scheme used for source routing. Bare absolute paths count as `file`.
pub fn uri_scheme(uri: &str) -> Option<&str> {
    match uri.split_once("://") {
        Some((scheme, _)) if !scheme.is_empty() => Some(scheme),
        _ if Path::new(uri).is_absolute() => Some("file"),
        _ => None,
    }
}

pub fn matches_filter(metadata: &CollectionMetadata, filter: &BrowseFilter) -> bool {
    if let Some(category) = filter.category.as_deref() {
        if metadata.category.as_deref() != Some(category) {
            return false;
        }
    }

    if let Some(author) = filter.author.as_deref() {
        if metadata.author != author {
            return false;
        }
    }

    if !filter
        .tags
        .iter()
        .all(|tag| metadata.tags.iter().any(|t| t == tag))
    {
        return false;
    }

    if let Some(query) = filter.query.as_deref() {
        let query = query.to_lowercase();
        let found = metadata.name.to_lowercase().contains(&query)
            || metadata.description.to_lowercase().contains(&query)
            || metadata
                .keywords
                .iter()
                .any(|k| k.to_lowercase().contains(&query));
        if !found {
            return false;
        }
    }

    true
}

pub fn paginate<T>(items: Vec<T>, offset: usize, limit: Option<usize>) -> Vec<T> {
    let iter = items.into_iter().skip(offset);
    match limit {
        Some(limit) if limit > 0 => iter.take(limit).collect(),
        _ => iter.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(name: &str, author: &str) -> CollectionMetadata {
        CollectionMetadata {
            name: name.to_string(),
            author: author.to_string(),
            version: "1.0.0".to_string(),
            description: "Operations toolkit".to_string(),
            tags: vec!["ops".to_string(), "sre".to_string()],
            category: Some("devops".to_string()),
            keywords: vec!["kubernetes".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_matches_filter() {
        let m = metadata("devops", "alice");

        assert!(matches_filter(&m, &BrowseFilter::new()));
        assert!(matches_filter(&m, &BrowseFilter::new().with_category("devops")));
        assert!(!matches_filter(&m, &BrowseFilter::new().with_category("security")));
        assert!(matches_filter(&m, &BrowseFilter::new().with_author("alice")));
        assert!(!matches_filter(&m, &BrowseFilter::new().with_author("bob")));
        assert!(matches_filter(
            &m,
            &BrowseFilter::new().with_tag("ops").with_tag("sre")
        ));
        assert!(!matches_filter(
            &m,
            &BrowseFilter::new().with_tag("ops").with_tag("writing")
        ));
        assert!(matches_filter(&m, &BrowseFilter::new().with_query("TOOLKIT")));
        assert!(matches_filter(&m, &BrowseFilter::new().with_query("kube")));
        assert!(!matches_filter(&m, &BrowseFilter::new().with_query("poetry")));
    }

    #[test]
    fn test_paginate() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(paginate(items.clone(), 2, Some(3)), vec![2, 3, 4]);
        assert_eq!(paginate(items.clone(), 8, None), vec![8, 9]);
        assert!(paginate(items.clone(), 20, Some(3)).is_empty());
        assert_eq!(paginate(items, 0, Some(0)).len(), 10);
    }

    #[test]
    fn test_uri_scheme() {
        assert_eq!(uri_scheme("github://alice/devops"), Some("github"));
        assert_eq!(uri_scheme("file:///tmp/x"), Some("file"));
        assert_eq!(uri_scheme("https://example.com/x.tar.gz"), Some("https"));
        assert_eq!(uri_scheme("/abs/path"), Some("file"));
        assert_eq!(uri_scheme("relative/path"), None);
    }
}
