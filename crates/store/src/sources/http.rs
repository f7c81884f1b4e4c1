//! Collections served over plain HTTP(S).
//!
//! A URI ending in `.tar.gz`/`.tgz` is downloaded and unpacked. Any other URI is treated
//! as a collection root: `collection.yaml` and every non-glob element file are
//! downloaded relative to it. Browsing reads JSON index documents, each an array of
//! [`CollectionMetadata`].

use std::path::{Component, Path};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::archive;
use super::{
    matches_filter, paginate, BrowseFilter, CollectionContent, CollectionMetadata,
    CollectionSource, FetchedCollection,
};
use crate::error::{io_op, Result, StoreError};
use crate::manifest::{Manifest, MANIFEST_FILE};

pub const HTTP_SOURCE_NAME: &str = "http";
pub const USER_AGENT: &str = concat!("trove-store/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    index_urls: Vec<String>,
}

impl HttpSource {
    pub fn new(index_urls: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| StoreError::InvalidConfiguration(format!("HTTP client: {}", e)))?;
        Ok(Self { client, index_urls })
    }

    pub fn with_client(client: Client, index_urls: Vec<String>) -> Self {
        Self { client, index_urls }
    }

    async fn get(&self, url: &str) -> Result<Response> {
        debug!("HTTP GET {}", url);
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(format!("GET {}", url))
            } else {
                StoreError::unavailable(HTTP_SOURCE_NAME, format!("GET {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(url.to_string()));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(StoreError::unavailable(
                HTTP_SOURCE_NAME,
                format!("GET {} returned {}", url, status),
            ));
        }
        if !status.is_success() {
            return Err(StoreError::NetworkError(format!(
                "GET {} returned {}: {}",
                url,
                status,
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }
        Ok(response)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self.get(url).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_op("create download directory", parent))?;
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(io_op("create download file", dest))?;
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            StoreError::unavailable(HTTP_SOURCE_NAME, format!("reading {} failed: {}", url, e))
        })? {
            file.write_all(&chunk)
                .await
                .map_err(io_op("write download file", dest))?;
        }
        file.flush().await.map_err(io_op("write download file", dest))?;
        Ok(())
    }

    async fn fetch_index(&self, url: &str) -> Result<Vec<CollectionMetadata>> {
        let response = self.get(url).await?;
        let mut entries: Vec<CollectionMetadata> = response.json().await.map_err(|e| {
            StoreError::unavailable(HTTP_SOURCE_NAME, format!("invalid index {}: {}", url, e))
        })?;
        for entry in &mut entries {
            entry.source_name = HTTP_SOURCE_NAME.to_string();
        }
        Ok(entries)
    }

    async fn fetch_archive(&self, uri: &str) -> Result<FetchedCollection> {
        let temp = tempfile::Builder::new()
            .prefix("trove-http-")
            .tempdir()
            .map_err(StoreError::from)?;
        let archive_path = temp.path().join("download.tar.gz");
        self.download(uri, &archive_path).await?;

        let unpacked = temp.path().join("content");
        tokio::fs::create_dir_all(&unpacked)
            .await
            .map_err(io_op("create extraction directory", &unpacked))?;
        archive::extract(&archive_path, &unpacked).await?;

        let root = archive::find_manifest_root(&unpacked).ok_or_else(|| {
            StoreError::MalformedManifest(format!("archive {} contains no {}", uri, MANIFEST_FILE))
        })?;
        let manifest = Manifest::load_from_dir(&root).await?;

        Ok(FetchedCollection {
            metadata: CollectionMetadata::from_manifest(&manifest, HTTP_SOURCE_NAME, uri),
            manifest,
            content: CollectionContent::temporary(root, temp),
        })
    }

    async fn fetch_tree(&self, uri: &str) -> Result<FetchedCollection> {
        let base = uri.trim_end_matches('/');
        let manifest_bytes = self
            .get(&format!("{}/{}", base, MANIFEST_FILE))
            .await?
            .bytes()
            .await
            .map_err(|e| StoreError::unavailable(HTTP_SOURCE_NAME, e.to_string()))?;
        let manifest = Manifest::parse(&manifest_bytes)?;

        let temp = tempfile::Builder::new()
            .prefix("trove-http-")
            .tempdir()
            .map_err(StoreError::from)?;
        let root = temp.path().to_path_buf();
        tokio::fs::write(root.join(MANIFEST_FILE), &manifest_bytes)
            .await
            .map_err(io_op("write manifest", &root))?;

        for element in &manifest.elements {
            if element.is_glob() {
                warn!(
                    "Cannot expand glob '{}' over HTTP for {}, skipping",
                    element.path,
                    manifest.id()
                );
                continue;
            }
            let relative = element.path.trim_start_matches("./");
            if !is_safe_relative(relative) {
                return Err(StoreError::InvalidPath(format!(
                    "element path escapes collection root: {}",
                    element.path
                )));
            }
            self.download(&format!("{}/{}", base, relative), &root.join(relative))
                .await?;
        }

        Ok(FetchedCollection {
            metadata: CollectionMetadata::from_manifest(&manifest, HTTP_SOURCE_NAME, uri),
            manifest,
            content: CollectionContent::temporary(root, temp),
        })
    }
}

fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[async_trait]
impl CollectionSource for HttpSource {
    fn name(&self) -> &str {
        HTTP_SOURCE_NAME
    }

    fn supports(&self, uri: &str) -> bool {
        uri.starts_with("https://") || uri.starts_with("http://")
    }

    async fn browse(&self, filter: &BrowseFilter) -> Result<Vec<CollectionMetadata>> {
        let mut collected = Vec::new();
        let mut last_error = None;

        for url in &self.index_urls {
            match self.fetch_index(url).await {
                Ok(entries) => collected.extend(entries),
                Err(e) => {
                    warn!("Failed to read collection index {}: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        if collected.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let matched = collected
            .into_iter()
            .filter(|metadata| matches_filter(metadata, filter))
            .collect();
        Ok(paginate(matched, filter.offset, filter.limit))
    }

    async fn fetch(&self, uri: &str) -> Result<FetchedCollection> {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        if archive::is_archive(path) {
            self.fetch_archive(uri).await
        } else {
            self.fetch_tree(uri).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports() {
        let source = HttpSource::new(Vec::new(), Duration::from_secs(5)).unwrap();
        assert!(source.supports("https://example.com/devops.tar.gz"));
        assert!(source.supports("http://example.com/devops"));
        assert!(!source.supports("github://alice/devops"));
    }

    #[test]
    fn test_safe_relative_paths() {
        assert!(is_safe_relative("skills/a.md"));
        assert!(is_safe_relative("./skills/a.md"));
        assert!(!is_safe_relative("../etc/passwd"));
        assert!(!is_safe_relative("/etc/passwd"));
        assert!(!is_safe_relative(""));
    }

    #[tokio::test]
    async fn test_browse_without_indexes_is_empty() {
        let source = HttpSource::new(Vec::new(), Duration::from_secs(5)).unwrap();
        assert!(source.browse(&BrowseFilter::new()).await.unwrap().is_empty());
    }
}
