use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::archive;
use super::{
    matches_filter, paginate, BrowseFilter, CollectionContent, CollectionMetadata,
    CollectionSource, FetchedCollection,
};
use crate::error::{io_op, Result, StoreError};
use crate::manifest::{Manifest, MANIFEST_FILE};

pub const LOCAL_SOURCE_NAME: &str = "local";

/// Collections on the local filesystem, as directories or `.tar.gz` archives.
#[derive(Debug, Clone, Default)]
pub struct LocalSource {
    search_paths: Vec<PathBuf>,
}

impl LocalSource {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// `file:///abs/path` or a bare absolute path.
    pub fn parse_uri(uri: &str) -> Result<PathBuf> {
        if uri.starts_with("file://") {
            let url = url::Url::parse(uri)
                .map_err(|e| StoreError::InvalidPath(format!("invalid file URI {}: {}", uri, e)))?;
            return url
                .to_file_path()
                .map_err(|_| StoreError::InvalidPath(format!("not a local file URI: {}", uri)));
        }

        let path = PathBuf::from(uri);
        if path.is_absolute() {
            Ok(path)
        } else {
            Err(StoreError::InvalidPath(format!(
                "local collection paths must be absolute: {}",
                uri
            )))
        }
    }

    pub fn uri_for(dir: &Path) -> String {
        format!("file://{}", dir.display())
    }

    fn scan_blocking(search_paths: &[PathBuf]) -> Vec<CollectionMetadata> {
        let mut found = Vec::new();
        for search_path in search_paths {
            if !search_path.exists() {
                debug!("Skipping missing search path: {:?}", search_path);
                continue;
            }

            let manifests = WalkDir::new(search_path)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file() && entry.file_name() == MANIFEST_FILE);

            for entry in manifests {
                let Some(dir) = entry.path().parent() else { continue };
                let parsed = std::fs::read(entry.path())
                    .map_err(StoreError::from)
                    .and_then(|bytes| Manifest::parse(&bytes));
                let manifest = match parsed {
                    Ok(manifest) => manifest,
                    Err(e) => {
                        debug!("Skipping invalid manifest {:?}: {}", entry.path(), e);
                        continue;
                    }
                };

                let mut metadata =
                    CollectionMetadata::from_manifest(&manifest, LOCAL_SOURCE_NAME, &Self::uri_for(dir));
                metadata.updated_at = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from);
                if metadata.repository.is_none() {
                    metadata.repository = Some(dir.display().to_string());
                }
                found.push(metadata);
            }
        }

        found.sort_by(|a, b| a.uri.cmp(&b.uri));
        found
    }

    async fn fetch_directory(&self, dir: &Path, uri: &str) -> Result<FetchedCollection> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let bytes = match tokio::fs::read(&manifest_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!(
                    "{} (no {} in {})",
                    uri,
                    MANIFEST_FILE,
                    dir.display()
                )))
            }
            Err(e) => return Err(io_op("read manifest", &manifest_path)(e)),
        };
        let manifest = Manifest::parse(&bytes)?;

        Ok(FetchedCollection {
            metadata: CollectionMetadata::from_manifest(&manifest, LOCAL_SOURCE_NAME, uri),
            manifest,
            content: CollectionContent::persistent(dir),
        })
    }

    async fn fetch_archive(&self, archive_path: &Path, uri: &str) -> Result<FetchedCollection> {
        let temp = tempfile::Builder::new()
            .prefix("trove-archive-")
            .tempdir()
            .map_err(io_op("create extraction directory", archive_path))?;
        archive::extract(archive_path, temp.path()).await?;

        let root = archive::find_manifest_root(temp.path()).ok_or_else(|| {
            StoreError::MalformedManifest(format!("archive {} contains no {}", uri, MANIFEST_FILE))
        })?;
        let manifest = Manifest::load_from_dir(&root).await?;
        info!("Extracted {} from archive {:?}", manifest.full_id(), archive_path);

        Ok(FetchedCollection {
            metadata: CollectionMetadata::from_manifest(&manifest, LOCAL_SOURCE_NAME, uri),
            manifest,
            content: CollectionContent::temporary(root, temp),
        })
    }
}

#[async_trait]
impl CollectionSource for LocalSource {
    fn name(&self) -> &str {
        LOCAL_SOURCE_NAME
    }

    fn supports(&self, uri: &str) -> bool {
        uri.starts_with("file://") || Path::new(uri).is_absolute()
    }

    async fn browse(&self, filter: &BrowseFilter) -> Result<Vec<CollectionMetadata>> {
        let search_paths = self.search_paths.clone();
        let found = tokio::task::spawn_blocking(move || Self::scan_blocking(&search_paths))
            .await
            .map_err(|e| StoreError::unavailable(LOCAL_SOURCE_NAME, e.to_string()))?;

        let matched = found
            .into_iter()
            .filter(|metadata| matches_filter(metadata, filter))
            .collect();
        Ok(paginate(matched, filter.offset, filter.limit))
    }

    async fn fetch(&self, uri: &str) -> Result<FetchedCollection> {
        let path = Self::parse_uri(uri)?;
        if !path.exists() {
            return Err(StoreError::NotFound(uri.to_string()));
        }

        if archive::is_archive(&path.to_string_lossy()) {
            self.fetch_archive(&path, uri).await
        } else if path.is_dir() {
            self.fetch_directory(&path, uri).await
        } else if path.file_name().is_some_and(|name| name == MANIFEST_FILE) {
            let dir = path.parent().unwrap_or(&path).to_path_buf();
            self.fetch_directory(&dir, uri).await
        } else {
            Err(StoreError::InvalidPath(format!(
                "{} is neither a collection directory nor a .tar.gz archive",
                uri
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::archive::Compression;
    use tempfile::TempDir;

    async fn write_collection(root: &Path, name: &str, author: &str, tags: &[&str]) -> PathBuf {
        let dir = root.join(author).join(name);
        tokio::fs::create_dir_all(dir.join("skills")).await.unwrap();
        let manifest = format!(
            "name: {name}\nversion: 1.0.0\nauthor: {author}\ndescription: The {name} collection for testing\ntags: [{}]\nelements:\n  - path: skills/a.md\n    type: skill\n",
            tags.join(", ")
        );
        tokio::fs::write(dir.join(MANIFEST_FILE), manifest).await.unwrap();
        tokio::fs::write(dir.join("skills/a.md"), "# A\n").await.unwrap();
        dir
    }

    #[tokio::test]
    async fn test_browse_with_filter() {
        let temp_dir = TempDir::new().unwrap();
        write_collection(temp_dir.path(), "devops", "alice", &["ops"]).await;
        write_collection(temp_dir.path(), "writing", "bob", &["prose"]).await;
        tokio::fs::write(temp_dir.path().join(MANIFEST_FILE), "not: [valid")
            .await
            .unwrap();

        let source = LocalSource::new(vec![temp_dir.path().to_path_buf()]);
        let all = source.browse(&BrowseFilter::new()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|m| m.source_name == "local"));

        let ops = source
            .browse(&BrowseFilter::new().with_tag("ops"))
            .await
            .unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].id(), "alice/devops");

        let page = source
            .browse(&BrowseFilter::new().with_offset(1).with_limit(5))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = write_collection(temp_dir.path(), "devops", "alice", &[]).await;
        let source = LocalSource::default();

        let uri = LocalSource::uri_for(&dir);
        assert!(source.supports(&uri));
        let fetched = source.fetch(&uri).await.unwrap();
        assert_eq!(fetched.id(), "alice/devops");
        assert_eq!(fetched.content.root(), dir.as_path());
        assert!(!fetched.content.is_temporary());
    }

    #[tokio::test]
    async fn test_fetch_archive_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let dir = write_collection(temp_dir.path(), "devops", "alice", &[]).await;
        let archive_path = temp_dir.path().join("devops-1.0.0.tar.gz");
        archive::create(
            &archive_path,
            vec![
                ("collection.yaml".to_string(), dir.join(MANIFEST_FILE)),
                ("skills/a.md".to_string(), dir.join("skills/a.md")),
            ],
            Compression::Fast,
        )
        .await
        .unwrap();

        let source = LocalSource::default();
        let fetched = source
            .fetch(&archive_path.display().to_string())
            .await
            .unwrap();
        let root = fetched.content.root().to_path_buf();
        assert!(fetched.content.is_temporary());
        assert!(root.join("skills/a.md").is_file());

        drop(fetched);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_fetch_missing() {
        let temp_dir = TempDir::new().unwrap();
        let source = LocalSource::default();
        let uri = LocalSource::uri_for(&temp_dir.path().join("nope"));
        assert!(matches!(
            source.fetch(&uri).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            source.fetch("relative/path").await,
            Err(StoreError::InvalidPath(_))
        ));
    }
}
