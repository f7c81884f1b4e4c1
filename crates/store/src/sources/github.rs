//! Collections hosted in GitHub repositories.
//!
//! URIs have the form `github://owner/repo[/subpath][@version]`. Browsing uses the
//! repository search API restricted to a topic; fetching clones the repository into
//! the cache directory with git2 and checks out the requested tag into a disposable
//! working copy.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use git2::{build::RepoBuilder, Cred, FetchOptions, RemoteCallbacks, Repository};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{BrowseFilter, CollectionContent, CollectionMetadata, CollectionSource, FetchedCollection};
use crate::error::{io_op, Result, StoreError};
use crate::manifest::{Manifest, MANIFEST_FILE};

pub const GITHUB_SOURCE_NAME: &str = "github";
pub const DEFAULT_TOPIC: &str = "trove-collection";
pub const API_BASE: &str = "https://api.github.com";
pub const USER_AGENT: &str = concat!("trove-store/", env!("CARGO_PKG_VERSION"));
pub const ACCEPT_HEADER: &str = "application/vnd.github.v3+json";
const ACCEPT_RAW: &str = "application/vnd.github.raw+json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubUri {
    pub owner: String,
    pub repo: String,
    pub subpath: Option<String>,
    pub version: Option<String>,
}

impl GitHubUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix("github://").ok_or_else(|| {
            StoreError::UnsupportedScheme(format!("not a github:// URI: {}", uri))
        })?;

        let (path, version) = match rest.rsplit_once('@') {
            Some((path, version)) if !version.is_empty() => (path, Some(version.to_string())),
            _ => (rest, None),
        };

        let mut parts = path.trim_matches('/').splitn(3, '/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();
        if owner.is_empty() || repo.is_empty() {
            return Err(StoreError::InvalidPath(format!(
                "expected github://owner/repo[/path][@version], got {}",
                uri
            )));
        }
        let subpath = parts
            .next()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        if subpath.as_deref().is_some_and(|p| p.split('/').any(|c| c == "..")) {
            return Err(StoreError::InvalidPath(format!("sub-path escapes repository: {}", uri)));
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            subpath,
            version,
        })
    }

    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }

    pub fn repository_key(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    name: String,
    owner: SearchOwner,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct TagItem {
    name: String,
}

pub struct GitHubSource {
    client: Client,
    api_base: String,
    cache_dir: PathBuf,
    topic: String,
    token: Option<String>,
    transfer_timeout: Duration,
    repo_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl GitHubSource {
    pub fn new(cache_dir: impl Into<PathBuf>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = token.as_deref() {
            let value = reqwest::header::HeaderValue::from_str(&format!("token {}", token))
                .map_err(|_| StoreError::Auth("GitHub token contains invalid characters".to_string()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::InvalidConfiguration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: API_BASE.to_string(),
            cache_dir: cache_dir.into(),
            topic: DEFAULT_TOPIC.to_string(),
            token,
            transfer_timeout: timeout,
            repo_locks: DashMap::new(),
        })
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Upper bound for one git clone or fetch. The transfer is aborted once it passes.
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn build_search_query(&self, filter: &BrowseFilter) -> String {
        let mut query = format!("topic:{}", self.topic);
        if let Some(author) = filter.author.as_deref() {
            query.push_str(&format!(" user:{}", author));
        }
        if let Some(text) = filter.query.as_deref() {
            query.push_str(&format!(" {} in:name,description,readme", text));
        }
        if let Some(category) = filter.category.as_deref() {
            query.push_str(&format!(" topic:{}", category));
        }
        for tag in &filter.tags {
            query.push_str(&format!(" topic:{}", tag));
        }
        query
    }

    async fn api_get(&self, url: &str, accept: &str) -> Result<reqwest::Response> {
        debug!("GitHub API request: {}", url);
        let response = self
            .client
            .get(url)
            .header("Accept", accept)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StoreError::Timeout(format!("GitHub API {}", url))
                } else {
                    StoreError::unavailable(GITHUB_SOURCE_NAME, format!("{}: {}", url, e))
                }
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(url.to_string()));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(StoreError::Auth("GitHub rejected the configured token".to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::GitHubApi {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn latest_tag_version(&self, owner: &str, repo: &str) -> Option<String> {
        let url = format!("{}/repos/{}/{}/tags?per_page=100", self.api_base, owner, repo);
        let tags: Vec<TagItem> = self.api_get(&url, ACCEPT_HEADER).await.ok()?.json().await.ok()?;
        tags.iter()
            .filter_map(|tag| semver::Version::parse(tag.name.trim_start_matches('v')).ok())
            .max()
            .map(|v| v.to_string())
    }

    async fn item_to_metadata(&self, item: SearchItem) -> Option<CollectionMetadata> {
        let owner = item.owner.login;
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base, owner, item.name, MANIFEST_FILE
        );
        let manifest = match self.api_get(&url, ACCEPT_RAW).await {
            Ok(response) => {
                let bytes = response.bytes().await.ok()?;
                Manifest::parse_unchecked(&bytes).ok()?
            }
            Err(e) => {
                debug!("Skipping {}/{} without a readable manifest: {}", owner, item.name, e);
                return None;
            }
        };

        let uri = format!("github://{}/{}", owner, item.name);
        let mut metadata = CollectionMetadata::from_manifest(&manifest, GITHUB_SOURCE_NAME, &uri);
        if metadata.name.is_empty() {
            metadata.name = item.name.clone();
        }
        if metadata.author.is_empty() {
            metadata.author = owner.clone();
        }
        if metadata.description.is_empty() {
            metadata.description = item.description.unwrap_or_default();
        }
        if metadata.tags.is_empty() {
            metadata.tags = item.topics;
        }
        if let Some(version) = self.latest_tag_version(&owner, &item.name).await {
            metadata.version = version;
        } else if metadata.version.is_empty() {
            metadata.version = "0.0.0".to_string();
        }
        metadata.stars = item.stargazers_count;
        metadata.updated_at = item.updated_at;
        metadata.repository = item.html_url.or(metadata.repository);
        Some(metadata)
    }

    fn repo_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.repo_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl CollectionSource for GitHubSource {
    fn name(&self) -> &str {
        GITHUB_SOURCE_NAME
    }

    fn supports(&self, uri: &str) -> bool {
        uri.starts_with("github://")
    }

    async fn browse(&self, filter: &BrowseFilter) -> Result<Vec<CollectionMetadata>> {
        let per_page = filter.limit.filter(|l| *l > 0 && *l < 100).unwrap_or(100);
        let page = filter.offset / per_page + 1;
        let query = self.build_search_query(filter);
        let (per_page, page) = (per_page.to_string(), page.to_string());

        let url = reqwest::Url::parse_with_params(
            &format!("{}/search/repositories", self.api_base),
            &[
                ("q", query.as_str()),
                ("sort", "stars"),
                ("order", "desc"),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ],
        )
        .map_err(|e| StoreError::InvalidConfiguration(format!("GitHub API base: {}", e)))?;

        let response: SearchResponse = self
            .api_get(url.as_str(), ACCEPT_HEADER)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::unavailable(GITHUB_SOURCE_NAME, format!("invalid search response: {}", e)))?;

        let lookups = response
            .items
            .into_iter()
            .map(|item| self.item_to_metadata(item));
        let collections = futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect();
        Ok(collections)
    }

    async fn fetch(&self, uri: &str) -> Result<FetchedCollection> {
        let parsed = GitHubUri::parse(uri)?;
        let key = parsed.repository_key();
        let mirror = self.cache_dir.join("github").join(&parsed.owner).join(&parsed.repo);

        if !mirror.join(".git").exists() && !mirror.join("HEAD").exists() {
            // distinguishes a missing repository from a transport failure
            let url = format!("{}/repos/{}", self.api_base, key);
            match self.api_get(&url, ACCEPT_HEADER).await {
                Err(StoreError::NotFound(_)) => return Err(StoreError::NotFound(uri.to_string())),
                Err(e) if e.is_recoverable() => return Err(e),
                _ => {}
            }
        }

        let lock = self.repo_lock(&key);
        let _guard = lock.lock().await;

        let token = self.token.clone();
        let checkout_parent = self.cache_dir.clone();
        let target = parsed.clone();
        let uri_owned = uri.to_string();
        let deadline = Instant::now() + self.transfer_timeout;
        let (temp, root) = tokio::task::spawn_blocking(move || {
            sync_mirror(&target, &mirror, token.as_deref(), deadline)?;
            checkout_version(&target, &mirror, &checkout_parent, &uri_owned, deadline)
        })
        .await
        .map_err(|e| StoreError::unavailable(GITHUB_SOURCE_NAME, e.to_string()))??;

        let manifest = Manifest::load_from_dir(&root).await?;
        info!("Fetched {} from {}", manifest.full_id(), uri);

        let mut metadata = CollectionMetadata::from_manifest(&manifest, GITHUB_SOURCE_NAME, uri);
        metadata.repository = Some(format!("https://github.com/{}", key));

        Ok(FetchedCollection {
            metadata,
            manifest,
            content: CollectionContent::temporary(root, temp),
        })
    }
}

fn fetch_options(token: Option<&str>, deadline: Instant) -> FetchOptions<'static> {
    let mut callbacks = RemoteCallbacks::new();
    // Returning false cancels the transfer, so blocking work cannot outlive the fetch timeout.
    callbacks.transfer_progress(move |_| Instant::now() < deadline);
    if let Some(token) = token {
        let token = token.to_string();
        callbacks.credentials(move |_url, _username, _allowed| Cred::userpass_plaintext("token", &token));
    }
    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options.download_tags(git2::AutotagOption::All);
    options
}

/// Maps a git failure to `Timeout` when it was caused by the transfer deadline.
fn transfer_error(operation: &str, url: &str, error: git2::Error, deadline: Instant) -> StoreError {
    if Instant::now() >= deadline {
        StoreError::Timeout(format!("{} of {} was cancelled at the transfer deadline", operation, url))
    } else {
        StoreError::git(operation, url, error)
    }
}

/// Clones the repository into the cache, or fetches new commits and tags.
fn sync_mirror(target: &GitHubUri, mirror: &Path, token: Option<&str>, deadline: Instant) -> Result<()> {
    let url = target.clone_url();
    if let Ok(repo) = Repository::open(mirror) {
        debug!("Updating cached repository {:?}", mirror);
        let mut remote = repo
            .find_remote("origin")
            .map_err(|e| StoreError::git("find origin remote", &url, e))?;
        remote
            .fetch(
                &["+refs/heads/*:refs/remotes/origin/*", "+refs/tags/*:refs/tags/*"],
                Some(&mut fetch_options(token, deadline)),
                None,
            )
            .map_err(|e| transfer_error("fetch from remote", &url, e, deadline))?;
        return Ok(());
    }

    if let Some(parent) = mirror.parent() {
        std::fs::create_dir_all(parent).map_err(io_op("create cache directory", parent))?;
    }
    info!("Cloning {} -> {:?}", url, mirror);
    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_options(token, deadline));
    builder
        .clone(&url, mirror)
        .map_err(|e| transfer_error("clone repository", &url, e, deadline))?;
    Ok(())
}

/// Materialises the requested version into a fresh temporary directory.
fn checkout_version(
    target: &GitHubUri,
    mirror: &Path,
    temp_parent: &Path,
    uri: &str,
    deadline: Instant,
) -> Result<(tempfile::TempDir, PathBuf)> {
    std::fs::create_dir_all(temp_parent).map_err(io_op("create cache directory", temp_parent))?;
    let temp = tempfile::Builder::new()
        .prefix(".checkout-")
        .tempdir_in(temp_parent)
        .map_err(io_op("create checkout directory", temp_parent))?;

    let source = mirror.to_string_lossy().into_owned();
    let repo = RepoBuilder::new()
        .fetch_options(fetch_options(None, deadline))
        .clone(&source, temp.path())
        .map_err(|e| transfer_error("clone from cache", &source, e, deadline))?;

    if let Some(version) = target.version.as_deref() {
        let candidates = [version.to_string(), format!("v{}", version.trim_start_matches('v'))];
        let oid = candidates
            .iter()
            .find_map(|tag| repo.refname_to_id(&format!("refs/tags/{}", tag)).ok())
            .ok_or_else(|| {
                StoreError::NotFound(format!("{} (no tag {} or v{})", uri, version, version))
            })?;
        let commit = repo
            .find_object(oid, None)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|e| StoreError::git(&format!("resolve tag {}", version), &source, e))?;
        repo.set_head_detached(commit.id())
            .map_err(|e| StoreError::git(&format!("checkout tag {}", version), &source, e))?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))
            .map_err(|e| StoreError::git(&format!("checkout tag {}", version), &source, e))?;
    }
    drop(repo);

    let git_dir = temp.path().join(".git");
    std::fs::remove_dir_all(&git_dir).map_err(io_op("remove checkout metadata", &git_dir))?;

    let root = match target.subpath.as_deref() {
        Some(sub) => temp.path().join(sub),
        None => temp.path().to_path_buf(),
    };
    if !root.join(MANIFEST_FILE).is_file() {
        return Err(StoreError::NotFound(format!("{} (no {})", uri, MANIFEST_FILE)));
    }
    if target.version.is_none() {
        warn!("No version requested for {}, using the default branch", uri);
    }
    Ok((temp, root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri() {
        let uri = GitHubUri::parse("github://alice/devops").unwrap();
        assert_eq!(uri.owner, "alice");
        assert_eq!(uri.repo, "devops");
        assert_eq!(uri.subpath, None);
        assert_eq!(uri.version, None);

        let uri = GitHubUri::parse("github://alice/monorepo/collections/devops@1.2.0").unwrap();
        assert_eq!(uri.subpath.as_deref(), Some("collections/devops"));
        assert_eq!(uri.version.as_deref(), Some("1.2.0"));
        assert_eq!(uri.clone_url(), "https://github.com/alice/monorepo.git");
    }

    #[test]
    fn test_parse_uri_rejects_bad_input() {
        assert!(matches!(
            GitHubUri::parse("https://github.com/alice/devops"),
            Err(StoreError::UnsupportedScheme(_))
        ));
        assert!(GitHubUri::parse("github://alice").is_err());
        assert!(GitHubUri::parse("github://alice/repo/../../etc").is_err());
    }

    #[test]
    fn test_search_query() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let source = GitHubSource::new(temp_dir.path(), None, Duration::from_secs(5))
            .unwrap()
            .with_topic("trove-collection");

        assert_eq!(
            source.build_search_query(&BrowseFilter::new()),
            "topic:trove-collection"
        );
        let filter = BrowseFilter::new()
            .with_author("alice")
            .with_query("deploy")
            .with_category("devops")
            .with_tag("k8s");
        assert_eq!(
            source.build_search_query(&filter),
            "topic:trove-collection user:alice deploy in:name,description,readme topic:devops topic:k8s"
        );
    }

    #[test]
    fn test_transfer_error_reports_deadline_as_timeout() {
        let cancelled = git2::Error::from_str("user cancelled");
        let past = Instant::now();
        assert!(matches!(
            transfer_error("clone repository", "https://github.com/alice/devops.git", cancelled, past),
            StoreError::Timeout(_)
        ));

        let failed = git2::Error::from_str("connection reset");
        let future = Instant::now() + Duration::from_secs(60);
        assert!(matches!(
            transfer_error("clone repository", "https://github.com/alice/devops.git", failed, future),
            StoreError::GitError { .. }
        ));
    }

    #[test]
    fn test_transfer_timeout_defaults_to_request_timeout() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let source = GitHubSource::new(temp_dir.path(), None, Duration::from_secs(5)).unwrap();
        assert_eq!(source.transfer_timeout, Duration::from_secs(5));
        let source = source.with_transfer_timeout(Duration::from_secs(90));
        assert_eq!(source.transfer_timeout, Duration::from_secs(90));
    }
}
