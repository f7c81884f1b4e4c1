//! GitHub REST primitives used by the publish pipeline.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::session::PublishSession;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub full_name: String,
    pub clone_url: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

impl RepositoryInfo {
    pub fn owner(&self) -> &str {
        self.full_name.split('/').next().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.full_name.split('/').nth(1).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub html_url: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub title: String,
    /// `user:branch`
    pub head: String,
    pub base: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub upload_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRelease {
    pub tag_name: String,
    pub name: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_commitish: Option<String>,
    pub draft: bool,
    pub prerelease: bool,
}

/// The GitHub operations the publisher needs. Every call carries the session whose
/// token authorises it.
#[async_trait]
pub trait GitHubClient: Send + Sync {
    /// Login of the token owner.
    async fn authenticated_user(&self, session: &PublishSession) -> Result<String>;

    async fn repository(&self, session: &PublishSession, full_name: &str) -> Result<RepositoryInfo>;

    /// Forks `full_name` into the authenticated account. GitHub answers with the
    /// existing fork when one already exists.
    async fn fork_repository(&self, session: &PublishSession, full_name: &str) -> Result<RepositoryInfo>;

    /// An open pull request on `repo` whose head is `head` (`user:branch`).
    async fn find_pull_request(
        &self,
        session: &PublishSession,
        repo: &str,
        head: &str,
    ) -> Result<Option<PullRequestInfo>>;

    async fn create_pull_request(
        &self,
        session: &PublishSession,
        repo: &str,
        request: &NewPullRequest,
    ) -> Result<PullRequestInfo>;

    async fn create_release(
        &self,
        session: &PublishSession,
        repo: &str,
        release: &NewRelease,
    ) -> Result<ReleaseInfo>;

    async fn upload_release_asset(
        &self,
        session: &PublishSession,
        release: &ReleaseInfo,
        path: &Path,
    ) -> Result<()>;
}

#[cfg(feature = "github")]
pub use rest::RestGitHubClient;

#[cfg(feature = "github")]
mod rest {
    use std::path::Path;
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
    use serde::de::DeserializeOwned;
    use serde::Deserialize;
    use tracing::debug;

    use super::{
        GitHubClient, NewPullRequest, NewRelease, PullRequestInfo, ReleaseInfo, RepositoryInfo,
    };
    use crate::error::{io_op, Result, StoreError};
    use crate::publish::session::PublishSession;
    use crate::sources::github::{ACCEPT_HEADER, API_BASE, USER_AGENT};

    #[derive(Debug, Clone)]
    pub struct RestGitHubClient {
        client: Client,
        api_base: String,
    }

    #[derive(Deserialize)]
    struct User {
        login: String,
    }

    #[derive(Deserialize)]
    struct ApiError {
        #[serde(default)]
        message: String,
    }

    impl RestGitHubClient {
        pub fn new(timeout: Duration) -> Result<Self> {
            let client = Client::builder()
                .timeout(timeout)
                .user_agent(USER_AGENT)
                .build()
                .map_err(|e| StoreError::InvalidConfiguration(format!("HTTP client: {}", e)))?;
            Ok(Self {
                client,
                api_base: API_BASE.to_string(),
            })
        }

        pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
            self.api_base = api_base.into().trim_end_matches('/').to_string();
            self
        }

        fn request(&self, session: &PublishSession, method: Method, path: &str) -> Result<RequestBuilder> {
            let url = if path.starts_with("http") {
                path.to_string()
            } else {
                format!("{}{}", self.api_base, path)
            };
            debug!("GitHub {} {}", method, url);
            Ok(self
                .client
                .request(method, url)
                .header(header::ACCEPT, ACCEPT_HEADER)
                .header(header::AUTHORIZATION, format!("Bearer {}", session.token()?)))
        }

        async fn send(&self, builder: RequestBuilder) -> Result<Response> {
            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    StoreError::Timeout(format!("GitHub request: {}", e))
                } else {
                    StoreError::NetworkError(e.to_string())
                }
            })?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let message = response
                .json::<ApiError>()
                .await
                .map(|body| body.message)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("Unknown error").to_string());
            Err(match status {
                StatusCode::UNAUTHORIZED => StoreError::Auth(message),
                StatusCode::NOT_FOUND => StoreError::NotFound(message),
                _ => StoreError::GitHubApi {
                    status: status.as_u16(),
                    message,
                },
            })
        }

        async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
            self.send(builder)
                .await?
                .json::<T>()
                .await
                .map_err(|e| StoreError::NetworkError(format!("invalid GitHub response: {}", e)))
        }
    }

    #[async_trait]
    impl GitHubClient for RestGitHubClient {
        async fn authenticated_user(&self, session: &PublishSession) -> Result<String> {
            let user: User = self.json(self.request(session, Method::GET, "/user")?).await?;
            Ok(user.login)
        }

        async fn repository(&self, session: &PublishSession, full_name: &str) -> Result<RepositoryInfo> {
            self.json(self.request(session, Method::GET, &format!("/repos/{}", full_name))?)
                .await
        }

        async fn fork_repository(&self, session: &PublishSession, full_name: &str) -> Result<RepositoryInfo> {
            let builder = self
                .request(session, Method::POST, &format!("/repos/{}/forks", full_name))?
                .json(&serde_json::json!({}));
            self.json(builder).await
        }

        async fn find_pull_request(
            &self,
            session: &PublishSession,
            repo: &str,
            head: &str,
        ) -> Result<Option<PullRequestInfo>> {
            let builder = self
                .request(session, Method::GET, &format!("/repos/{}/pulls", repo))?
                .query(&[("head", head), ("state", "open")]);
            let pulls: Vec<PullRequestInfo> = self.json(builder).await?;
            Ok(pulls.into_iter().next())
        }

        async fn create_pull_request(
            &self,
            session: &PublishSession,
            repo: &str,
            request: &NewPullRequest,
        ) -> Result<PullRequestInfo> {
            let builder = self
                .request(session, Method::POST, &format!("/repos/{}/pulls", repo))?
                .json(request);
            self.json(builder).await
        }

        async fn create_release(
            &self,
            session: &PublishSession,
            repo: &str,
            release: &NewRelease,
        ) -> Result<ReleaseInfo> {
            let builder = self
                .request(session, Method::POST, &format!("/repos/{}/releases", repo))?
                .json(release);
            self.json(builder).await
        }

        async fn upload_release_asset(
            &self,
            session: &PublishSession,
            release: &ReleaseInfo,
            path: &Path,
        ) -> Result<()> {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| StoreError::InvalidPath(format!("{:?} has no file name", path)))?;
            // upload_url is a URI template such as `.../assets{?name,label}`.
            let base = release
                .upload_url
                .split('{')
                .next()
                .unwrap_or(&release.upload_url)
                .to_string();
            if base.is_empty() {
                return Err(StoreError::GitHubApi {
                    status: 0,
                    message: format!("release {} has no upload URL", release.tag_name),
                });
            }

            let body = tokio::fs::read(path)
                .await
                .map_err(io_op("read release asset", path))?;
            let content_type = if name.ends_with(".gz") {
                "application/gzip"
            } else {
                "text/plain"
            };
            let builder = self
                .request(session, Method::POST, &base)?
                .query(&[("name", name.as_str())])
                .header(header::CONTENT_TYPE, content_type)
                .body(body);
            self.send(builder).await?;
            Ok(())
        }
    }
}
