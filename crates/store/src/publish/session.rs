use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, StoreError};

pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of GitHub credentials. Token acquisition flows (OAuth device flow and the
/// like) live behind implementations of this trait.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `Ok(None)` when no credentials are available.
    async fn get_token(&self) -> Result<Option<AccessToken>>;
}

/// Reads the token from an environment variable, `GITHUB_TOKEN` by default.
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    var: String,
}

impl Default for EnvTokenProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_ENV)
    }
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn get_token(&self) -> Result<Option<AccessToken>> {
        Ok(std::env::var(&self.var)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(AccessToken::new))
    }
}

#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: Option<AccessToken>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(AccessToken::new(token)),
        }
    }

    pub fn from_token(token: AccessToken) -> Self {
        Self { token: Some(token) }
    }

    pub fn none() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> Result<Option<AccessToken>> {
        Ok(self.token.clone())
    }
}

/// Credentials for one publish attempt. Created when the pipeline reaches the first
/// GitHub call and dropped with the attempt.
#[derive(Debug, Clone)]
pub struct PublishSession {
    id: Uuid,
    token: AccessToken,
    started_at: DateTime<Utc>,
    max_age: ChronoDuration,
}

impl PublishSession {
    pub const DEFAULT_MAX_AGE_MINUTES: i64 = 60;

    pub async fn start(provider: &dyn TokenProvider) -> Result<Self> {
        let token = provider.get_token().await?.ok_or_else(|| {
            StoreError::Auth(format!(
                "no GitHub token available (set {} or log in)",
                DEFAULT_TOKEN_ENV
            ))
        })?;
        if token.is_expired() {
            return Err(StoreError::Auth("GitHub token has expired".to_string()));
        }

        let session = Self {
            id: Uuid::new_v4(),
            token,
            started_at: Utc::now(),
            max_age: ChronoDuration::minutes(Self::DEFAULT_MAX_AGE_MINUTES),
        };
        debug!("Started publish session {}", session.id);
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_expired() || Utc::now() - self.started_at > self.max_age
    }

    /// The token, or `Auth` once the token or the session itself has expired.
    pub fn token(&self) -> Result<&str> {
        if self.is_expired() {
            return Err(StoreError::Auth(format!(
                "publish session {} has expired",
                self.id
            )));
        }
        Ok(&self.token.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_requires_token() {
        let err = PublishSession::start(&StaticTokenProvider::none())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Auth(_)));

        let session = PublishSession::start(&StaticTokenProvider::new("ghp_abc"))
            .await
            .unwrap();
        assert_eq!(session.token().unwrap(), "ghp_abc");
        assert!(!format!("{:?}", session).contains("ghp_abc"));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let expired = AccessToken::new("ghp_old").expiring_at(Utc::now() - ChronoDuration::minutes(1));
        let err = PublishSession::start(&StaticTokenProvider::from_token(expired))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Auth(_)));
    }

    #[tokio::test]
    async fn test_env_provider_ignores_blank_values() {
        let provider = EnvTokenProvider::new("TROVE_TEST_TOKEN_THAT_IS_NOT_SET");
        assert!(provider.get_token().await.unwrap().is_none());
    }
}
