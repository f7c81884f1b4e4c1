use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::scanner::ScanFinding;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Collection '{0}' not found")]
    NotFound(String),

    #[error("Source '{source_name}' is unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },

    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Validation failed with {} error(s)", .0.len())]
    ValidationFailed(Vec<ValidationError>),

    #[error("Security scan blocked the operation: {} finding(s) at or above threshold", .0.len())]
    SecurityBlocked(Vec<ScanFinding>),

    #[error("URI is not from a trusted source: {0}")]
    UntrustedSource(String),

    #[error("Collection '{0}' must be signed but ships no signature")]
    SignatureMissing(String),

    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Collection '{id}' is already installed (version {version})")]
    AlreadyInstalled { id: String, version: String },

    #[error("Cyclic dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Collection '{id}' is required by: {}", .dependents.join(", "))]
    HasDependents { id: String, dependents: Vec<String> },

    #[error("Collection '{0}' is not installed")]
    NotInstalled(String),

    #[error("Checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("GitHub API request failed with status {status}: {message}")]
    GitHubApi { status: u16, message: String },

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Hook failed: {0}")]
    HookFailed(String),

    #[error("Git operation '{operation}' failed for repository '{url}': {source}")]
    GitError {
        operation: String,
        url: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("IO operation '{operation}' failed on path '{path}': {source}")]
    IoOperation {
        operation: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid version format: {0}")]
    InvalidVersion(#[from] semver::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Transient failures a caller may retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            StoreError::SourceUnavailable { .. } => true,
            StoreError::NetworkError(_) => true,
            StoreError::Timeout(_) => true,
            StoreError::GitHubApi { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_user_error(&self) -> bool {
        match self {
            StoreError::MalformedManifest(_) => true,
            StoreError::NotFound(_) => true,
            StoreError::UnsupportedScheme(_) => true,
            StoreError::ValidationFailed(_) => true,
            StoreError::SecurityBlocked(_) => true,
            StoreError::UntrustedSource(_) => true,
            StoreError::SignatureMissing(_) => true,
            StoreError::SignatureInvalid(_) => true,
            StoreError::AlreadyInstalled { .. } => true,
            StoreError::CyclicDependency(_) => true,
            StoreError::HasDependents { .. } => true,
            StoreError::NotInstalled(_) => true,
            StoreError::Auth(_) => true,
            StoreError::InvalidPath(_) => true,
            StoreError::InvalidConfiguration(_) => true,
            _ => false,
        }
    }

    pub(crate) fn unavailable(source_name: &str, message: impl Into<String>) -> Self {
        StoreError::SourceUnavailable {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn git(
        operation: &str,
        url: &str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        StoreError::GitError {
            operation: operation.to_string(),
            url: url.to_string(),
            source: Box::new(source),
        }
    }
}

/// Builds a `map_err` adapter that attaches the operation and path to an IO error.
pub(crate) fn io_op<'a>(
    operation: &'a str,
    path: &'a Path,
) -> impl FnOnce(std::io::Error) -> StoreError + 'a {
    move |source| StoreError::IoOperation {
        operation: operation.to_string(),
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(StoreError::unavailable("github", "connection reset").is_recoverable());
        assert!(StoreError::Timeout("browse".to_string()).is_recoverable());
        assert!(StoreError::GitHubApi {
            status: 502,
            message: "bad gateway".to_string()
        }
        .is_recoverable());

        assert!(!StoreError::NotFound("alice/devops".to_string()).is_recoverable());
        assert!(!StoreError::GitHubApi {
            status: 404,
            message: "missing".to_string()
        }
        .is_recoverable());
    }

    #[test]
    fn test_user_error_classification() {
        assert!(StoreError::NotInstalled("alice/devops".to_string()).is_user_error());
        assert!(StoreError::CyclicDependency(vec!["a/x".into(), "b/y".into()]).is_user_error());
        assert!(!StoreError::NetworkError("reset".to_string()).is_user_error());
    }

    #[test]
    fn test_error_messages_name_the_subject() {
        let err = StoreError::HasDependents {
            id: "alice/base".to_string(),
            dependents: vec!["bob/extra".to_string(), "carol/more".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Collection 'alice/base' is required by: bob/extra, carol/more"
        );

        let err = StoreError::CyclicDependency(vec![
            "a/one".to_string(),
            "b/two".to_string(),
            "a/one".to_string(),
        ]);
        assert_eq!(err.to_string(), "Cyclic dependency detected: a/one -> b/two -> a/one");
    }

    #[test]
    fn test_io_op_keeps_path() {
        let path = PathBuf::from("/tmp/somewhere");
        let err = io_op("read manifest", &path)(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        match err {
            StoreError::IoOperation { operation, path, .. } => {
                assert_eq!(operation, "read manifest");
                assert_eq!(path, PathBuf::from("/tmp/somewhere"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
