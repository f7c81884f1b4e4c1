use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: "trove".to_string(),
            email: "trove@localhost".to_string(),
        }
    }
}

impl CommitAuthor {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// `user.name` and `user.email` from the global git config, if both are set.
    #[cfg(feature = "github")]
    pub fn from_git_config() -> Option<Self> {
        let config = git2::Config::open_default().ok()?;
        let name = config.get_string("user.name").ok()?;
        let email = config.get_string("user.email").ok()?;
        Some(Self { name, email })
    }

    #[cfg(not(feature = "github"))]
    pub fn from_git_config() -> Option<Self> {
        None
    }
}

/// Local git work the publisher performs in a disposable clone.
#[async_trait]
pub trait GitOperations: Send + Sync {
    async fn clone_repository(&self, url: &str, dest: &Path, token: &str) -> Result<()>;

    /// Creates `branch` at HEAD, or resets it there if it exists, and checks it out.
    async fn create_branch(&self, repo_dir: &Path, branch: &str) -> Result<()>;

    /// Stages every change and commits it. Returns the new commit ID, or HEAD's ID if
    /// there was nothing to commit.
    async fn commit_all(&self, repo_dir: &Path, message: &str, author: &CommitAuthor) -> Result<String>;

    async fn push(&self, repo_dir: &Path, branch: &str, token: &str, force: bool) -> Result<()>;
}

#[cfg(feature = "github")]
pub use libgit::Git2Operations;

#[cfg(feature = "github")]
mod libgit {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use git2::{Cred, FetchOptions, IndexAddOption, PushOptions, RemoteCallbacks, Repository, Signature};
    use tracing::{debug, info};

    use super::{CommitAuthor, GitOperations};
    use crate::error::{Result, StoreError};

    #[derive(Debug, Clone, Default)]
    pub struct Git2Operations;

    impl Git2Operations {
        pub fn new() -> Self {
            Self
        }
    }

    fn callbacks(token: String) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, _username, _allowed| {
            Cred::userpass_plaintext("x-access-token", &token)
        });
        callbacks
    }

    fn open(repo_dir: &Path) -> Result<Repository> {
        Repository::open(repo_dir).map_err(|e| StoreError::git("open", &repo_dir.display().to_string(), e))
    }

    async fn blocking<T, F>(operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f).await.map_err(|e| StoreError::GitError {
            operation: operation.to_string(),
            url: String::new(),
            source: Box::new(e),
        })?
    }

    #[async_trait]
    impl GitOperations for Git2Operations {
        async fn clone_repository(&self, url: &str, dest: &Path, token: &str) -> Result<()> {
            let url = url.to_string();
            let dest: PathBuf = dest.to_path_buf();
            let token = token.to_string();
            blocking("clone", move || {
                info!("Cloning {} into {:?}", url, dest);
                let mut fetch = FetchOptions::new();
                fetch.remote_callbacks(callbacks(token));
                git2::build::RepoBuilder::new()
                    .fetch_options(fetch)
                    .clone(&url, &dest)
                    .map_err(|e| StoreError::git("clone", &url, e))?;
                Ok(())
            })
            .await
        }

        async fn create_branch(&self, repo_dir: &Path, branch: &str) -> Result<()> {
            let repo_dir = repo_dir.to_path_buf();
            let branch = branch.to_string();
            blocking("branch", move || {
                let repo = open(&repo_dir)?;
                let url = repo_dir.display().to_string();
                let head = repo
                    .head()
                    .and_then(|head| head.peel_to_commit())
                    .map_err(|e| StoreError::git("resolve HEAD", &url, e))?;
                repo.branch(&branch, &head, true)
                    .map_err(|e| StoreError::git("create branch", &url, e))?;
                repo.set_head(&format!("refs/heads/{}", branch))
                    .map_err(|e| StoreError::git("switch branch", &url, e))?;
                repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))
                    .map_err(|e| StoreError::git("checkout", &url, e))?;
                debug!("Checked out branch {} in {:?}", branch, repo_dir);
                Ok(())
            })
            .await
        }

        async fn commit_all(&self, repo_dir: &Path, message: &str, author: &CommitAuthor) -> Result<String> {
            let repo_dir = repo_dir.to_path_buf();
            let message = message.to_string();
            let author = author.clone();
            blocking("commit", move || {
                let repo = open(&repo_dir)?;
                let url = repo_dir.display().to_string();
                let git = |op: &'static str| {
                    let url = url.clone();
                    move |e: git2::Error| StoreError::git(op, &url, e)
                };

                let mut index = repo.index().map_err(git("read index"))?;
                index
                    .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
                    .map_err(git("stage files"))?;
                index.write().map_err(git("write index"))?;
                let tree_id = index.write_tree().map_err(git("write tree"))?;
                let tree = repo.find_tree(tree_id).map_err(git("find tree"))?;

                let parent = match repo.head() {
                    Ok(head) => Some(head.peel_to_commit().map_err(git("resolve HEAD"))?),
                    Err(_) => None,
                };
                if let Some(parent) = &parent {
                    if parent.tree_id() == tree_id {
                        debug!("Nothing to commit in {:?}", repo_dir);
                        return Ok(parent.id().to_string());
                    }
                }

                let signature = Signature::now(&author.name, &author.email).map_err(git("signature"))?;
                let parents: Vec<&git2::Commit> = parent.iter().collect();
                let commit_id = repo
                    .commit(Some("HEAD"), &signature, &signature, &message, &tree, &parents)
                    .map_err(git("commit"))?;
                Ok(commit_id.to_string())
            })
            .await
        }

        async fn push(&self, repo_dir: &Path, branch: &str, token: &str, force: bool) -> Result<()> {
            let repo_dir = repo_dir.to_path_buf();
            let branch = branch.to_string();
            let token = token.to_string();
            blocking("push", move || {
                let repo = open(&repo_dir)?;
                let mut remote = repo
                    .find_remote("origin")
                    .map_err(|e| StoreError::git("find remote", &repo_dir.display().to_string(), e))?;
                let url = remote.url().unwrap_or_default().to_string();

                let rejected = std::sync::Arc::new(std::sync::Mutex::new(None::<String>));
                let mut callbacks = callbacks(token);
                let sink = rejected.clone();
                callbacks.push_update_reference(move |reference, status| {
                    if let Some(message) = status {
                        if let Ok(mut slot) = sink.lock() {
                            *slot = Some(format!("{}: {}", reference, message));
                        }
                    }
                    Ok(())
                });

                let mut options = PushOptions::new();
                options.remote_callbacks(callbacks);
                let prefix = if force { "+" } else { "" };
                let refspec = format!("{}refs/heads/{}:refs/heads/{}", prefix, branch, branch);
                remote
                    .push(&[refspec.as_str()], Some(&mut options))
                    .map_err(|e| StoreError::git("push", &url, e))?;

                let rejection = rejected.lock().ok().and_then(|mut slot| slot.take());
                if let Some(message) = rejection {
                    return Err(StoreError::GitError {
                        operation: "push".to_string(),
                        url,
                        source: message.into(),
                    });
                }
                info!("Pushed branch {} to {}", branch, url);
                Ok(())
            })
            .await
        }
    }

}
