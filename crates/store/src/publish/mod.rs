//! Publishing a local collection to the shared registry repository on GitHub.
//!
//! The pipeline runs seven stages in order and stops at the first failure:
//!
//! 1. load the manifest
//! 2. validate it
//! 3. scan the content (skippable)
//! 4. build the tarball and checksum sidecar (a dry run stops here)
//! 5. authenticate and fork the registry repository
//! 6. clone the fork, commit the collection on `add-<name>-<version>` and push
//! 7. open (or reuse) the pull request and optionally cut a release
//!
//! Every outcome carries the transcript of the stages that ran. After stage 5 the
//! progress is persisted in [`PublishState`] so a retry reuses the fork, the branch and
//! an open pull request instead of creating new ones.

mod git;
mod github;
mod session;
mod state;

pub use git::{CommitAuthor, GitOperations};
#[cfg(feature = "github")]
pub use git::Git2Operations;
pub use github::{
    GitHubClient, NewPullRequest, NewRelease, PullRequestInfo, ReleaseInfo, RepositoryInfo,
};
#[cfg(feature = "github")]
pub use github::RestGitHubClient;
pub use session::{
    AccessToken, EnvTokenProvider, PublishSession, StaticTokenProvider, TokenProvider,
    DEFAULT_TOKEN_ENV,
};
pub use state::{PublishStage, PublishState, PUBLISH_STATE_FILE};

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checksum::{self, Checksum, ChecksumAlgorithm};
use crate::error::{io_op, Result, StoreError};
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::scanner::{ScanFinding, SecurityScanner};
use crate::sources::archive::{self, Compression};
use crate::validation::{ValidationError, Validator};

pub const DEFAULT_REGISTRY_REPO: &str = "trove-collections/collection";
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(300);
const COLLECTIONS_DIR: &str = "collections";
const DIST_DIR: &str = "dist";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Upstream registry repository, `owner/name`.
    pub github_repo: String,
    /// Target branch of the pull request. Defaults to the registry's default branch.
    pub base_branch: Option<String>,
    /// Branch pushed to the fork. Defaults to `add-<name>-<version>`.
    pub branch: Option<String>,
    pub commit_message: Option<String>,
    pub create_release: bool,
    /// Defaults to `v<version>`.
    pub release_tag: Option<String>,
    pub release_notes: Option<String>,
    /// Force-push the branch even when it was not pushed by an earlier attempt.
    pub force: bool,
    pub skip_security_scan: bool,
    pub dry_run: bool,
    /// Where the tarball and checksums are written. Defaults to `<state_dir>/dist`.
    pub output_dir: Option<PathBuf>,
    /// Where publish progress is recorded. Defaults to the collection directory.
    pub state_dir: Option<PathBuf>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            github_repo: DEFAULT_REGISTRY_REPO.to_string(),
            base_branch: None,
            branch: None,
            commit_message: None,
            create_release: false,
            release_tag: None,
            release_notes: None,
            force: false,
            skip_security_scan: false,
            dry_run: false,
            output_dir: None,
            state_dir: None,
        }
    }
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_github_repo(mut self, repo: impl Into<String>) -> Self {
        self.github_repo = repo.into();
        self
    }

    pub fn with_base_branch(mut self, branch: impl Into<String>) -> Self {
        self.base_branch = Some(branch.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_commit_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = Some(message.into());
        self
    }

    pub fn with_release(mut self, tag: Option<String>, notes: Option<String>) -> Self {
        self.create_release = true;
        self.release_tag = tag;
        self.release_notes = notes;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_skip_security_scan(mut self, skip: bool) -> Self {
        self.skip_security_scan = skip;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    fn validate(&self) -> Result<()> {
        let mut parts = self.github_repo.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => Ok(()),
            _ => Err(StoreError::InvalidConfiguration(format!(
                "registry repository must be owner/name, got '{}'",
                self.github_repo
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Success,
    DryRunSuccess,
    ValidationFailed,
    SecurityFailed,
    Error,
}

impl std::fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PublishStatus::Success => "success",
            PublishStatus::DryRunSuccess => "dry_run_success",
            PublishStatus::ValidationFailed => "validation_failed",
            PublishStatus::SecurityFailed => "security_failed",
            PublishStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Terminal result of a publish attempt. Validation and security failures are
/// reported here rather than as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub status: PublishStatus,
    pub collection_id: Option<String>,
    pub version: Option<String>,
    pub transcript: Vec<String>,
    pub validation_errors: Vec<ValidationError>,
    pub security_findings: Vec<ScanFinding>,
    pub tarball: Option<PathBuf>,
    pub checksums: Option<PathBuf>,
    pub checksum: Option<String>,
    pub fork: Option<String>,
    pub branch: Option<String>,
    pub pr_url: Option<String>,
    pub pr_number: Option<u64>,
    pub release_url: Option<String>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl PublishOutcome {
    fn started() -> Self {
        Self {
            status: PublishStatus::Error,
            collection_id: None,
            version: None,
            transcript: Vec::new(),
            validation_errors: Vec::new(),
            security_findings: Vec::new(),
            tarball: None,
            checksums: None,
            checksum: None,
            fork: None,
            branch: None,
            pr_url: None,
            pr_number: None,
            release_url: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, PublishStatus::Success | PublishStatus::DryRunSuccess)
    }

    fn step(&mut self, stage: PublishStage, detail: impl AsRef<str>) {
        let line = format!("Step {}/{}: {}", stage.number(), PublishStage::TOTAL, detail.as_ref());
        info!("{}", line);
        self.transcript.push(line);
    }

    fn fail(mut self, stage: PublishStage, status: PublishStatus, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let line = format!("Step {}/{} failed: {}", stage.number(), PublishStage::TOTAL, detail);
        warn!("{}", line);
        self.transcript.push(line);
        self.status = status;
        self.error = Some(detail);
        self
    }
}

/// Files staged for one collection: archive name to source path.
type PackageFiles = BTreeMap<String, PathBuf>;

pub struct Publisher {
    github: Arc<dyn GitHubClient>,
    git: Arc<dyn GitOperations>,
    scanner: SecurityScanner,
    call_timeout: Duration,
    git_timeout: Duration,
    author: Option<CommitAuthor>,
}

impl Publisher {
    pub fn new(github: Arc<dyn GitHubClient>, git: Arc<dyn GitOperations>) -> Self {
        Self {
            github,
            git,
            scanner: SecurityScanner::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            git_timeout: DEFAULT_GIT_TIMEOUT,
            author: None,
        }
    }

    /// A publisher talking to api.github.com through reqwest and to git through libgit2.
    #[cfg(feature = "github")]
    pub fn github(call_timeout: Duration) -> Result<Self> {
        let client = RestGitHubClient::new(call_timeout)?;
        Ok(Self::new(Arc::new(client), Arc::new(Git2Operations::new())).with_call_timeout(call_timeout))
    }

    pub fn with_scanner(mut self, scanner: SecurityScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_git_timeout(mut self, timeout: Duration) -> Self {
        self.git_timeout = timeout;
        self
    }

    pub fn with_commit_author(mut self, author: CommitAuthor) -> Self {
        self.author = Some(author);
        self
    }

    async fn bounded<T>(&self, what: &str, limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| StoreError::Timeout(format!("{} did not finish within {:?}", what, limit)))?
    }

    /// Runs the publish pipeline for the collection rooted at `collection_dir`.
    pub async fn publish(
        &self,
        collection_dir: &Path,
        options: &PublishOptions,
        tokens: &dyn TokenProvider,
    ) -> PublishOutcome {
        let mut outcome = PublishOutcome::started();

        // Stage 1
        let manifest_path = collection_dir.join(MANIFEST_FILE);
        let manifest = match load_manifest(&manifest_path).await {
            Ok(manifest) => manifest,
            Err(e) => return outcome.fail(PublishStage::Loaded, PublishStatus::Error, e.to_string()),
        };
        if let Err(e) = options.validate() {
            return outcome.fail(PublishStage::Loaded, PublishStatus::Error, e.to_string());
        }
        outcome.collection_id = Some(manifest.id());
        outcome.version = Some(manifest.version.clone());
        outcome.step(
            PublishStage::Loaded,
            format!("Loaded manifest for {} v{}", manifest.id(), manifest.version),
        );

        // Stage 2
        let validation = Validator::new(collection_dir).validate_comprehensive(&manifest);
        outcome
            .warnings
            .extend(validation.warnings.iter().map(|w| w.to_string()));
        if !validation.valid {
            let count = validation.errors.len();
            outcome.validation_errors = validation.errors;
            return outcome.fail(
                PublishStage::Validated,
                PublishStatus::ValidationFailed,
                format!("manifest has {} validation error(s)", count),
            );
        }
        outcome.step(
            PublishStage::Validated,
            format!(
                "Validation passed ({} rules, {} warning(s))",
                validation.stats.total_rules_checked, validation.stats.warnings
            ),
        );

        // Stage 3
        if options.skip_security_scan {
            outcome.step(PublishStage::Scanned, "Security scan skipped");
        } else {
            let scan = self
                .bounded("security scan", self.git_timeout, self.scanner.scan(collection_dir))
                .await;
            match scan {
                Ok(result) if result.clean => outcome.step(
                    PublishStage::Scanned,
                    format!(
                        "Security scan clean ({} file(s), {} finding(s) below threshold)",
                        result.files_scanned,
                        result.findings.len()
                    ),
                ),
                Ok(result) => {
                    outcome.security_findings = result.blocking_findings();
                    let count = outcome.security_findings.len();
                    return outcome.fail(
                        PublishStage::Scanned,
                        PublishStatus::SecurityFailed,
                        format!("{} finding(s) at or above {}", count, self.scanner.threshold()),
                    );
                }
                Err(e) => return outcome.fail(PublishStage::Scanned, PublishStatus::Error, e.to_string()),
            }
        }

        // Stage 4
        let files = package_files(&manifest, collection_dir, &manifest_path);
        let state_dir = options.state_dir.as_deref().unwrap_or(collection_dir);
        let output_dir = options
            .output_dir
            .clone()
            .unwrap_or_else(|| state_dir.join(DIST_DIR));
        let (tarball, sidecar, digest) = match build_package(&manifest, &files, &output_dir).await {
            Ok(package) => package,
            Err(e) => return outcome.fail(PublishStage::Packaged, PublishStatus::Error, e.to_string()),
        };
        outcome.checksum = Some(
            Checksum {
                algorithm: ChecksumAlgorithm::Sha256,
                value: digest,
            }
            .to_string(),
        );
        outcome.step(
            PublishStage::Packaged,
            format!("Packaged {} file(s) into {}", files.len(), tarball.display()),
        );
        outcome.tarball = Some(tarball.clone());
        outcome.checksums = Some(sidecar.clone());

        if options.dry_run {
            outcome.transcript.push("Dry run: stopping before any GitHub call".to_string());
            outcome.status = PublishStatus::DryRunSuccess;
            return outcome;
        }

        let mut state = PublishState::load(state_dir, &manifest.id(), &manifest.version)
            .await
            .unwrap_or_else(|| PublishState::new(&manifest.id(), &manifest.version));

        // Stage 5
        let session = match PublishSession::start(tokens).await {
            Ok(session) => session,
            Err(e) => return outcome.fail(PublishStage::Forked, PublishStatus::Error, e.to_string()),
        };
        let (user, upstream, fork) = match self.fork(&session, options, &state).await {
            Ok(result) => result,
            Err(e) => return outcome.fail(PublishStage::Forked, PublishStatus::Error, e.to_string()),
        };
        outcome.fork = Some(fork.full_name.clone());
        state.fork = Some(fork.full_name.clone());
        state.complete(PublishStage::Forked);
        self.persist(&state, state_dir, &mut outcome).await;
        outcome.step(PublishStage::Forked, format!("Using fork {}", fork.full_name));

        // Stage 6
        let branch = options
            .branch
            .clone()
            .unwrap_or_else(|| format!("add-{}-{}", manifest.name, manifest.version));
        outcome.branch = Some(branch.clone());
        let force_push = options.force || state.branch.as_deref() == Some(branch.as_str());
        let mut staged = files.clone();
        staged.insert(file_name(&tarball), tarball.clone());
        staged.insert(file_name(&sidecar), sidecar.clone());
        if let Err(e) = self
            .push_branch(&session, &manifest, &fork, &branch, &staged, options, force_push)
            .await
        {
            return outcome.fail(PublishStage::Pushed, PublishStatus::Error, e.to_string());
        }
        state.branch = Some(branch.clone());
        state.complete(PublishStage::Pushed);
        self.persist(&state, state_dir, &mut outcome).await;
        outcome.step(PublishStage::Pushed, format!("Pushed branch {} to {}", branch, fork.full_name));

        // Stage 7
        let base = options
            .base_branch
            .clone()
            .unwrap_or_else(|| upstream.default_branch.clone());
        let pull = match self
            .open_pull_request(&session, &manifest, &upstream, &user, &branch, &base)
            .await
        {
            Ok(pull) => pull,
            Err(e) => return outcome.fail(PublishStage::PullRequestOpened, PublishStatus::Error, e.to_string()),
        };
        outcome.pr_url = Some(pull.html_url.clone());
        outcome.pr_number = Some(pull.number);
        state.pr_url = Some(pull.html_url.clone());
        state.pr_number = Some(pull.number);
        state.complete(PublishStage::PullRequestOpened);
        self.persist(&state, state_dir, &mut outcome).await;
        outcome.step(
            PublishStage::PullRequestOpened,
            format!("Pull request #{}: {}", pull.number, pull.html_url),
        );

        if options.create_release {
            match self
                .release(&session, &manifest, &fork, &branch, options, &[&tarball, &sidecar])
                .await
            {
                Ok(release) => {
                    outcome
                        .transcript
                        .push(format!("Created release {}", release.tag_name));
                    outcome.release_url = Some(release.html_url);
                }
                Err(e) => {
                    warn!("Release for {} failed: {}", manifest.id(), e);
                    outcome.warnings.push(format!("release was not created: {}", e));
                }
            }
        }

        outcome.status = PublishStatus::Success;
        outcome
    }

    /// Returns the authenticated user, the upstream repository and the fork.
    async fn fork(
        &self,
        session: &PublishSession,
        options: &PublishOptions,
        state: &PublishState,
    ) -> Result<(String, RepositoryInfo, RepositoryInfo)> {
        let limit = self.call_timeout;
        let user = self
            .bounded("fetch GitHub user", limit, self.github.authenticated_user(session))
            .await?;
        let upstream = self
            .bounded(
                "fetch registry repository",
                limit,
                self.github.repository(session, &options.github_repo),
            )
            .await?;

        if let Some(recorded) = state.fork.as_deref().filter(|_| state.reached(PublishStage::Forked)) {
            match self
                .bounded("fetch fork", limit, self.github.repository(session, recorded))
                .await
            {
                Ok(fork) => {
                    debug!("Reusing recorded fork {}", fork.full_name);
                    return Ok((user, upstream, fork));
                }
                Err(e) => warn!("Recorded fork {} is not usable, forking again: {}", recorded, e),
            }
        }

        let forked = self
            .bounded(
                "fork registry repository",
                limit,
                self.github.fork_repository(session, &options.github_repo),
            )
            .await;
        let fork = match forked {
            Ok(fork) => fork,
            Err(e) => {
                let existing = format!("{}/{}", user, upstream.name());
                debug!("Fork request failed ({}), looking for existing fork {}", e, existing);
                self.bounded("fetch fork", limit, self.github.repository(session, &existing))
                    .await
                    .map_err(|_| e)?
            }
        };
        Ok((user, upstream, fork))
    }

    #[allow(clippy::too_many_arguments)]
    async fn push_branch(
        &self,
        session: &PublishSession,
        manifest: &Manifest,
        fork: &RepositoryInfo,
        branch: &str,
        files: &PackageFiles,
        options: &PublishOptions,
        force: bool,
    ) -> Result<()> {
        let token = session.token()?.to_string();
        let workspace = tempfile::Builder::new()
            .prefix("trove-publish-")
            .tempdir()?;
        let repo_dir = workspace.path().join("repo");

        self.bounded(
            "clone fork",
            self.git_timeout,
            self.git.clone_repository(&fork.clone_url, &repo_dir, &token),
        )
        .await?;
        self.git.create_branch(&repo_dir, branch).await?;

        let target = repo_dir
            .join(COLLECTIONS_DIR)
            .join(&manifest.author)
            .join(&manifest.name);
        if target.exists() {
            tokio::fs::remove_dir_all(&target)
                .await
                .map_err(io_op("clear previous collection copy", &target))?;
        }
        for (relative, source) in files {
            let dest = target.join(relative);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(io_op("create directory", parent))?;
            }
            tokio::fs::copy(source, &dest)
                .await
                .map_err(io_op("copy into registry clone", source))?;
        }

        let message = options
            .commit_message
            .clone()
            .unwrap_or_else(|| default_commit_message(manifest));
        let author = self
            .author
            .clone()
            .or_else(CommitAuthor::from_git_config)
            .unwrap_or_default();
        let commit = self.git.commit_all(&repo_dir, &message, &author).await?;
        debug!("Committed {} on {}", commit, branch);

        self.bounded(
            "push branch",
            self.git_timeout,
            self.git.push(&repo_dir, branch, &token, force),
        )
        .await
    }

    async fn open_pull_request(
        &self,
        session: &PublishSession,
        manifest: &Manifest,
        upstream: &RepositoryInfo,
        user: &str,
        branch: &str,
        base: &str,
    ) -> Result<PullRequestInfo> {
        let head = format!("{}:{}", user, branch);
        let existing = self
            .bounded(
                "look up pull request",
                self.call_timeout,
                self.github.find_pull_request(session, &upstream.full_name, &head),
            )
            .await?;
        if let Some(pull) = existing {
            info!("Reusing open pull request #{}", pull.number);
            return Ok(pull);
        }

        let request = NewPullRequest {
            title: format!("Add collection: {} v{}", manifest.name, manifest.version),
            head,
            base: base.to_string(),
            body: pull_request_body(manifest),
        };
        self.bounded(
            "create pull request",
            self.call_timeout,
            self.github.create_pull_request(session, &upstream.full_name, &request),
        )
        .await
    }

    async fn release(
        &self,
        session: &PublishSession,
        manifest: &Manifest,
        fork: &RepositoryInfo,
        branch: &str,
        options: &PublishOptions,
        assets: &[&Path],
    ) -> Result<ReleaseInfo> {
        let tag = options
            .release_tag
            .clone()
            .unwrap_or_else(|| format!("v{}", manifest.version));
        let request = NewRelease {
            tag_name: tag.clone(),
            name: format!("{} {}", manifest.name, tag),
            body: options
                .release_notes
                .clone()
                .unwrap_or_else(|| manifest.description.clone()),
            target_commitish: Some(branch.to_string()),
            draft: false,
            prerelease: manifest
                .semver()
                .map(|version| !version.pre.is_empty())
                .unwrap_or(false),
        };
        let release = self
            .bounded(
                "create release",
                self.call_timeout,
                self.github.create_release(session, &fork.full_name, &request),
            )
            .await?;
        for asset in assets {
            self.bounded(
                "upload release asset",
                self.git_timeout,
                self.github.upload_release_asset(session, &release, asset),
            )
            .await?;
        }
        Ok(release)
    }

    async fn persist(&self, state: &PublishState, state_dir: &Path, outcome: &mut PublishOutcome) {
        if let Err(e) = state.save(state_dir).await {
            warn!("Could not record publish progress: {}", e);
            outcome
                .warnings
                .push(format!("publish progress was not recorded: {}", e));
        }
    }
}

async fn load_manifest(path: &Path) -> Result<Manifest> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(io_op("read manifest", path))?;
    Manifest::parse_unchecked(&bytes)
}

fn package_files(manifest: &Manifest, collection_dir: &Path, manifest_path: &Path) -> PackageFiles {
    let mut files = PackageFiles::new();
    files.insert(MANIFEST_FILE.to_string(), manifest_path.to_path_buf());
    for element in manifest.element_files(collection_dir) {
        files.insert(element.relative_path, element.absolute_path);
    }
    files
}

/// Writes `<name>-<version>.tar.gz` and its sidecar. Returns both paths and the digest.
async fn build_package(
    manifest: &Manifest,
    files: &PackageFiles,
    output_dir: &Path,
) -> Result<(PathBuf, PathBuf, String)> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(io_op("create output directory", output_dir))?;
    let tarball = output_dir.join(format!("{}-{}.tar.gz", manifest.name, manifest.version));
    let entries = files
        .iter()
        .map(|(name, path)| (name.clone(), path.clone()))
        .collect();
    archive::create(&tarball, entries, Compression::Best).await?;

    let digest = checksum::compute(&tarball, ChecksumAlgorithm::Sha256).await?;
    let sidecar = checksum::write_sidecar(&tarball, &digest).await?;
    Ok((tarball, sidecar, digest))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn default_commit_message(manifest: &Manifest) -> String {
    format!(
        "Add collection: {} v{}\n\nAuthor: {}\nCategory: {}\nDescription: {}",
        manifest.name,
        manifest.version,
        manifest.author,
        manifest.category.as_deref().unwrap_or("other"),
        manifest.description
    )
}

fn pull_request_body(manifest: &Manifest) -> String {
    let mut body = format!(
        "## {}\n\n{}\n\n- **Author:** {}\n- **Version:** {}\n- **Category:** {}\n- **Elements:** {}\n",
        manifest.name,
        manifest.description,
        manifest.author,
        manifest.version,
        manifest.category.as_deref().unwrap_or("other"),
        manifest.elements.len()
    );
    if !manifest.tags.is_empty() {
        body.push_str(&format!("- **Tags:** {}\n", manifest.tags.join(", ")));
    }
    if !manifest.dependencies.is_empty() {
        body.push_str("\n### Dependencies\n\n");
        for dependency in &manifest.dependencies {
            let version = dependency.version.as_deref().unwrap_or("*");
            body.push_str(&format!("- `{}` ({})\n", dependency.uri, version));
        }
    }
    body
}
