//! Install, uninstall and verification of collections.
//!
//! An install walks `resolving → verifying → validating → scanning → staged → installed`,
//! where `verifying` only runs when the security policy asks for a signature. Any
//! failure before the record is written leaves the previous state in place: content is
//! copied into a `.installing-*` directory inside the install dir and only renamed over
//! the final location once it is complete. A replaced install is moved to
//! `.backups/<author>/<name>/` first and moved back if the swap or the record write
//! fails.

mod elements;
mod hooks;
mod locks;
mod records;

pub use elements::{ElementRepository, InstalledElement};
pub use hooks::{HookContext, HookOutcome, HookRunner, DEFAULT_HOOK_TIMEOUT};
pub use locks::{IdLockGuard, IdLocks};
pub use records::{
    InstallRecord, InstallStatus, RecordMetadata, RecordStore, RECORDS_BACKUP_FILE, RECORDS_FILE,
};

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checksum::{self, Checksum, ChecksumAlgorithm};
use crate::error::{io_op, Result, StoreError};
use crate::manifest::{HookStage, Manifest, MANIFEST_FILE};
use crate::registry::Registry;
use crate::scanner::SecurityScanner;
use crate::signature::{find_signature, SignatureManager};
use crate::sources::FetchedCollection;
use crate::trust::{SecurityPolicy, TrustedSources};
use crate::utils::{copy_tree, id_components, remove_empty_parents, timestamp_suffix};
use crate::validation::Validator;

pub const BACKUPS_DIR: &str = ".backups";
pub const PUBLISH_DIR: &str = ".publish";
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(120);
const SKIP_ON_COPY: &[&str] = &[".git/"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallOptions {
    /// Replace an existing install of the same ID.
    pub force: bool,
    pub skip_dependencies: bool,
    pub skip_validation: bool,
    pub skip_hooks: bool,
}

impl InstallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_skip_dependencies(mut self, skip: bool) -> Self {
        self.skip_dependencies = skip;
        self
    }

    pub fn with_skip_validation(mut self, skip: bool) -> Self {
        self.skip_validation = skip;
        self
    }

    pub fn with_skip_hooks(mut self, skip: bool) -> Self {
        self.skip_hooks = skip;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallOptions {
    /// Uninstall even if other installed collections depend on this one.
    pub force: bool,
    pub skip_hooks: bool,
}

impl UninstallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_skip_hooks(mut self, skip: bool) -> Self {
        self.skip_hooks = skip;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Resolving,
    Verifying,
    Validating,
    Scanning,
    Staged,
    Installed,
}

impl Display for InstallStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InstallStage::Resolving => "resolving",
            InstallStage::Verifying => "verifying",
            InstallStage::Validating => "validating",
            InstallStage::Scanning => "scanning",
            InstallStage::Staged => "staged",
            InstallStage::Installed => "installed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallReport {
    pub id: String,
    pub version: String,
    pub uri: String,
    pub source_name: String,
    pub install_location: PathBuf,
    pub checksum: String,
    /// Set when a dependency was found already installed and left untouched.
    pub already_installed: bool,
    pub replaced_version: Option<String>,
    pub backup: Option<PathBuf>,
    pub scan_findings: usize,
    /// Verifier that accepted the collection's signature, when one was required.
    pub signed_by: Option<String>,
    pub dependencies: Vec<InstallReport>,
    pub warnings: Vec<String>,
}

impl InstallReport {
    fn already_present(record: InstallRecord) -> Self {
        Self {
            id: record.id,
            version: record.version,
            uri: record.uri,
            source_name: record.source_name,
            install_location: record.install_location,
            checksum: record.checksum,
            already_installed: true,
            ..Default::default()
        }
    }

    /// Every collection this call actually installed, dependencies first.
    pub fn installed_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for dependency in &self.dependencies {
            ids.extend(dependency.installed_ids());
        }
        if !self.already_installed {
            ids.push(self.id.clone());
        }
        ids
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UninstallReport {
    pub id: String,
    pub version: String,
    pub removed_path: PathBuf,
    /// Dependents left with a dangling reference because of `force`.
    pub dependents: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct Installer {
    registry: Arc<Registry>,
    install_dir: PathBuf,
    records: RecordStore,
    locks: IdLocks,
    scanner: SecurityScanner,
    scan_timeout: Duration,
    policy: SecurityPolicy,
    trusted: TrustedSources,
    signatures: SignatureManager,
    hooks: HookRunner,
    elements: Option<Arc<dyn ElementRepository>>,
}

impl Installer {
    pub async fn new(registry: Arc<Registry>, install_dir: impl Into<PathBuf>) -> Result<Self> {
        let install_dir = install_dir.into();
        let records = RecordStore::open(&install_dir).await?;
        let policy = SecurityPolicy::default();

        Ok(Self {
            registry,
            install_dir,
            records,
            locks: IdLocks::new(),
            scanner: SecurityScanner::new().with_threshold(policy.scan_threshold),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            trusted: policy.trusted_sources()?,
            signatures: SignatureManager::with_available(),
            policy,
            hooks: HookRunner::default(),
            elements: None,
        })
    }

    pub fn with_policy(mut self, policy: SecurityPolicy) -> Result<Self> {
        policy.validate()?;
        self.trusted = policy.trusted_sources()?;
        self.scanner.set_threshold(policy.scan_threshold);
        self.policy = policy;
        Ok(self)
    }

    /// Replaces the scanner. The policy threshold is applied to it.
    pub fn with_scanner(mut self, scanner: SecurityScanner) -> Self {
        self.scanner = scanner.with_threshold(self.policy.scan_threshold);
        self
    }

    pub fn with_signature_manager(mut self, signatures: SignatureManager) -> Self {
        self.signatures = signatures;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_hook_runner(mut self, runner: HookRunner) -> Self {
        self.hooks = runner;
        self
    }

    pub fn with_element_repository(mut self, repository: Arc<dyn ElementRepository>) -> Self {
        self.elements = Some(repository);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn hook_runner(&self) -> &HookRunner {
        &self.hooks
    }

    pub fn collection_dir(&self, id: &str) -> Result<PathBuf> {
        let (author, name) = id_components(id)?;
        Ok(self.install_dir.join(author).join(name))
    }

    pub fn backup_dir(&self, id: &str) -> Result<PathBuf> {
        let (author, name) = id_components(id)?;
        Ok(self.install_dir.join(BACKUPS_DIR).join(author).join(name))
    }

    /// Backup snapshots of one collection, oldest first.
    pub async fn list_backups(&self, id: &str) -> Result<Vec<PathBuf>> {
        let dir = self.backup_dir(id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_op("list backups", &dir)(e)),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_op("list backups", &dir))?
        {
            if entry.path().is_dir() {
                backups.push(entry.path());
            }
        }
        backups.sort();
        Ok(backups)
    }

    pub(crate) fn hook_context(&self, id: &str, work_dir: &Path) -> Result<HookContext> {
        let existing = self.collection_dir(id)?;
        Ok(HookContext {
            collection_id: id.to_string(),
            work_dir: work_dir.to_path_buf(),
            existing_install: existing.is_dir().then_some(existing),
            backup_dir: self.backup_dir(id)?,
        })
    }

    pub async fn list_installed(&self) -> Vec<InstallRecord> {
        self.records.list().await
    }

    pub async fn get_installed(&self, id: &str) -> Option<InstallRecord> {
        self.records.get(id).await
    }

    /// IDs of installed collections that declare a dependency on `id`.
    pub async fn find_dependents(&self, id: &str) -> Vec<String> {
        self.records.dependents(id).await
    }

    /// Installs the collection at `uri` and, unless skipped, its dependencies first.
    pub async fn install(&self, uri: &str, options: &InstallOptions) -> Result<InstallReport> {
        self.install_in_chain(uri.to_string(), options.clone(), Vec::new())
            .await
    }

    /// `chain` holds the IDs of the installs that led here, outermost first.
    fn install_in_chain(
        &self,
        uri: String,
        options: InstallOptions,
        chain: Vec<String>,
    ) -> BoxFuture<'_, Result<InstallReport>> {
        async move {
            self.trusted
                .check(&uri, self.policy.require_trusted_source)?;

            debug!("[{}] {}", InstallStage::Resolving, uri);
            let fetched = self.registry.get(&uri).await?;
            let id = fetched.id();
            id_components(&id)?;

            if let Some(start) = chain.iter().position(|seen| *seen == id) {
                let mut cycle = chain[start..].to_vec();
                cycle.push(id);
                return Err(StoreError::CyclicDependency(cycle));
            }

            let is_dependency = !chain.is_empty();
            if let Some(existing) = self.records.get(&id).await {
                if is_dependency {
                    debug!("Dependency {} is already installed at {}", id, existing.version);
                    return Ok(InstallReport::already_present(existing));
                }
                if !options.force {
                    return Err(StoreError::AlreadyInstalled {
                        id,
                        version: existing.version,
                    });
                }
            }

            let mut report = InstallReport {
                id: id.clone(),
                version: fetched.manifest.version.clone(),
                uri: uri.clone(),
                source_name: fetched.metadata.source_name.clone(),
                ..Default::default()
            };

            if self.policy.should_require_signature(self.trusted.find_match(&uri)) {
                report.signed_by = Some(self.check_signature(&fetched).await?);
            }

            let dependency_ids = if options.skip_dependencies {
                self.recorded_dependency_ids(&fetched.manifest).await
            } else {
                let mut next_chain = chain.clone();
                next_chain.push(id.clone());
                self.install_dependencies(&fetched.manifest, &options, next_chain, &mut report)
                    .await?
            };

            self.check_content(&fetched, &options, &mut report).await?;

            let _guard = self.locks.acquire(&id).await;
            let existing = self.records.get(&id).await;
            if let Some(existing) = existing.clone() {
                if is_dependency {
                    return Ok(InstallReport::already_present(existing));
                }
                if !options.force {
                    return Err(StoreError::AlreadyInstalled {
                        id,
                        version: existing.version,
                    });
                }
            }

            self.stage_and_commit(&fetched, &uri, dependency_ids, existing, &options, &mut report)
                .await?;
            Ok(report)
        }
        .boxed()
    }

    async fn install_dependencies(
        &self,
        manifest: &Manifest,
        options: &InstallOptions,
        chain: Vec<String>,
        report: &mut InstallReport,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for dependency in &manifest.dependencies {
            if dependency.uri.trim().is_empty() {
                continue;
            }

            debug!("Resolving dependency {} of {}", dependency.uri, manifest.id());
            match self
                .install_in_chain(dependency.uri.clone(), options.clone(), chain.clone())
                .await
            {
                Ok(dependency_report) => {
                    ids.push(dependency_report.id.clone());
                    report.dependencies.push(dependency_report);
                }
                Err(e @ StoreError::CyclicDependency(_)) => return Err(e),
                Err(e) if dependency.optional => {
                    warn!(
                        "Optional dependency {} of {} failed to install: {}",
                        dependency.uri,
                        manifest.id(),
                        e
                    );
                    report.warnings.push(format!(
                        "optional dependency {} was not installed: {}",
                        dependency.uri, e
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ids)
    }

    /// Dependency IDs when dependency installation is skipped: the ID of an installed
    /// collection with the same URI, otherwise the URI itself.
    async fn recorded_dependency_ids(&self, manifest: &Manifest) -> Vec<String> {
        let mut ids = Vec::new();
        for dependency in &manifest.dependencies {
            if dependency.uri.trim().is_empty() {
                continue;
            }
            match self.records.find_by_uri(&dependency.uri).await {
                Some(record) => ids.push(record.id),
                None => ids.push(dependency.uri.clone()),
            }
        }
        ids
    }

    /// Verifies the manifest signature shipped with the collection and returns the
    /// name of the verifier that accepted it.
    async fn check_signature(&self, fetched: &FetchedCollection) -> Result<String> {
        let id = fetched.id();
        let root = fetched.content.root();
        let (signature, verifier) =
            find_signature(root).ok_or_else(|| StoreError::SignatureMissing(id.clone()))?;

        debug!("[{}] {} with {}", InstallStage::Verifying, id, verifier);
        self.signatures
            .verify(
                verifier,
                &root.join(MANIFEST_FILE),
                &signature,
                self.policy.signing_key.as_deref(),
            )
            .await?;
        Ok(verifier.to_string())
    }

    async fn check_content(
        &self,
        fetched: &FetchedCollection,
        options: &InstallOptions,
        report: &mut InstallReport,
    ) -> Result<()> {
        let id = fetched.id();
        let root = fetched.content.root();

        if options.skip_validation {
            debug!("Skipping validation of {}", id);
        } else {
            debug!("[{}] {}", InstallStage::Validating, id);
            let result = Validator::new(root).validate_comprehensive(&fetched.manifest);
            if !result.valid {
                info!("{} failed validation with {} error(s)", id, result.errors.len());
                return Err(StoreError::ValidationFailed(result.errors));
            }
            report
                .warnings
                .extend(result.warnings.iter().map(|w| format!("validation: {}", w)));
        }

        if !self.policy.scan_enabled {
            debug!("Security scanning disabled, skipping {}", id);
            return Ok(());
        }

        debug!("[{}] {} at threshold {}", InstallStage::Scanning, id, self.scanner.threshold());
        let scan = tokio::time::timeout(self.scan_timeout, self.scanner.scan(root))
            .await
            .map_err(|_| {
                StoreError::Timeout(format!(
                    "security scan of {} took longer than {:?}",
                    id, self.scan_timeout
                ))
            })??;
        report.scan_findings = scan.findings.len();
        if !scan.clean {
            let blocking = scan.blocking_findings();
            info!("{} blocked by {} security finding(s)", id, blocking.len());
            return Err(StoreError::SecurityBlocked(blocking));
        }
        Ok(())
    }

    async fn stage_and_commit(
        &self,
        fetched: &FetchedCollection,
        uri: &str,
        dependency_ids: Vec<String>,
        existing: Option<InstallRecord>,
        options: &InstallOptions,
        report: &mut InstallReport,
    ) -> Result<()> {
        let manifest = &fetched.manifest;
        let id = manifest.id();
        let final_dir = self.collection_dir(&id)?;

        let staging = tempfile::Builder::new()
            .prefix(".installing-")
            .tempdir_in(&self.install_dir)
            .map_err(io_op("create staging directory", &self.install_dir))?;
        copy_tree(fetched.content.root(), staging.path(), SKIP_ON_COPY).await?;

        let digest =
            checksum::compute_dir(staging.path(), ChecksumAlgorithm::Sha256, SKIP_ON_COPY).await?;
        let checksum = Checksum {
            algorithm: ChecksumAlgorithm::Sha256,
            value: digest,
        }
        .to_string();
        debug!("[{}] {} ({})", InstallStage::Staged, id, checksum);

        if !options.skip_hooks {
            let ctx = self.hook_context(&id, staging.path())?;
            report.warnings.extend(
                self.hooks
                    .run_stage(HookStage::PreInstall, manifest.hook_stage(HookStage::PreInstall), &ctx)
                    .await,
            );
        }

        let previous_version = existing.as_ref().map(|r| r.version.clone());
        let backup = self
            .swap_into_place(staging.path(), &final_dir, &id, previous_version.as_deref())
            .await?;

        if !options.skip_hooks {
            let ctx = self.hook_context(&id, &final_dir)?;
            report.warnings.extend(
                self.hooks
                    .run_stage(HookStage::PostInstall, manifest.hook_stage(HookStage::PostInstall), &ctx)
                    .await,
            );
        }

        let record = InstallRecord::new(
            manifest,
            uri,
            &fetched.metadata.source_name,
            final_dir.clone(),
            checksum.clone(),
            dependency_ids,
        );
        if let Err(e) = self.records.upsert(record).await {
            warn!("Failed to record install of {}, rolling back: {}", id, e);
            self.roll_back(&final_dir, backup.as_deref()).await;
            return Err(e);
        }

        if existing.is_some() {
            self.unregister_elements(&id, &mut report.warnings).await;
        }
        self.register_elements(manifest, &final_dir, &mut report.warnings)
            .await;

        info!("[{}] {}", InstallStage::Installed, manifest.full_id());
        report.install_location = final_dir;
        report.checksum = checksum;
        report.replaced_version = previous_version;
        report.backup = backup;
        Ok(())
    }

    /// Moves `staging` to `final_dir`. Whatever was at `final_dir` is moved into the
    /// backups directory first and its new path is returned.
    async fn swap_into_place(
        &self,
        staging: &Path,
        final_dir: &Path,
        id: &str,
        previous_version: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        let backup = if final_dir.exists() {
            let target = self.backup_dir(id)?.join(format!(
                "{}-{}",
                previous_version.unwrap_or("unknown"),
                timestamp_suffix()
            ));
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(io_op("create backup directory", parent))?;
            }
            tokio::fs::rename(final_dir, &target)
                .await
                .map_err(io_op("move previous install to backup", final_dir))?;
            debug!("Moved previous install of {} to {:?}", id, target);
            Some(target)
        } else {
            if let Some(parent) = final_dir.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(io_op("create collection directory", parent))?;
            }
            None
        };

        if let Err(e) = tokio::fs::rename(staging, final_dir).await {
            warn!("Failed to move staged files for {} into place: {}", id, e);
            if let Some(backup) = &backup {
                if let Err(restore) = tokio::fs::rename(backup, final_dir).await {
                    warn!("Failed to restore previous install of {}: {}", id, restore);
                }
            }
            return Err(io_op("move staged install into place", final_dir)(e));
        }
        Ok(backup)
    }

    async fn roll_back(&self, final_dir: &Path, backup: Option<&Path>) {
        if let Err(e) = tokio::fs::remove_dir_all(final_dir).await {
            warn!("Failed to remove {:?} during rollback: {}", final_dir, e);
        }
        match backup {
            Some(backup) => {
                if let Err(e) = tokio::fs::rename(backup, final_dir).await {
                    warn!("Failed to restore backup {:?}: {}", backup, e);
                }
            }
            None => {
                if let Some(parent) = final_dir.parent() {
                    remove_empty_parents(parent, &self.install_dir).await;
                }
            }
        }
    }

    async fn register_elements(&self, manifest: &Manifest, root: &Path, warnings: &mut Vec<String>) {
        let Some(repository) = &self.elements else {
            return;
        };
        for element in manifest.element_files(root) {
            let installed = InstalledElement {
                collection_id: manifest.id(),
                element_type: element.element_type,
                relative_path: element.relative_path,
                path: element.absolute_path,
            };
            if let Err(e) = repository.create(&installed).await {
                warn!("Failed to register element {}: {}", installed.key(), e);
                warnings.push(format!("element {} was not registered: {}", installed.key(), e));
            }
        }
    }

    async fn unregister_elements(&self, id: &str, warnings: &mut Vec<String>) {
        let Some(repository) = &self.elements else {
            return;
        };
        let elements = match repository.list(id).await {
            Ok(elements) => elements,
            Err(e) => {
                warnings.push(format!("could not list registered elements of {}: {}", id, e));
                return;
            }
        };
        for element in elements {
            if let Err(e) = repository.delete(&element.key()).await {
                warn!("Failed to remove element {}: {}", element.key(), e);
                warnings.push(format!("element {} was not removed: {}", element.key(), e));
            }
        }
    }

    /// Removes an installed collection.
    ///
    /// Fails with `HasDependents` while other installed collections depend on it,
    /// unless `force` is set. Their records are left untouched in that case.
    pub async fn uninstall(&self, id: &str, options: &UninstallOptions) -> Result<UninstallReport> {
        let _guard = self.locks.acquire(id).await;
        let record = self
            .records
            .get(id)
            .await
            .ok_or_else(|| StoreError::NotInstalled(id.to_string()))?;

        let dependents = self.records.dependents(id).await;
        if !dependents.is_empty() {
            if !options.force {
                return Err(StoreError::HasDependents {
                    id: id.to_string(),
                    dependents,
                });
            }
            warn!(
                "Force-uninstalling {} although it is required by: {}",
                id,
                dependents.join(", ")
            );
        }

        let mut report = UninstallReport {
            id: id.to_string(),
            version: record.version.clone(),
            removed_path: record.install_location.clone(),
            dependents,
            warnings: Vec::new(),
        };
        info!("Uninstalling {}@{}", id, record.version);

        let location = record.install_location.clone();
        if !options.skip_hooks && location.is_dir() {
            match Manifest::load_from_dir(&location).await {
                Ok(manifest) => {
                    let ctx = self.hook_context(id, &location)?;
                    report.warnings.extend(
                        self.hooks
                            .run_stage(
                                HookStage::PreUninstall,
                                manifest.hook_stage(HookStage::PreUninstall),
                                &ctx,
                            )
                            .await,
                    );
                }
                Err(e) => report
                    .warnings
                    .push(format!("pre_uninstall hooks skipped, manifest unreadable: {}", e)),
            }
        }

        // Park the files first so a failed record write can put them back.
        let parked = if location.exists() {
            let parked = self
                .install_dir
                .join(format!(".removing-{}", uuid::Uuid::new_v4()));
            tokio::fs::rename(&location, &parked)
                .await
                .map_err(io_op("move install aside", &location))?;
            Some(parked)
        } else {
            report
                .warnings
                .push(format!("install directory {:?} was already missing", location));
            None
        };

        if let Err(e) = self.records.remove(id).await {
            if let Some(parked) = &parked {
                if let Err(restore) = tokio::fs::rename(parked, &location).await {
                    warn!("Failed to restore {:?} after record error: {}", location, restore);
                }
            }
            return Err(e);
        }

        if let Some(parked) = parked {
            if let Err(e) = tokio::fs::remove_dir_all(&parked).await {
                warn!("Failed to delete {:?}: {}", parked, e);
                report
                    .warnings
                    .push(format!("leftover files at {:?}: {}", parked, e));
            }
        }
        if let Some(parent) = location.parent() {
            remove_empty_parents(parent, &self.install_dir).await;
        }

        self.unregister_elements(id, &mut report.warnings).await;
        info!("Uninstalled {}", id);
        Ok(report)
    }

    /// Recomputes the checksum of an installed collection and compares it with the
    /// recorded one.
    pub async fn verify(&self, id: &str) -> Result<InstallRecord> {
        let record = self
            .records
            .get(id)
            .await
            .ok_or_else(|| StoreError::NotInstalled(id.to_string()))?;

        let (algorithm, expected) = match record.checksum.parse::<Checksum>() {
            Ok(parsed) => (parsed.algorithm, parsed.value),
            Err(_) => (ChecksumAlgorithm::Sha256, record.checksum.clone()),
        };

        if !record.install_location.is_dir() {
            return Err(StoreError::ChecksumMismatch {
                path: record.install_location.clone(),
                expected,
                actual: "missing".to_string(),
            });
        }

        let actual =
            checksum::compute_dir(&record.install_location, algorithm, SKIP_ON_COPY).await?;
        if !checksum::digests_equal(&actual, &expected) {
            return Err(StoreError::ChecksumMismatch {
                path: record.install_location.clone(),
                expected,
                actual,
            });
        }
        debug!("Verified {} ({})", id, record.checksum);
        Ok(record)
    }
}
