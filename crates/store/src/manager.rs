use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use glob::Pattern;
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::checksum::{self, Checksum, ChecksumAlgorithm};
use crate::error::{Result, StoreError};
use crate::installer::{InstallOptions, InstallRecord, Installer, BACKUPS_DIR, PUBLISH_DIR};
use crate::manifest::{relative_to_slash, HookStage, Manifest};
use crate::publish::{PublishOptions, PublishOutcome, Publisher, TokenProvider};
use crate::registry::{DependencyGraph, Registry};
use crate::sources::archive::{self, Compression};
use crate::utils::id_components;

const ALWAYS_SKIPPED: &[&str] = &[".git"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub skip_dependencies: bool,
    pub skip_validation: bool,
    pub skip_hooks: bool,
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
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

    fn install_options(&self) -> InstallOptions {
        InstallOptions::new()
            .with_force(true)
            .with_skip_dependencies(self.skip_dependencies)
            .with_skip_validation(self.skip_validation)
            .with_skip_hooks(self.skip_hooks)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Also pack the snapshots under `.backups/<author>/<name>/`.
    pub include_backups: bool,
    pub compression: Compression,
    /// Glob patterns matched against `/`-separated paths relative to the collection.
    pub exclude_patterns: Vec<String>,
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backups(mut self, include: bool) -> Self {
        self.include_backups = include;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    fn compiled_excludes(&self) -> Result<Vec<Pattern>> {
        self.exclude_patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| StoreError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReport {
    pub id: String,
    pub version: String,
    pub archive: PathBuf,
    pub checksums: PathBuf,
    /// `sha256:<hex>` of the archive.
    pub checksum: String,
    pub files: usize,
    pub backups_included: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub id: String,
    pub from_version: String,
    pub to_version: Option<String>,
    pub updated: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub message: String,
}

impl UpdateResult {
    fn failed(id: &str, from_version: &str, error: &StoreError) -> Self {
        Self {
            id: id.to_string(),
            from_version: from_version.to_string(),
            errors: vec![error.to_string()],
            message: format!("Update of {} failed", id),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCheckResult {
    pub id: String,
    pub installed_version: String,
    pub latest_version: Option<String>,
    pub update_available: bool,
    /// Why the latest version could not be determined.
    pub error: Option<String>,
}

/// `true` when `latest` should replace `installed`. Unparsable versions fall back to
/// plain inequality.
pub fn is_newer(installed: &str, latest: &str) -> bool {
    match (Version::parse(installed), Version::parse(latest)) {
        (Ok(installed), Ok(latest)) => latest > installed,
        _ => installed.trim() != latest.trim(),
    }
}

/// Multi-collection workflows on top of the installer, the registry and the publisher.
pub struct CollectionManager {
    installer: Arc<Installer>,
    publisher: Option<Publisher>,
}

impl CollectionManager {
    pub fn new(installer: Arc<Installer>) -> Self {
        Self {
            installer,
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn installer(&self) -> &Arc<Installer> {
        &self.installer
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.installer.registry()
    }

    /// Working area for publishing an installed collection, `<install_dir>/.publish/<author>/<name>`.
    pub fn publish_dir(&self, id: &str) -> Result<PathBuf> {
        let (author, name) = id_components(id)?;
        Ok(self.installer.install_dir().join(PUBLISH_DIR).join(author).join(name))
    }

    async fn installed(&self, id: &str) -> Result<InstallRecord> {
        self.installer
            .get_installed(id)
            .await
            .ok_or_else(|| StoreError::NotInstalled(id.to_string()))
    }

    /// Compares one installed collection with what its source currently offers.
    pub async fn check_update(&self, id: &str) -> Result<UpdateCheckResult> {
        let record = self.installed(id).await?;
        Ok(self.check_record(&record).await)
    }

    async fn check_record(&self, record: &InstallRecord) -> UpdateCheckResult {
        let mut result = UpdateCheckResult {
            id: record.id.clone(),
            installed_version: record.version.clone(),
            ..Default::default()
        };

        match self.registry().get_cached(&record.uri).await {
            Ok(fetched) => {
                let latest = fetched.manifest.version.clone();
                result.update_available = is_newer(&record.version, &latest);
                result.latest_version = Some(latest);
            }
            Err(e) => {
                debug!("Update check for {} failed: {}", record.id, e);
                result.error = Some(e.to_string());
            }
        }

        let missing: Vec<String> = {
            let mut missing = Vec::new();
            for dependency in &record.dependencies {
                if self.installer.get_installed(dependency).await.is_none() {
                    missing.push(dependency.clone());
                }
            }
            missing
        };
        if !missing.is_empty() && result.error.is_none() {
            result.error = Some(format!("missing dependencies: {}", missing.join(", ")));
        }
        result
    }

    /// Read-only comparison of every installed collection with its source.
    pub async fn check_updates(&self) -> Vec<UpdateCheckResult> {
        let records = self.installer.list_installed().await;
        let checks = records.iter().map(|record| self.check_record(record));
        let results = join_all(checks).await;
        info!(
            "{} of {} installed collection(s) have updates",
            results.iter().filter(|r| r.update_available).count(),
            results.len()
        );
        results
    }

    /// Reinstalls `id` from its source when the source offers a newer version.
    pub async fn update(&self, id: &str, options: &UpdateOptions) -> Result<UpdateResult> {
        let record = self.installed(id).await?;
        let registry = self.registry();

        registry.invalidate(&record.uri);
        let latest = registry.get_cached(&record.uri).await?;
        let to_version = latest.manifest.version.clone();

        let mut result = UpdateResult {
            id: id.to_string(),
            from_version: record.version.clone(),
            to_version: Some(to_version.clone()),
            ..Default::default()
        };
        if !is_newer(&record.version, &to_version) {
            result.message = format!("{} is up to date ({})", id, record.version);
            return Ok(result);
        }
        drop(latest);

        info!("Updating {} from {} to {}", id, record.version, to_version);
        if !options.skip_hooks {
            self.run_update_hooks(id, &record.install_location, HookStage::PreUpdate, &mut result.warnings)
                .await;
        }

        let report = self
            .installer
            .install(&record.uri, &options.install_options())
            .await?;
        result.warnings.extend(report.warnings);

        if !options.skip_hooks {
            self.run_update_hooks(id, &report.install_location, HookStage::PostUpdate, &mut result.warnings)
                .await;
        }

        result.updated = true;
        result.to_version = Some(report.version.clone());
        result.message = format!("Updated {} from {} to {}", id, record.version, report.version);
        Ok(result)
    }

    async fn run_update_hooks(&self, id: &str, location: &Path, stage: HookStage, warnings: &mut Vec<String>) {
        let manifest = match Manifest::load_from_dir(location).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warnings.push(format!("{} hooks skipped, manifest unreadable: {}", stage, e));
                return;
            }
        };
        let hooks = manifest.hook_stage(stage);
        if hooks.is_empty() {
            return;
        }
        match self.installer.hook_context(id, location) {
            Ok(ctx) => warnings.extend(self.installer.hook_runner().run_stage(stage, hooks, &ctx).await),
            Err(e) => warnings.push(format!("{} hooks skipped: {}", stage, e)),
        }
    }

    /// Updates every installed collection, dependencies before their dependents. A
    /// failure is recorded in that collection's result and the batch continues.
    pub async fn update_all(&self, options: &UpdateOptions) -> Vec<UpdateResult> {
        let records = self.installer.list_installed().await;
        let mut graph = DependencyGraph::new();
        for record in &records {
            graph.add_node(&record.id);
        }
        let mut order_warning = None;
        for record in &records {
            for dependency in &record.dependencies {
                if records.iter().any(|r| &r.id == dependency) {
                    if let Err(e) = graph.add_edge(&record.id, dependency) {
                        order_warning = Some(e.to_string());
                    }
                }
            }
        }
        let order = graph
            .topological_order()
            .unwrap_or_else(|_| records.iter().map(|r| r.id.clone()).collect());

        let mut results = Vec::with_capacity(order.len());
        for id in order {
            let from_version = records
                .iter()
                .find(|r| r.id == id)
                .map(|r| r.version.clone())
                .unwrap_or_default();
            match self.update(&id, options).await {
                Ok(mut result) => {
                    if let Some(warning) = &order_warning {
                        result.warnings.push(format!("update order is not dependency-aware: {}", warning));
                    }
                    results.push(result);
                }
                Err(e) => {
                    error!("Failed to update {}: {}", id, e);
                    results.push(UpdateResult::failed(&id, &from_version, &e));
                }
            }
        }
        results
    }

    /// Packs an installed collection into a gzip tarball at `output` and writes the
    /// checksum sidecar next to it. An existing directory as `output` receives
    /// `<author>-<name>-<version>.tar.gz`.
    pub async fn export(&self, id: &str, output: &Path, options: &ExportOptions) -> Result<ExportReport> {
        let record = self.installed(id).await?;
        let output = if output.is_dir() {
            output.join(format!("{}-{}.tar.gz", id.replace('/', "-"), record.version))
        } else {
            output.to_path_buf()
        };
        let output = output.as_path();
        if !record.install_location.is_dir() {
            return Err(StoreError::NotFound(format!(
                "{} (install directory {:?} is missing)",
                id, record.install_location
            )));
        }
        let excludes = options.compiled_excludes()?;

        let mut files = collect_files(&record.install_location, "", &excludes).await?;
        let file_count = files.len();
        let mut backups_included = 0;
        if options.include_backups {
            for backup in self.installer.list_backups(id).await? {
                let Some(label) = backup.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                    continue;
                };
                let prefix = format!("{}/{}/{}/", BACKUPS_DIR, id, label);
                files.extend(collect_files(&backup, &prefix, &excludes).await?);
                backups_included += 1;
            }
        }

        info!("Exporting {} ({} file(s)) to {:?}", id, files.len(), output);
        archive::create(output, files, options.compression).await?;
        let digest = checksum::compute(output, ChecksumAlgorithm::Sha256).await?;
        let checksums = checksum::write_sidecar(output, &digest).await?;

        Ok(ExportReport {
            id: id.to_string(),
            version: record.version,
            archive: output.to_path_buf(),
            checksums,
            checksum: Checksum {
                algorithm: ChecksumAlgorithm::Sha256,
                value: digest,
            }
            .to_string(),
            files: file_count,
            backups_included,
        })
    }

    /// Publishes a collection directory, or the install location of an installed ID.
    pub async fn publish(
        &self,
        id_or_path: &str,
        options: &PublishOptions,
        tokens: &dyn TokenProvider,
    ) -> Result<PublishOutcome> {
        let publisher = self.publisher.as_ref().ok_or_else(|| {
            StoreError::InvalidConfiguration("no publisher configured".to_string())
        })?;

        let candidate = PathBuf::from(id_or_path);
        let (dir, options) = if candidate.is_dir() {
            (candidate, options.clone())
        } else {
            let record = self.installed(id_or_path).await?;
            // Build output and progress must stay out of the install, or its checksum breaks.
            let mut options = options.clone();
            if options.state_dir.is_none() {
                options.state_dir = Some(self.publish_dir(&record.id)?);
            }
            (record.install_location, options)
        };

        let outcome = publisher.publish(&dir, &options, tokens).await;
        if !outcome.is_success() {
            warn!("Publish of {:?} ended with {}", dir, outcome.status);
        }
        Ok(outcome)
    }
}

/// Regular files under `root` as (archive name, path) pairs, sorted by name.
async fn collect_files(root: &Path, prefix: &str, excludes: &[Pattern]) -> Result<Vec<(String, PathBuf)>> {
    let root = root.to_path_buf();
    let prefix = prefix.to_string();
    let excludes = excludes.to_vec();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        let mut walker = WalkDir::new(&root).follow_links(false).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| StoreError::IoOperation {
                operation: "walk directory".to_string(),
                path: root.clone(),
                source: e.into(),
            })?;
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let slash = relative_to_slash(relative);
            let skipped = ALWAYS_SKIPPED.iter().any(|name| entry.file_name() == *name)
                || excludes.iter().any(|pattern| pattern.matches(&slash));
            if skipped {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }
            if entry.file_type().is_file() {
                files.push((format!("{}{}", prefix, slash), entry.path().to_path_buf()));
            }
        }
        files.sort();
        Ok(files)
    })
    .await
    .map_err(|e| StoreError::IoError(std::io::Error::other(e)))?
}
