//! Trove Store - collection package management
//!
//! This crate manages "collections": versioned bundles of AI-assistant elements
//! (personas, skills, templates, agents, memories and ensembles) described by a
//! `collection.yaml` manifest. Collections are discovered and fetched from GitHub
//! repositories, local directories or HTTP endpoints, validated, scanned for dangerous
//! content, installed into a local workspace, and published back to a shared registry
//! repository through a pull request.
//!
//! # Features
//!
//! - **Multiple sources**: `github://`, `file://` and `https://` behind one
//!   [`CollectionSource`] trait, aggregated by the [`Registry`]
//! - **Search**: a metadata index with relevance ranking over everything browsed
//! - **Validation**: an ordered battery of manifest rules with actionable fixes
//! - **Security scanning**: severity-classified pattern rules with a blocking threshold
//! - **Signatures**: optional GPG or SSH signatures over the manifest, enforced by policy
//! - **Atomic installs**: staged copies, backups of replaced installs and dependency
//!   ordering with cycle detection
//! - **Publishing**: fork, commit, push and pull request with resumable progress
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trove_store::{InstallOptions, Installer, LocalSource, Registry, RegistryConfig};
//!
//! # async fn example() -> trove_store::Result<()> {
//! let registry = Registry::new(RegistryConfig::default())
//!     .with_source(Arc::new(LocalSource::new(vec!["./collections".into()])));
//! let installer = Installer::new(Arc::new(registry), "./installed").await?;
//!
//! let report = installer
//!     .install("file:///srv/collections/devops", &InstallOptions::new())
//!     .await?;
//! println!("Installed {}@{}", report.id, report.version);
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod config;
pub mod error;
pub mod index;
pub mod installer;
pub mod manager;
pub mod manifest;
pub mod publish;
pub mod registry;
pub mod scanner;
pub mod signature;
pub mod sources;
pub mod trust;
pub mod utils;
pub mod validation;

pub use checksum::{Checksum, ChecksumAlgorithm};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use index::{IndexStats, MetadataIndex};
pub use installer::{
    ElementRepository, InstallOptions, InstallRecord, InstallReport, InstallStatus, Installer,
    UninstallOptions, UninstallReport,
};
pub use manager::{
    CollectionManager, ExportOptions, ExportReport, UpdateCheckResult, UpdateOptions,
    UpdateResult,
};
pub use manifest::{Manifest, MANIFEST_FILE};
pub use publish::{
    PublishOptions, PublishOutcome, PublishSession, PublishStatus, Publisher, TokenProvider,
};
pub use registry::{BrowseOutcome, DependencyGraph, Registry, RegistryConfig, RegistryStats};
pub use scanner::{ScanFinding, ScanResult, SecurityScanner, Severity};
pub use signature::{GpgVerifier, SignatureManager, SignatureVerifier, SshVerifier};
pub use sources::archive::Compression;
pub use sources::{BrowseFilter, CollectionMetadata, CollectionSource, LocalSource};
pub use trust::{SecurityPolicy, TrustedSources};
pub use validation::{ValidationError, ValidationResult, Validator};
