//! Local collection lifecycle demo
//!
//! Writes a collection into a temporary directory, validates it, installs it from a
//! `file://` URI, verifies the checksum and exports it again.
//!
//! Run with: cargo run --example local_lifecycle

use std::sync::Arc;

use tempfile::TempDir;
use trove_store::{
    CollectionManager, ExportOptions, InstallOptions, Installer, LocalSource, Manifest, Registry,
    RegistryConfig, Validator,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("📚 Local Collection Lifecycle Demo");
    println!("=================================");

    let temp_dir = TempDir::new()?;
    let sources = temp_dir.path().join("sources");
    let collection = sources.join("devops");
    tokio::fs::create_dir_all(collection.join("skills")).await?;
    tokio::fs::write(
        collection.join("collection.yaml"),
        "name: devops\n\
         version: 1.0.0\n\
         author: alice\n\
         description: Deployment and incident response skills\n\
         category: devops\n\
         tags: [deploy, incidents]\n\
         elements:\n  - path: skills/*.md\n    type: skill\n",
    )
    .await?;
    tokio::fs::write(collection.join("skills/deploy.md"), "# Deploy\nRoll out in stages.\n").await?;
    tokio::fs::write(collection.join("skills/rollback.md"), "# Rollback\nRevert quickly.\n").await?;

    let manifest = Manifest::load_from_dir(&collection).await?;
    let validation = Validator::new(&collection).validate_comprehensive(&manifest);
    println!("\n🔍 Validation: valid={} warnings={}", validation.valid, validation.warnings.len());

    let registry = Registry::new(RegistryConfig::default())
        .with_source(Arc::new(LocalSource::new(vec![sources.clone()])));
    let installer = Installer::new(Arc::new(registry), temp_dir.path().join("installed")).await?;
    let manager = CollectionManager::new(Arc::new(installer));

    let report = manager
        .installer()
        .install(&LocalSource::uri_for(&collection), &InstallOptions::new())
        .await?;
    println!("\n📥 Installed {} v{} at {}", report.id, report.version, report.install_location.display());
    println!("  Checksum: {}", report.checksum);

    let record = manager.installer().verify(&report.id).await?;
    println!("\n✅ Verified {} ({})", record.id, record.status);

    let export = manager
        .export(&report.id, &temp_dir.path().join("devops.tar.gz"), &ExportOptions::new())
        .await?;
    println!("\n📦 Exported {} file(s) to {}", export.files, export.archive.display());
    println!("  Sidecar: {}", export.checksums.display());

    Ok(())
}
