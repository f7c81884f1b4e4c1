use eyre::{Result, WrapErr};
use trove_store::{
    CollectionManager, InstallOptions, InstallReport, StoreError, UninstallOptions,
};

pub async fn handle_install_command(
    manager: &CollectionManager,
    uri: &str,
    options: &InstallOptions,
) -> Result<()> {
    println!("📥 Installing {}", uri);

    let report = match manager.installer().install(uri, options).await {
        Ok(report) => report,
        Err(StoreError::ValidationFailed(errors)) => {
            println!("❌ Validation failed:");
            for error in &errors {
                println!("  - {}", error);
            }
            return Err(eyre::eyre!("{} validation error(s)", errors.len()));
        }
        Err(StoreError::SecurityBlocked(findings)) => {
            println!("❌ Blocked by security scan:");
            for finding in &findings {
                println!(
                    "  [{}] {}:{} {} ({})",
                    finding.severity, finding.file, finding.line, finding.rule.description, finding.rule.name
                );
            }
            return Err(eyre::eyre!("{} blocking finding(s)", findings.len()));
        }
        Err(StoreError::SignatureMissing(id)) => {
            println!("❌ {} is not signed, but the security policy requires a signature", id);
            println!("💡 Ship collection.yaml.asc (GPG) or collection.yaml.sshsig (SSH), or set policy.allow_unsigned");
            return Err(eyre::eyre!("missing signature for {}", id));
        }
        Err(e) => return Err(e).wrap_err_with(|| format!("Failed to install {}", uri)),
    };

    print_install_report(&report, 0);
    println!("✅ Installed {} v{}", report.id, report.version);
    Ok(())
}

fn print_install_report(report: &InstallReport, depth: usize) {
    for dependency in &report.dependencies {
        print_install_report(dependency, depth + 1);
    }
    let indent = "  ".repeat(depth + 1);
    if report.already_installed {
        println!("{}• {} v{} already installed", indent, report.id, report.version);
        return;
    }
    match &report.replaced_version {
        Some(previous) => println!(
            "{}• {} v{} -> v{} at {}",
            indent,
            report.id,
            previous,
            report.version,
            report.install_location.display()
        ),
        None => println!(
            "{}• {} v{} at {}",
            indent,
            report.id,
            report.version,
            report.install_location.display()
        ),
    }
    if let Some(backup) = &report.backup {
        println!("{}  Backup: {}", indent, backup.display());
    }
    if let Some(verifier) = &report.signed_by {
        println!("{}  🔏 Signature verified ({})", indent, verifier);
    }
    if report.scan_findings > 0 {
        println!("{}  {} non-blocking scan finding(s)", indent, report.scan_findings);
    }
    for warning in &report.warnings {
        println!("{}  ⚠️  {}", indent, warning);
    }
}

pub async fn handle_uninstall_command(
    manager: &CollectionManager,
    id: &str,
    options: &UninstallOptions,
) -> Result<()> {
    match manager.installer().uninstall(id, options).await {
        Ok(report) => {
            println!("🗑️  Removed {} v{}", report.id, report.version);
            if !report.dependents.is_empty() {
                println!(
                    "⚠️  These collections still reference it: {}",
                    report.dependents.join(", ")
                );
            }
            for warning in &report.warnings {
                println!("⚠️  {}", warning);
            }
            Ok(())
        }
        Err(StoreError::HasDependents { id, dependents }) => {
            println!("❌ {} is required by: {}", id, dependents.join(", "));
            println!("💡 Use --force to remove it anyway");
            Err(eyre::eyre!("{} has dependents", id))
        }
        Err(e) => Err(e).wrap_err_with(|| format!("Failed to uninstall {}", id)),
    }
}

pub async fn handle_list_command(manager: &CollectionManager, detailed: bool) -> Result<()> {
    let records = manager.installer().list_installed().await;
    if records.is_empty() {
        println!("No collections installed");
        println!("💡 Find some with: trove browse");
        return Ok(());
    }

    println!("📦 Installed collections ({}):", records.len());
    for record in &records {
        println!("  {} v{} [{}]", record.id, record.version, record.status);
        if !detailed {
            continue;
        }
        println!("    Source: {} ({})", record.source_name, record.uri);
        println!("    Location: {}", record.install_location.display());
        println!("    Installed: {}", record.installed_at.format("%Y-%m-%d %H:%M"));
        println!("    Checksum: {}", record.checksum);
        if !record.dependencies.is_empty() {
            println!("    Depends on: {}", record.dependencies.join(", "));
        }
    }
    Ok(())
}

pub async fn handle_verify_command(manager: &CollectionManager, id: &str) -> Result<()> {
    match manager.installer().verify(id).await {
        Ok(record) => {
            println!("✅ {} v{} matches {}", record.id, record.version, record.checksum);
            Ok(())
        }
        Err(StoreError::ChecksumMismatch { expected, actual, .. }) => {
            println!("❌ {} has been modified since install", id);
            println!("  Expected: {}", expected);
            println!("  Actual:   {}", actual);
            Err(eyre::eyre!("checksum mismatch for {}", id))
        }
        Err(e) => Err(e).wrap_err_with(|| format!("Failed to verify {}", id)),
    }
}
