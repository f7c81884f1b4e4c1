use eyre::{Result, WrapErr};
use trove_store::publish::EnvTokenProvider;
use trove_store::{CollectionManager, PublishOptions, PublishOutcome};

pub async fn handle_publish_command(
    manager: &CollectionManager,
    target: &str,
    options: &PublishOptions,
) -> Result<()> {
    let outcome = manager
        .publish(target, options, &EnvTokenProvider::default())
        .await
        .wrap_err_with(|| format!("Failed to publish {}", target))?;

    print_outcome(&outcome);
    if outcome.is_success() {
        Ok(())
    } else {
        Err(eyre::eyre!("publish ended with {}", outcome.status))
    }
}

fn print_outcome(outcome: &PublishOutcome) {
    for line in &outcome.transcript {
        println!("  {}", line);
    }
    for error in &outcome.validation_errors {
        println!("  ❌ {}", error);
    }
    for finding in &outcome.security_findings {
        println!(
            "  🛡️  [{}] {}:{} {}",
            finding.severity, finding.file, finding.line, finding.rule.description
        );
    }
    for warning in &outcome.warnings {
        println!("  ⚠️  {}", warning);
    }

    if let Some(tarball) = &outcome.tarball {
        println!("📦 Package: {}", tarball.display());
    }
    if let Some(checksum) = &outcome.checksum {
        println!("  Digest: {}", checksum);
    }
    if let Some(pr_url) = &outcome.pr_url {
        println!("🔗 Pull request: {}", pr_url);
    }
    if let Some(release_url) = &outcome.release_url {
        println!("🏷️  Release: {}", release_url);
    }
    if let Some(error) = &outcome.error {
        println!("❌ {}", error);
    }
    if outcome.is_success() {
        println!("✅ {}", outcome.status);
    }
}
