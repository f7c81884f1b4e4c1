use eyre::{Result, WrapErr};
use trove_store::{CollectionManager, UpdateOptions, UpdateResult};

pub async fn handle_update_command(
    manager: &CollectionManager,
    id: &str,
    options: &UpdateOptions,
) -> Result<()> {
    let result = manager
        .update(id, options)
        .await
        .wrap_err_with(|| format!("Failed to update {}", id))?;
    print_update_result(&result);
    if result.errors.is_empty() {
        Ok(())
    } else {
        Err(eyre::eyre!("update of {} failed", id))
    }
}

pub async fn handle_update_all_command(manager: &CollectionManager, options: &UpdateOptions) -> Result<()> {
    let results = manager.update_all(options).await;
    if results.is_empty() {
        println!("No collections installed");
        return Ok(());
    }

    for result in &results {
        print_update_result(result);
    }

    let updated = results.iter().filter(|r| r.updated).count();
    let failed = results.iter().filter(|r| !r.errors.is_empty()).count();
    println!();
    println!("📊 {} updated, {} failed, {} unchanged", updated, failed, results.len().saturating_sub(updated + failed));
    if failed > 0 {
        return Err(eyre::eyre!("{} update(s) failed", failed));
    }
    Ok(())
}

fn print_update_result(result: &UpdateResult) {
    if !result.errors.is_empty() {
        println!("❌ {}: {}", result.id, result.errors.join("; "));
    } else if result.updated {
        println!(
            "✅ {} v{} -> v{}",
            result.id,
            result.from_version,
            result.to_version.as_deref().unwrap_or("?")
        );
    } else {
        println!("  {} v{}: {}", result.id, result.from_version, result.message);
    }
    for warning in &result.warnings {
        println!("  ⚠️  {}", warning);
    }
}

pub async fn handle_outdated_command(manager: &CollectionManager) -> Result<()> {
    let checks = manager.check_updates().await;
    if checks.is_empty() {
        println!("No collections installed");
        return Ok(());
    }

    let mut outdated = 0;
    for check in &checks {
        if let Some(error) = &check.error {
            println!("⚠️  {} v{}: {}", check.id, check.installed_version, error);
        } else if check.update_available {
            outdated += 1;
            println!(
                "⬆️  {} v{} -> v{}",
                check.id,
                check.installed_version,
                check.latest_version.as_deref().unwrap_or("?")
            );
        }
    }

    if outdated == 0 {
        println!("✅ All {} collection(s) are up to date", checks.len());
    } else {
        println!("💡 Run `trove update --all` to update");
    }
    Ok(())
}
