use std::path::Path;

use eyre::{Result, WrapErr};
use trove_store::{CollectionManager, ExportOptions};

pub async fn handle_export_command(
    manager: &CollectionManager,
    id: &str,
    output: &Path,
    options: &ExportOptions,
) -> Result<()> {
    let report = manager
        .export(id, output, options)
        .await
        .wrap_err_with(|| format!("Failed to export {}", id))?;

    println!("📦 Exported {} v{}", report.id, report.version);
    println!("  Archive: {}", report.archive.display());
    println!("  Checksums: {}", report.checksums.display());
    println!("  Digest: {}", report.checksum);
    println!("  Files: {}", report.files);
    if options.include_backups {
        println!("  Backups included: {}", report.backups_included);
    }
    Ok(())
}
