use eyre::{Result, WrapErr};
use trove_store::{BrowseFilter, CollectionManager, CollectionMetadata};

pub fn build_filter(
    query: Option<String>,
    category: Option<String>,
    author: Option<String>,
    tags: Vec<String>,
    limit: Option<usize>,
    offset: usize,
) -> BrowseFilter {
    let mut filter = tags
        .into_iter()
        .filter(|tag| !tag.trim().is_empty())
        .fold(BrowseFilter::new().with_offset(offset), |filter, tag| {
            filter.with_tag(tag)
        });
    if let Some(query) = query {
        filter = filter.with_query(query);
    }
    if let Some(category) = category {
        filter = filter.with_category(category);
    }
    if let Some(author) = author {
        filter = filter.with_author(author);
    }
    if let Some(limit) = limit {
        filter = filter.with_limit(limit);
    }
    filter
}

pub async fn handle_browse_command(
    manager: &CollectionManager,
    filter: &BrowseFilter,
    source: Option<&str>,
) -> Result<()> {
    let outcome = manager
        .registry()
        .browse(filter, source)
        .await
        .wrap_err("Browse failed")?;

    for failure in &outcome.source_errors {
        println!("⚠️  Source '{}' unavailable: {}", failure.source_name, failure.error);
    }

    if !print_collections(&outcome.collections) {
        return Ok(());
    }

    if outcome.is_partial() {
        println!();
        println!("💡 Results are partial; some sources could not be reached");
    }
    Ok(())
}

/// Indexes every source, then ranks the indexed collections against the filter.
pub async fn handle_search_command(manager: &CollectionManager, filter: &BrowseFilter) -> Result<()> {
    let stats = manager
        .registry()
        .rebuild_index()
        .await
        .wrap_err("Failed to index collection sources")?;
    tracing::debug!("Searching {} indexed collection(s)", stats.total_collections);

    let results = manager.registry().search(filter).await;
    print_collections(&results);
    Ok(())
}

/// Returns false when there was nothing to print.
fn print_collections(collections: &[CollectionMetadata]) -> bool {
    if collections.is_empty() {
        println!("No collections found");
        return false;
    }

    println!("📚 Found {} collection(s):", collections.len());
    for collection in collections {
        println!();
        println!("  {} v{}", collection.id(), collection.version);
        println!("    {}", collection.description);
        if let Some(category) = &collection.category {
            println!("    Category: {}", category);
        }
        if !collection.tags.is_empty() {
            println!("    Tags: {}", collection.tags.join(", "));
        }
        if collection.stars > 0 {
            println!("    ⭐ {}", collection.stars);
        }
        println!("    Install: trove install {}", collection.uri);
    }
    true
}

pub async fn handle_info_command(manager: &CollectionManager, uri: &str) -> Result<()> {
    let fetched = manager
        .registry()
        .get_cached(uri)
        .await
        .wrap_err_with(|| format!("Failed to fetch {}", uri))?;
    let manifest = &fetched.manifest;

    println!("📦 {}", manifest.full_id());
    println!("  Description: {}", manifest.description);
    println!("  Source: {} ({})", fetched.metadata.source_name, fetched.metadata.uri);
    if let Some(category) = &manifest.category {
        println!("  Category: {}", category);
    }
    if let Some(license) = &manifest.license {
        println!("  License: {}", license);
    }
    if !manifest.tags.is_empty() {
        println!("  Tags: {}", manifest.tags.join(", "));
    }
    if let Some(homepage) = &manifest.homepage {
        println!("  Homepage: {}", homepage);
    }

    let stats = manifest.tally_elements(fetched.content.root());
    println!(
        "  Elements: {} (personas {}, skills {}, templates {}, agents {}, memories {}, ensembles {})",
        stats.total_elements,
        stats.personas,
        stats.skills,
        stats.templates,
        stats.agents,
        stats.memories,
        stats.ensembles
    );

    if !manifest.dependencies.is_empty() {
        println!("  Dependencies:");
        for dependency in &manifest.dependencies {
            let optional = if dependency.optional { " (optional)" } else { "" };
            println!(
                "    - {} {}{}",
                dependency.uri,
                dependency.version.as_deref().unwrap_or("*"),
                optional
            );
        }
    }

    if let Some(installed) = manager.installer().get_installed(&manifest.id()).await {
        println!("  ✅ Installed: v{}", installed.version);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_drops_blank_tags() {
        let filter = build_filter(
            Some("deploy".to_string()),
            None,
            Some("alice".to_string()),
            vec!["ci".to_string(), " ".to_string()],
            Some(10),
            20,
        );
        assert_eq!(filter.tags, vec!["ci"]);
        assert_eq!(filter.query.as_deref(), Some("deploy"));
        assert_eq!(filter.author.as_deref(), Some("alice"));
        assert_eq!(filter.limit, Some(10));
        assert_eq!(filter.offset, 20);
        assert!(filter.category.is_none());
    }
}
