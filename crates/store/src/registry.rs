//! Aggregation over collection sources.
//!
//! The [`Registry`] routes `get` by URI scheme and fans `browse` out to every source
//! concurrently. A slow or failing source never fails the whole browse: its error is
//! attached to the [`BrowseOutcome`] next to whatever the other sources returned.
//!
//! A [`MetadataIndex`] built from a full browse backs relevance-ranked [`Registry::search`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::index::{IndexStats, MetadataIndex};
use crate::sources::{
    paginate, uri_scheme, BrowseFilter, CollectionMetadata, CollectionSource, FetchedCollection,
};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Bound on every single source call.
    #[serde(with = "duration_secs")]
    pub source_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,
    pub cache_enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_enabled: true,
        }
    }
}

impl RegistryConfig {
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// One source that failed during a fan-out browse.
#[derive(Debug)]
pub struct SourceFailure {
    pub source_name: String,
    pub error: StoreError,
}

#[derive(Debug, Default)]
pub struct BrowseOutcome {
    pub collections: Vec<CollectionMetadata>,
    pub source_errors: Vec<SourceFailure>,
}

impl BrowseOutcome {
    pub fn is_partial(&self) -> bool {
        !self.source_errors.is_empty()
    }
}

struct CachedCollection {
    collection: FetchedCollection,
    expires_at: Instant,
    hits: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_cached: usize,
    pub expired: usize,
    pub total_hits: u64,
    pub ttl_secs: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub sources: usize,
    pub cache: CacheStats,
    pub index: IndexStats,
}

pub struct Registry {
    sources: Vec<Arc<dyn CollectionSource>>,
    cache: DashMap<String, CachedCollection>,
    index: RwLock<MetadataIndex>,
    config: RegistryConfig,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            sources: Vec::new(),
            cache: DashMap::new(),
            index: RwLock::new(MetadataIndex::new()),
            config,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn CollectionSource>) -> Self {
        self.add_source(source);
        self
    }

    /// Adds a source. A source with the same name replaces the earlier one.
    pub fn add_source(&mut self, source: Arc<dyn CollectionSource>) {
        self.sources.retain(|s| s.name() != source.name());
        debug!("Registered collection source '{}'", source.name());
        self.sources.push(source);
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn find_source(&self, uri: &str) -> Option<Arc<dyn CollectionSource>> {
        self.sources.iter().find(|s| s.supports(uri)).cloned()
    }

    /// Browses every source, or only `source_name` when given.
    ///
    /// Results are merged, de-duplicated by `author/name` keeping the entry with the
    /// most stars, then paginated with the filter's offset and limit.
    pub async fn browse(&self, filter: &BrowseFilter, source_name: Option<&str>) -> Result<BrowseOutcome> {
        let selected: Vec<Arc<dyn CollectionSource>> = match source_name {
            Some(name) => {
                let source = self
                    .sources
                    .iter()
                    .find(|s| s.name() == name)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(format!("source '{}'", name)))?;
                vec![source]
            }
            None => self.sources.clone(),
        };

        let unpaginated = filter.unpaginated();
        let timeout = self.config.source_timeout;
        let calls = selected.iter().map(|source| {
            let filter = &unpaginated;
            async move {
                let result = match tokio::time::timeout(timeout, source.browse(filter)).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout(format!(
                        "source '{}' did not answer within {:?}",
                        source.name(),
                        timeout
                    ))),
                };
                (source.name().to_string(), result)
            }
        });
        let results = futures::future::join_all(calls).await;

        let mut outcome = BrowseOutcome::default();
        let mut merged: Vec<CollectionMetadata> = Vec::new();
        let mut positions: HashMap<(String, String), usize> = HashMap::new();

        for (name, result) in results {
            match result {
                Ok(found) => {
                    debug!("Source '{}' returned {} collection(s)", name, found.len());
                    for metadata in found {
                        let key = (metadata.author.clone(), metadata.name.clone());
                        match positions.get(&key) {
                            Some(&index) => {
                                if metadata.stars > merged[index].stars {
                                    merged[index] = metadata;
                                }
                            }
                            None => {
                                positions.insert(key, merged.len());
                                merged.push(metadata);
                            }
                        }
                    }
                }
                Err(error) if source_name.is_some() => return Err(error),
                Err(error) => {
                    warn!("Source '{}' failed during browse: {}", name, error);
                    outcome.source_errors.push(SourceFailure {
                        source_name: name,
                        error,
                    });
                }
            }
        }

        outcome.collections = paginate(merged, filter.offset, filter.limit);
        Ok(outcome)
    }

    /// Fetches a collection through the source that handles its URI scheme.
    pub async fn get(&self, uri: &str) -> Result<FetchedCollection> {
        let source = self.find_source(uri).ok_or_else(|| {
            StoreError::UnsupportedScheme(uri_scheme(uri).unwrap_or(uri).to_string())
        })?;

        debug!("Fetching {} via source '{}'", uri, source.name());
        match tokio::time::timeout(self.config.source_timeout, source.fetch(uri)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(format!(
                "fetching {} took longer than {:?}",
                uri, self.config.source_timeout
            ))),
        }
    }

    /// Like [`Registry::get`], served from the TTL cache when possible.
    pub async fn get_cached(&self, uri: &str) -> Result<FetchedCollection> {
        if self.config.cache_enabled {
            if let Some(mut entry) = self.cache.get_mut(uri) {
                if entry.expires_at > Instant::now() {
                    entry.hits += 1;
                    debug!("Registry cache hit for {}", uri);
                    return Ok(entry.collection.clone());
                }
            }
        }

        let collection = self.get(uri).await?;
        if self.config.cache_enabled {
            self.cache.insert(
                uri.to_string(),
                CachedCollection {
                    collection: collection.clone(),
                    expires_at: Instant::now() + self.config.cache_ttl,
                    hits: 0,
                },
            );
        }
        Ok(collection)
    }

    pub fn invalidate(&self, uri: &str) {
        self.cache.remove(uri);
    }

    pub fn clear_cache(&self) {
        let count = self.cache.len();
        self.cache.clear();
        info!("Cleared {} cached collection(s)", count);
    }

    /// Searches the metadata index. Only what was indexed is visible; see
    /// [`Registry::rebuild_index`].
    pub async fn search(&self, filter: &BrowseFilter) -> Vec<CollectionMetadata> {
        self.index.read().await.search(filter)
    }

    pub async fn index_metadata(&self, metadata: CollectionMetadata) {
        self.index.write().await.index(metadata);
    }

    /// Replaces the index with a full browse of every source. Sources that fail are
    /// left out and logged, like in [`Registry::browse`].
    pub async fn rebuild_index(&self) -> Result<IndexStats> {
        let outcome = self.browse(&BrowseFilter::new(), None).await?;
        for failure in &outcome.source_errors {
            warn!(
                "Index rebuild skipped source '{}': {}",
                failure.source_name, failure.error
            );
        }

        let mut index = self.index.write().await;
        index.clear();
        for metadata in outcome.collections {
            index.index(metadata);
        }
        let stats = index.stats();
        info!("Indexed {} collection(s)", stats.total_collections);
        Ok(stats)
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            sources: self.sources.len(),
            cache: self.cache_stats(),
            index: self.index.read().await.stats(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut stats = CacheStats {
            ttl_secs: self.config.cache_ttl.as_secs(),
            enabled: self.config.cache_enabled,
            ..Default::default()
        };
        for entry in self.cache.iter() {
            stats.total_cached += 1;
            stats.total_hits += entry.hits;
            if entry.expires_at <= now {
                stats.expired += 1;
            }
        }
        stats
    }
}

/// Directed "depends on" graph between collection IDs.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str) {
        self.edges.entry(id.to_string()).or_default();
    }

    /// Records that `from` depends on `to`. Fails without changing the graph if the
    /// edge would close a cycle.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        if let Some(mut path) = self.path(to, from) {
            path.push(to.to_string());
            return Err(StoreError::CyclicDependency(path));
        }
        self.add_node(to);
        self.edges.entry(from.to_string()).or_default().insert(to.to_string());
        Ok(())
    }

    pub fn dependencies(&self, id: &str) -> Vec<String> {
        self.edges
            .get(id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Path of IDs from `from` to `to` following dependency edges, if one exists.
    fn path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut stack = vec![(from.to_string(), vec![from.to_string()])];
        let mut seen = BTreeSet::new();
        while let Some((node, path)) = stack.pop() {
            if node == to {
                return Some(path);
            }
            if !seen.insert(node.clone()) {
                continue;
            }
            for next in self.edges.get(&node).into_iter().flatten() {
                let mut extended = path.clone();
                extended.push(next.clone());
                stack.push((next.clone(), extended));
            }
        }
        None
    }

    /// Every node, dependencies before their dependents. Ties are broken by ID.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        fn visit(
            graph: &DependencyGraph,
            node: &str,
            visiting: &mut Vec<String>,
            done: &mut BTreeSet<String>,
            order: &mut Vec<String>,
        ) -> Result<()> {
            if done.contains(node) {
                return Ok(());
            }
            if let Some(start) = visiting.iter().position(|n| n == node) {
                let mut cycle = visiting[start..].to_vec();
                cycle.push(node.to_string());
                return Err(StoreError::CyclicDependency(cycle));
            }
            visiting.push(node.to_string());
            for dep in graph.edges.get(node).into_iter().flatten() {
                visit(graph, dep, visiting, done, order)?;
            }
            visiting.pop();
            done.insert(node.to_string());
            order.push(node.to_string());
            Ok(())
        }

        let mut order = Vec::with_capacity(self.edges.len());
        let mut done = BTreeSet::new();
        for node in self.edges.keys() {
            visit(self, node, &mut Vec::new(), &mut done, &mut order)?;
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::manifest::Manifest;
    use crate::sources::CollectionContent;

    struct StaticSource {
        name: &'static str,
        scheme: &'static str,
        items: Vec<CollectionMetadata>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl StaticSource {
        fn new(name: &'static str, scheme: &'static str, items: Vec<CollectionMetadata>) -> Self {
            Self {
                name,
                scheme,
                items,
                delay: None,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl CollectionSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        fn supports(&self, uri: &str) -> bool {
            uri.starts_with(self.scheme)
        }

        async fn browse(&self, _filter: &BrowseFilter) -> Result<Vec<CollectionMetadata>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(StoreError::unavailable(self.name, "down"));
            }
            Ok(self.items.clone())
        }

        async fn fetch(&self, uri: &str) -> Result<FetchedCollection> {
            let manifest = Manifest {
                name: "devops".to_string(),
                version: "1.0.0".to_string(),
                author: "alice".to_string(),
                ..Default::default()
            };
            Ok(FetchedCollection {
                metadata: CollectionMetadata::from_manifest(&manifest, self.name, uri),
                manifest,
                content: CollectionContent::persistent("/nonexistent"),
            })
        }
    }

    fn meta(author: &str, name: &str, stars: u64) -> CollectionMetadata {
        CollectionMetadata {
            author: author.to_string(),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            stars,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_browse_dedup_keeps_most_stars() {
        let registry = Registry::default()
            .with_source(Arc::new(StaticSource::new(
                "a",
                "a://",
                vec![meta("alice", "devops", 3), meta("bob", "writing", 1)],
            )))
            .with_source(Arc::new(StaticSource::new(
                "b",
                "b://",
                vec![meta("alice", "devops", 10)],
            )));

        let outcome = registry.browse(&BrowseFilter::new(), None).await.unwrap();
        assert_eq!(outcome.collections.len(), 2);
        assert_eq!(outcome.collections[0].stars, 10);
        assert!(!outcome.is_partial());
    }

    #[tokio::test]
    async fn test_browse_partial_results_on_failure_and_timeout() {
        let mut failing = StaticSource::new("down", "d://", Vec::new());
        failing.fail = true;
        let mut slow = StaticSource::new("slow", "s://", vec![meta("carol", "slow", 0)]);
        slow.delay = Some(Duration::from_secs(5));

        let registry = Registry::new(
            RegistryConfig::default().with_source_timeout(Duration::from_millis(100)),
        )
        .with_source(Arc::new(StaticSource::new("ok", "o://", vec![meta("alice", "devops", 0)])))
        .with_source(Arc::new(failing))
        .with_source(Arc::new(slow));

        let outcome = registry.browse(&BrowseFilter::new(), None).await.unwrap();
        assert_eq!(outcome.collections.len(), 1);
        assert_eq!(outcome.source_errors.len(), 2);
        assert!(outcome
            .source_errors
            .iter()
            .any(|f| f.source_name == "slow" && matches!(f.error, StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_browse_named_source() {
        let registry = Registry::default()
            .with_source(Arc::new(StaticSource::new("a", "a://", vec![meta("alice", "x", 0)])))
            .with_source(Arc::new(StaticSource::new("b", "b://", vec![meta("bob", "y", 0)])));

        let outcome = registry.browse(&BrowseFilter::new(), Some("b")).await.unwrap();
        assert_eq!(outcome.collections.len(), 1);
        assert_eq!(outcome.collections[0].author, "bob");

        assert!(matches!(
            registry.browse(&BrowseFilter::new(), Some("zzz")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_routes_by_scheme_and_caches() {
        let registry = Registry::default()
            .with_source(Arc::new(StaticSource::new("a", "a://", Vec::new())));

        assert!(matches!(
            registry.get("ftp://host/x").await,
            Err(StoreError::UnsupportedScheme(s)) if s == "ftp"
        ));

        registry.get_cached("a://x").await.unwrap();
        registry.get_cached("a://x").await.unwrap();
        let stats = registry.cache_stats();
        assert_eq!(stats.total_cached, 1);
        assert_eq!(stats.total_hits, 1);
        assert_eq!(stats.ttl_secs, 15 * 60);

        registry.invalidate("a://x");
        assert_eq!(registry.cache_stats().total_cached, 0);
    }

    #[tokio::test]
    async fn test_rebuild_index_and_ranked_search() {
        let mut helpers = meta("bob", "kubernetes-helpers", 0);
        helpers.uri = "b://bob/kubernetes-helpers".to_string();
        let mut runbooks = meta("alice", "runbooks", 0);
        runbooks.uri = "a://alice/runbooks".to_string();
        runbooks.description = "Incident runbooks for kubernetes".to_string();
        runbooks.tags = vec!["kubernetes".to_string(), "sre".to_string()];
        let mut failing = StaticSource::new("down", "d://", Vec::new());
        failing.fail = true;

        let registry = Registry::default()
            .with_source(Arc::new(StaticSource::new("a", "a://", vec![runbooks])))
            .with_source(Arc::new(StaticSource::new("b", "b://", vec![helpers])))
            .with_source(Arc::new(failing));
        assert!(registry.search(&BrowseFilter::new()).await.is_empty());

        let stats = registry.rebuild_index().await.unwrap();
        assert_eq!(stats.total_collections, 2);

        let ranked = registry
            .search(&BrowseFilter::new().with_query("kubernetes"))
            .await;
        let names: Vec<&str> = ranked.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["kubernetes-helpers", "runbooks"]);

        let tagged = registry
            .search(&BrowseFilter::new().with_tag("kubernetes").with_tag("sre"))
            .await;
        assert_eq!(tagged.len(), 1);
        assert!(registry
            .search(&BrowseFilter::new().with_tag("kubernetes").with_tag("ops"))
            .await
            .is_empty());

        registry.index_metadata(meta("carol", "kubernetes", 0)).await;
        let stats = registry.stats().await;
        assert_eq!(stats.sources, 3);
        assert_eq!(stats.index.total_collections, 3);
    }

    #[test]
    fn test_dependency_graph_order_and_cycles() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("c/app", "b/lib").unwrap();
        graph.add_edge("b/lib", "a/base").unwrap();
        graph.add_node("z/alone");

        let order = graph.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert!(pos("a/base") < pos("b/lib"));
        assert!(pos("b/lib") < pos("c/app"));
        assert_eq!(order.len(), 4);
        assert_eq!(graph.dependents("a/base"), vec!["b/lib".to_string()]);

        let err = graph.add_edge("a/base", "c/app").unwrap_err();
        match err {
            StoreError::CyclicDependency(path) => {
                assert_eq!(path.first().map(String::as_str), Some("c/app"));
                assert_eq!(path.last().map(String::as_str), Some("c/app"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
