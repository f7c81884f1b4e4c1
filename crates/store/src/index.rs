//! In-memory search index over collection metadata.
//!
//! Entries are keyed by URI, so indexing the same collection twice replaces it.
//! Category, author and tag filters are exact (case-insensitive) lookups; tags are
//! combined with AND. A free-text query keeps only entries with a positive relevance
//! score and orders them by that score, best first.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::sources::{paginate, BrowseFilter, CollectionMetadata};

const NAME_MATCH_SCORE: u32 = 10;
const TAG_MATCH_SCORE: u32 = 5;
const DESCRIPTION_MATCH_SCORE: u32 = 3;
/// Description words this short are not indexed as keywords.
const MIN_DESCRIPTION_WORD: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_collections: usize,
    pub authors: usize,
    pub categories: usize,
    pub tags: usize,
    pub keywords: usize,
}

type Postings = HashMap<String, BTreeSet<usize>>;

#[derive(Debug, Default)]
pub struct MetadataIndex {
    entries: Vec<Option<CollectionMetadata>>,
    positions: HashMap<String, usize>,
    by_author: Postings,
    by_category: Postings,
    by_tag: Postings,
    by_keyword: Postings,
}

fn entry_key(metadata: &CollectionMetadata) -> String {
    if metadata.uri.is_empty() {
        format!("{}/{}", metadata.author, metadata.name)
    } else {
        metadata.uri.clone()
    }
}

fn keywords(metadata: &CollectionMetadata) -> BTreeSet<String> {
    let mut words: BTreeSet<String> = metadata
        .name
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    words.extend(
        metadata
            .description
            .to_lowercase()
            .split_whitespace()
            .filter(|word| word.chars().count() >= MIN_DESCRIPTION_WORD)
            .map(str::to_string),
    );
    words.extend(metadata.keywords.iter().map(|k| k.to_lowercase()));
    words
}

fn post(postings: &mut Postings, key: String, position: usize) {
    postings.entry(key).or_default().insert(position);
}

fn unpost(postings: &mut Postings, key: &str, position: usize) {
    if let Some(set) = postings.get_mut(key) {
        set.remove(&position);
        if set.is_empty() {
            postings.remove(key);
        }
    }
}

/// Relevance of one entry for the lowercased query words. Zero means no match.
pub fn relevance(metadata: &CollectionMetadata, words: &[String]) -> u32 {
    let name = metadata.name.to_lowercase();
    let description = metadata.description.to_lowercase();
    words
        .iter()
        .map(|word| {
            let mut score = 0;
            if name.contains(word.as_str()) {
                score += NAME_MATCH_SCORE;
            }
            if description.contains(word.as_str()) {
                score += DESCRIPTION_MATCH_SCORE;
            }
            let tagged = metadata
                .tags
                .iter()
                .chain(metadata.keywords.iter())
                .filter(|tag| tag.to_lowercase() == *word)
                .count() as u32;
            score + tagged * TAG_MATCH_SCORE
        })
        .sum()
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn index(&mut self, metadata: CollectionMetadata) {
        let key = entry_key(&metadata);
        let position = match self.positions.get(&key) {
            Some(&position) => {
                self.unindex(position);
                position
            }
            None => {
                self.entries.push(None);
                self.entries.len() - 1
            }
        };

        post(&mut self.by_author, metadata.author.to_lowercase(), position);
        if let Some(category) = metadata.category.as_deref().filter(|c| !c.is_empty()) {
            post(&mut self.by_category, category.to_lowercase(), position);
        }
        for tag in &metadata.tags {
            post(&mut self.by_tag, tag.to_lowercase(), position);
        }
        for word in keywords(&metadata) {
            post(&mut self.by_keyword, word, position);
        }

        self.positions.insert(key, position);
        self.entries[position] = Some(metadata);
    }

    fn unindex(&mut self, position: usize) {
        let Some(old) = self.entries.get_mut(position).and_then(Option::take) else {
            return;
        };
        unpost(&mut self.by_author, &old.author.to_lowercase(), position);
        if let Some(category) = old.category.as_deref() {
            unpost(&mut self.by_category, &category.to_lowercase(), position);
        }
        for tag in &old.tags {
            unpost(&mut self.by_tag, &tag.to_lowercase(), position);
        }
        for word in keywords(&old) {
            unpost(&mut self.by_keyword, &word, position);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Entries matching `filter`, in indexing order or by relevance when the filter
    /// carries a query, then paginated.
    pub fn search(&self, filter: &BrowseFilter) -> Vec<CollectionMetadata> {
        let mut candidates: BTreeSet<usize> = self.positions.values().copied().collect();

        let lookups = filter
            .category
            .iter()
            .map(|category| (&self.by_category, category))
            .chain(filter.author.iter().map(|author| (&self.by_author, author)))
            .chain(filter.tags.iter().map(|tag| (&self.by_tag, tag)));
        for (postings, value) in lookups {
            match postings.get(&value.to_lowercase()) {
                Some(set) => candidates = candidates.intersection(set).copied().collect(),
                None => return Vec::new(),
            }
        }

        let words: Vec<String> = filter
            .query
            .as_deref()
            .unwrap_or_default()
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let matches: Vec<&CollectionMetadata> = if words.is_empty() {
            candidates
                .iter()
                .filter_map(|&position| self.entries[position].as_ref())
                .collect()
        } else {
            let mut scored: Vec<(u32, &CollectionMetadata)> = candidates
                .iter()
                .filter_map(|&position| self.entries[position].as_ref())
                .map(|metadata| (relevance(metadata, &words), metadata))
                .filter(|(score, _)| *score > 0)
                .collect();
            // Stable, so equal scores keep indexing order.
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            scored.into_iter().map(|(_, metadata)| metadata).collect()
        };

        paginate(
            matches.into_iter().cloned().collect(),
            filter.offset,
            filter.limit,
        )
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_collections: self.len(),
            authors: self.by_author.len(),
            categories: self.by_category.len(),
            tags: self.by_tag.len(),
            keywords: self.by_keyword.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(author: &str, name: &str, description: &str, tags: &[&str]) -> CollectionMetadata {
        CollectionMetadata {
            name: name.to_string(),
            author: author.to_string(),
            version: "1.0.0".to_string(),
            description: description.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            category: Some("devops".to_string()),
            uri: format!("file:///collections/{}/{}", author, name),
            ..Default::default()
        }
    }

    fn sample() -> MetadataIndex {
        let mut index = MetadataIndex::new();
        index.index(metadata(
            "alice",
            "runbooks",
            "Incident response templates for kubernetes",
            &["kubernetes", "sre"],
        ));
        index.index(metadata(
            "bob",
            "kubernetes-helpers",
            "Cluster maintenance agents",
            &["ops"],
        ));
        index.index(metadata("carol", "writing", "Style guides for docs", &["docs"]));
        index
    }

    #[test]
    fn test_query_orders_by_relevance() {
        let index = sample();
        let results = index.search(&BrowseFilter::new().with_query("kubernetes"));
        let names: Vec<&str> = results.iter().map(|m| m.name.as_str()).collect();
        // name match (10) beats tag (5) plus description (3)
        assert_eq!(names, vec!["kubernetes-helpers", "runbooks"]);

        let results = index.search(&BrowseFilter::new().with_query("kubernetes incident"));
        let names: Vec<&str> = results.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["runbooks", "kubernetes-helpers"]);

        assert!(index
            .search(&BrowseFilter::new().with_query("nothing-matches"))
            .is_empty());
    }

    #[test]
    fn test_tags_are_combined_with_and() {
        let index = sample();
        let both = index.search(&BrowseFilter::new().with_tag("kubernetes").with_tag("SRE"));
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].name, "runbooks");

        let disjoint = index.search(&BrowseFilter::new().with_tag("kubernetes").with_tag("docs"));
        assert!(disjoint.is_empty());
        assert!(index.search(&BrowseFilter::new().with_tag("unknown")).is_empty());
    }

    #[test]
    fn test_author_and_category_filters() {
        let index = sample();
        assert_eq!(index.search(&BrowseFilter::new().with_category("DevOps")).len(), 3);
        let bob = index.search(&BrowseFilter::new().with_author("bob"));
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].author, "bob");
        assert!(index.search(&BrowseFilter::new().with_category("music")).is_empty());

        let page = index.search(&BrowseFilter::new().with_limit(1).with_offset(1));
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "kubernetes-helpers");
    }

    #[test]
    fn test_reindex_replaces_entry_and_stats() {
        let mut index = sample();
        assert_eq!(
            index.stats(),
            IndexStats {
                total_collections: 3,
                authors: 3,
                categories: 1,
                tags: 4,
                keywords: 13,
            }
        );

        index.index(metadata("carol", "writing", "Style guides", &["prose"]));
        assert_eq!(index.len(), 3);
        assert!(index.search(&BrowseFilter::new().with_tag("docs")).is_empty());
        assert_eq!(index.search(&BrowseFilter::new().with_tag("prose")).len(), 1);

        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.stats(), IndexStats::default());
    }
}
