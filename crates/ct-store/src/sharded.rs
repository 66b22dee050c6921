//! # Sharded Index
//!
//! Keeps shard topology invisible to callers. Writes route every document to
//! the one bucket index its timestamp falls into; searches scatter to every
//! bucket a time window intersects, gather the hits, merge them with the
//! requested comparator and only then paginate.

use crate::index::{BulkResult, SearchIndex, SearchRequest};
use crate::naming::IndexNaming;
use ct_core::query::compare_documents;
use ct_core::{
    Document, IndexClause, QueryStoreError, Result, ResultSort, TableFieldMapping, TimeWindow,
};
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// A paginated search over one table.
#[derive(Debug, Clone)]
pub struct TableSearch {
    pub clause: IndexClause,
    pub window: TimeWindow,
    pub sort: Option<ResultSort>,
    pub from: usize,
    pub limit: usize,
}

pub struct ShardedIndex {
    index: Arc<dyn SearchIndex>,
    naming: IndexNaming,
    max_limit: usize,
}

impl ShardedIndex {
    pub fn new(index: Arc<dyn SearchIndex>, naming: IndexNaming, max_limit: usize) -> Self {
        Self {
            index,
            naming,
            max_limit,
        }
    }

    /// Route documents to their bucket indices and bulk-write each bucket
    /// concurrently. A bucket whose write fails outright marks all of its
    /// documents failed; the others are unaffected.
    pub async fn write(&self, table: &str, documents: &[Document]) -> BulkResult {
        let mut result = BulkResult::default();
        let mut buckets: BTreeMap<String, Vec<Document>> = BTreeMap::new();
        for document in documents {
            match self.naming.index_for(table, document.timestamp) {
                Ok(name) => buckets.entry(name).or_default().push(document.clone()),
                Err(e) => result.failed.push((document.id.clone(), e.to_string())),
            }
        }

        let writes = buckets.iter().map(|(name, docs)| async move {
            let outcome = self.index.bulk_index(name, docs).await;
            (name, docs, outcome)
        });
        for (name, docs, outcome) in join_all(writes).await {
            match outcome {
                Ok(bulk) => {
                    if !bulk.failed.is_empty() {
                        warn!("{} of {} documents rejected by {}", bulk.failed.len(), docs.len(), name);
                    }
                    result.merge(bulk);
                }
                Err(e) => {
                    warn!("Bulk write to {} failed: {}", name, e);
                    let reason = e.to_string();
                    result
                        .failed
                        .extend(docs.iter().map(|d| (d.id.clone(), reason.clone())));
                }
            }
        }
        result
    }

    /// Remove the copies `previous` left behind in buckets that `incoming`
    /// moved away from. Called after a re-save so every id lives in exactly
    /// one bucket. `indexed` lists the evicted ids; `failed` those whose stale
    /// copy could not be removed.
    pub async fn evict_moved(
        &self,
        table: &str,
        previous: &[Document],
        incoming: &[Document],
    ) -> BulkResult {
        let mut result = BulkResult::default();
        let targets: HashMap<&str, i64> = incoming
            .iter()
            .map(|d| (d.id.as_str(), d.timestamp))
            .collect();
        let mut stale: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for old in previous {
            let Some(&timestamp) = targets.get(old.id.as_str()) else {
                continue;
            };
            match (
                self.naming.index_for(table, old.timestamp),
                self.naming.index_for(table, timestamp),
            ) {
                (Ok(from), Ok(to)) if from != to => stale.entry(from).or_default().push(old.id.clone()),
                (Ok(_), Ok(_)) => {}
                (Err(e), _) | (_, Err(e)) => result.failed.push((old.id.clone(), e.to_string())),
            }
        }

        let deletes = stale.iter().map(|(name, ids)| async move {
            (name, ids, self.index.delete(name, ids).await)
        });
        for (name, ids, outcome) in join_all(deletes).await {
            match outcome {
                Ok(_) => {
                    debug!("Evicted {} moved document(s) from {}", ids.len(), name);
                    result.indexed.extend(ids.iter().cloned());
                }
                Err(e) => {
                    warn!("Evicting moved documents from {} failed: {}", name, e);
                    let reason = e.to_string();
                    result
                        .failed
                        .extend(ids.iter().map(|id| (id.clone(), reason.clone())));
                }
            }
        }
        result
    }

    /// Existing bucket indices of `table` that intersect `window`, oldest first.
    pub async fn shards(&self, table: &str, window: TimeWindow) -> Result<Vec<String>> {
        let mut shards: Vec<(i64, String)> = self
            .index
            .list_indices()
            .await?
            .into_iter()
            .filter_map(|name| {
                let (start, end) = self.naming.bucket_of(table, &name)?;
                window.overlaps(start, end).then_some((start, name))
            })
            .collect();
        shards.sort();
        Ok(shards.into_iter().map(|(_, name)| name).collect())
    }

    /// Scatter-gather search with global sort and pagination.
    pub async fn search(&self, table: &str, search: &TableSearch) -> Result<Vec<Document>> {
        let limit = search.limit.min(self.max_limit);
        if limit == 0 || search.window.is_empty() {
            return Ok(Vec::new());
        }
        let request = SearchRequest {
            clause: search.clause.clone(),
            sort: search.sort.clone(),
            size: search.from.saturating_add(limit),
        };
        let merged = self.gather(table, search.window, &request).await?;
        Ok(merged.into_iter().skip(search.from).take(limit).collect())
    }

    /// Every matching document across the window, in natural order.
    pub async fn scan(&self, table: &str, clause: &IndexClause, window: TimeWindow) -> Result<Vec<Document>> {
        if window.is_empty() {
            return Ok(Vec::new());
        }
        self.gather(table, window, &SearchRequest::new(clause.clone()))
            .await
    }

    async fn gather(
        &self,
        table: &str,
        window: TimeWindow,
        request: &SearchRequest,
    ) -> Result<Vec<Document>> {
        let shards = self.shards(table, window).await.map_err(|e| get_error(table, e))?;
        debug!("Searching {} shard(s) of {}", shards.len(), table);

        let results = join_all(shards.iter().map(|shard| self.index.search(shard, request))).await;
        let mut latest: HashMap<String, Document> = HashMap::new();
        for hits in results {
            for hit in hits.map_err(|e| get_error(table, e))? {
                if let Some(kept) = latest.get(&hit.id) {
                    warn!("Document {} found in more than one shard of {}", hit.id, table);
                    if kept.timestamp >= hit.timestamp {
                        continue;
                    }
                }
                latest.insert(hit.id.clone(), hit);
            }
        }
        let mut merged: Vec<Document> = latest.into_values().collect();
        merged.sort_by(|a, b| compare_documents(request.sort.as_ref(), a, b));
        Ok(merged)
    }

    /// Union of the field mappings of every shard of `table`. The oldest
    /// shard's type wins when shards disagree.
    pub async fn field_mappings(&self, table: &str) -> Result<TableFieldMapping> {
        let mut mapping = TableFieldMapping::new(table);
        for shard in self.shards(table, TimeWindow::unbounded()).await? {
            mapping.extend(self.index.field_mappings(&shard).await?);
        }
        Ok(mapping)
    }
}

fn get_error(table: &str, error: QueryStoreError) -> QueryStoreError {
    match error {
        e @ QueryStoreError::InvalidRequest(_) => e,
        e => QueryStoreError::DocumentGetError {
            table: table.to_string(),
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIndex;
    use crate::naming::ShardPeriod;
    use ct_core::SortOrder;
    use serde_json::json;

    const DAY: i64 = 86_400_000;
    const T0: i64 = 1_397_606_400_000; // 2014-04-16T00:00:00Z

    fn sharded() -> (Arc<MemoryIndex>, ShardedIndex) {
        let memory = Arc::new(MemoryIndex::new());
        let index = ShardedIndex::new(
            memory.clone(),
            IndexNaming::new("cantata", ShardPeriod::Daily),
            10_000,
        );
        (memory, index)
    }

    /// Ten documents spread over three days.
    fn spread() -> Vec<Document> {
        (0..10)
            .map(|i| {
                Document::new(
                    format!("d{:02}", i),
                    T0 + (i % 3) * DAY + i * 1_000,
                    json!({"n": i}),
                )
            })
            .collect()
    }

    fn all(sort: Option<ResultSort>) -> TableSearch {
        TableSearch {
            clause: IndexClause::MatchAll,
            window: TimeWindow::unbounded(),
            sort,
            from: 0,
            limit: 10_000,
        }
    }

    #[tokio::test]
    async fn test_write_routes_each_document_to_one_bucket() {
        let (memory, index) = sharded();
        let result = index.write("events", &spread()).await;
        assert_eq!(result.indexed.len(), 10);

        let shards = index.shards("events", TimeWindow::unbounded()).await.unwrap();
        assert_eq!(
            shards,
            vec![
                "cantata-events-2014.04.16",
                "cantata-events-2014.04.17",
                "cantata-events-2014.04.18"
            ]
        );
        assert_eq!(memory.document_count("cantata-events-2014.04.16").await, 4);
    }

    #[tokio::test]
    async fn test_window_selects_intersecting_shards() {
        let (_, index) = sharded();
        index.write("events", &spread()).await;
        let window = TimeWindow::between(T0 + DAY, T0 + DAY + 1);
        let shards = index.shards("events", window).await.unwrap();
        assert_eq!(shards, vec!["cantata-events-2014.04.17"]);
        assert!(index.shards("other", TimeWindow::unbounded()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pagination_is_global_across_shards() {
        let (_, index) = sharded();
        index.write("events", &spread()).await;
        let sort = Some(ResultSort::new("n", SortOrder::Desc));
        let full = index.search("events", &all(sort.clone())).await.unwrap();
        assert_eq!(full.len(), 10);
        assert_eq!(full[0].id, "d09");

        for from in 0..11 {
            for limit in 1..5 {
                let page = TableSearch {
                    from,
                    limit,
                    ..all(sort.clone())
                };
                let got = index.search("events", &page).await.unwrap();
                let expected: Vec<Document> = full.iter().skip(from).take(limit).cloned().collect();
                assert_eq!(got, expected, "from={} limit={}", from, limit);
            }
        }
    }

    #[tokio::test]
    async fn test_unsorted_results_follow_id_order() {
        let (_, index) = sharded();
        index.write("events", &spread()).await;
        let ids: Vec<String> = index
            .search("events", &all(None))
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_limit_is_capped() {
        let memory = Arc::new(MemoryIndex::new());
        let index = ShardedIndex::new(memory, IndexNaming::new("cantata", ShardPeriod::Daily), 3);
        index.write("events", &spread()).await;
        assert_eq!(index.search("events", &all(None)).await.unwrap().len(), 3);
        assert_eq!(index.scan("events", &IndexClause::MatchAll, TimeWindow::unbounded()).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_field_mappings_merge_shards() {
        let (_, index) = sharded();
        let docs = vec![
            Document::new("a", T0, json!({"word": "1234", "head": {"hello": 23}})),
            Document::new("b", T0 + DAY, json!({"header": {"hello": "world"}, "word": 5})),
        ];
        index.write("events", &docs).await;
        let mapping = index.field_mappings("events").await.unwrap();
        assert_eq!(mapping.mappings.len(), 3);
        assert_eq!(mapping.field_type("word"), Some(ct_core::FieldType::String));
        assert!(index.field_mappings("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_moved_document_is_evicted_from_old_bucket() {
        let (memory, index) = sharded();
        let before = Document::new("A", T0, json!({"os": "android"}));
        let after = Document::new("A", T0 + DAY, json!({"os": "ios"}));
        index.write("events", &[before.clone()]).await;
        index.write("events", &[after.clone()]).await;

        let evicted = index.evict_moved("events", &[before], &[after.clone()]).await;
        assert_eq!(evicted.indexed, vec!["A".to_string()]);
        assert!(evicted.is_complete());
        assert_eq!(memory.document_count("cantata-events-2014.04.16").await, 0);
        assert_eq!(index.search("events", &all(None)).await.unwrap(), vec![after]);
    }

    #[tokio::test]
    async fn test_same_bucket_resave_evicts_nothing() {
        let (memory, index) = sharded();
        let before = Document::new("A", T0, json!({"n": 1}));
        let after = Document::new("A", T0 + 1_000, json!({"n": 2}));
        index.write("events", &[before.clone()]).await;
        index.write("events", &[after.clone()]).await;
        let evicted = index.evict_moved("events", &[before], &[after]).await;
        assert!(evicted.indexed.is_empty());
        assert_eq!(memory.document_count("cantata-events-2014.04.16").await, 1);
    }

    #[tokio::test]
    async fn test_gather_keeps_one_copy_per_id() {
        let (memory, index) = sharded();
        // Bypass routing to leave a stale copy in an older bucket.
        let stale = Document::new("A", T0, json!({"os": "android"}));
        let fresh = Document::new("A", T0 + DAY, json!({"os": "ios"}));
        memory.bulk_index("cantata-events-2014.04.16", &[stale]).await.unwrap();
        memory.bulk_index("cantata-events-2014.04.17", &[fresh.clone()]).await.unwrap();
        index.write("events", &[Document::new("B", T0, json!({"os": "ios"}))]).await;

        let hits = index.search("events", &all(None)).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(hits[0], fresh);
    }
}
