use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use pagerag_core::config::SearchSettings;
use pagerag_core::traits::{Embedder, VectorStore};
use pagerag_core::types::{Outcome, QueryResult, SearchParams, SearchResult};

/// Lowest oversampling factor a query is issued with when rescoring.
pub const MIN_OVERSAMPLING: f32 = 2.0;

/// Text query to ranked pages.
#[derive(Clone)]
pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    collection: String,
    search: SearchSettings,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        search: SearchSettings,
    ) -> Self {
        Self { embedder, store, collection: collection.into(), search }
    }

    pub fn default_limit(&self) -> usize { self.search.default_limit }

    pub fn params(&self, limit: usize) -> SearchParams {
        SearchParams {
            limit,
            timeout: self.search.timeout(),
            rescore: self.search.rescore,
            oversampling: self.search.oversampling.max(MIN_OVERSAMPLING),
        }
    }

    /// Ranked pages for `text`, best first, in the order the store returned them.
    pub async fn query(&self, text: &str, limit: Option<usize>) -> Outcome<QueryResult> {
        let limit = limit.unwrap_or(self.search.default_limit);
        let start = Instant::now();
        match self.search_pages(text, limit).await {
            Ok(results) => {
                let search_time = start.elapsed().as_secs_f64();
                debug!(collection = %self.collection, hits = results.len(), elapsed_ms = (search_time * 1000.0) as u64, "query done");
                Outcome::Success(QueryResult {
                    query: text.to_string(),
                    total_results: results.len(),
                    results,
                    search_time,
                })
            }
            Err(e) => {
                warn!(collection = %self.collection, error = %e, "query failed");
                Outcome::fail(format!("Search failed: {e}"))
            }
        }
    }

    async fn search_pages(&self, text: &str, limit: usize) -> Result<Vec<SearchResult>> {
        // the model forward pass is CPU/GPU bound; keep it off the executor
        let embedder = self.embedder.clone();
        let queries = vec![text.to_string()];
        let query = tokio::task::spawn_blocking(move || embedder.embed_queries(&queries))
            .await
            .map_err(|e| anyhow!("query embedding task failed: {e}"))??
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedder returned no query embedding"))?;
        let hits = self.store.search(&self.collection, &query, &self.params(limit)).await?;
        let mut results: Vec<SearchResult> = hits.into_iter().map(SearchResult::from).collect();
        results.truncate(limit);
        Ok(results)
    }
}
