//! Hybrid search orchestration.
//!
//! A query is always embedded densely. When corpus statistics are ready and
//! the query has in-vocabulary terms, one fused RRF query runs over the
//! sparse and dense fields; otherwise, or when the fused query fails, a
//! dense-only query runs. Every failure is turned into a tagged
//! [`SearchOutcome`] rather than an error.

use crate::corpus::CorpusIndex;
use crate::embedding::DenseEncoder;
use crate::error::StoreError;
use crate::store::{FusedQuery, Fusion, NearestQuery, VectorStore};
use crate::types::{DenseVector, SearchFilters, SearchOutcome, SearchResult, SearchType, SparseVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on results per request.
pub const MAX_LIMIT: usize = 100;
/// Candidates fetched per prefetch leg, as a multiple of the final limit.
pub const PREFETCH_MULTIPLIER: usize = 2;

const DEFAULT_LIMIT: usize = 5;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub score_threshold: f32,
    #[serde(default)]
    pub filters: SearchFilters,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_LIMIT,
            score_threshold: 0.0,
            filters: SearchFilters::default(),
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }
}

pub struct HybridSearcher {
    embedder: Arc<dyn DenseEncoder>,
    store: Arc<dyn VectorStore>,
    corpus: Arc<CorpusIndex>,
    timeout: Duration,
}

impl HybridSearcher {
    pub fn new(embedder: Arc<dyn DenseEncoder>, store: Arc<dyn VectorStore>, corpus: Arc<CorpusIndex>) -> Self {
        Self { embedder, store, corpus, timeout: DEFAULT_TIMEOUT }
    }

    /// Bound applied to each embedding, snapshot and store call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn corpus(&self) -> &Arc<CorpusIndex> {
        &self.corpus
    }

    /// Search with loosely typed filters (`subject`, `title`, `week`).
    pub async fn search_with(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f32,
        filters: HashMap<String, String>,
    ) -> SearchOutcome {
        let request = SearchRequest::new(query)
            .limit(limit)
            .score_threshold(score_threshold)
            .filters(SearchFilters::from(filters));
        self.search(&request).await
    }

    pub async fn search(&self, request: &SearchRequest) -> SearchOutcome {
        let limit = request.limit.clamp(1, MAX_LIMIT);

        let dense = match tokio::time::timeout(self.timeout, self.embedder.embed(&request.query)).await {
            Ok(Ok(vector)) => vector,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "failed to get dense embedding");
                return SearchOutcome::error();
            }
            Err(_) => {
                tracing::error!(timeout_secs = self.timeout.as_secs(), "dense embedding timed out");
                return SearchOutcome::error();
            }
        };

        let sparse = self.query_sparse_vector(&request.query).await;

        let (mut results, search_type) = if sparse.is_empty() {
            match self.dense_only(dense, &request.filters, limit).await {
                Ok(results) => (results, SearchType::DenseOnly),
                Err(err) => {
                    tracing::error!(error = %err, "dense search failed");
                    return SearchOutcome::error();
                }
            }
        } else {
            tracing::info!(sparse_terms = sparse.len(), "performing hybrid search");
            match self.hybrid(dense.clone(), sparse, &request.filters, limit).await {
                Ok(results) => (results, SearchType::Hybrid),
                Err(err) => {
                    tracing::warn!(error = %err, "hybrid search failed, falling back to dense search");
                    match self.dense_only(dense, &request.filters, limit).await {
                        Ok(results) => (results, SearchType::DenseOnly),
                        Err(err) => {
                            tracing::error!(error = %err, "dense search failed");
                            return SearchOutcome::error();
                        }
                    }
                }
            }
        };

        results.truncate(limit);
        results.retain(|r| r.score >= request.score_threshold);
        tracing::debug!(search_type = %search_type, results = results.len(), "search completed");
        SearchOutcome { results, search_type }
    }

    /// Sparse query vector, empty when the corpus is unavailable or the
    /// query has no in-vocabulary terms.
    async fn query_sparse_vector(&self, query: &str) -> SparseVector {
        let init = self.corpus.ensure_initialized(self.store.as_ref());
        let ready = match tokio::time::timeout(self.timeout, init).await {
            Ok(Ok(ready)) => ready,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "failed to initialize BM25 corpus");
                false
            }
            Err(_) => {
                tracing::error!(timeout_secs = self.timeout.as_secs(), "BM25 corpus initialization timed out");
                false
            }
        };
        if !ready {
            tracing::warn!("BM25 not ready, falling back to dense search");
            return SparseVector::new();
        }

        let sparse = self.corpus.encode_query(query);
        if sparse.is_empty() {
            tracing::warn!("sparse vector is empty, falling back to dense search");
        }
        sparse
    }

    async fn hybrid(
        &self,
        dense: DenseVector,
        sparse: SparseVector,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let candidates = limit * PREFETCH_MULTIPLIER;
        let query = FusedQuery {
            prefetch: vec![
                NearestQuery::sparse(sparse, filters.clone(), candidates),
                NearestQuery::dense(dense, filters.clone(), candidates),
            ],
            fusion: Fusion::Rrf,
            limit,
        };
        self.bounded(self.store.fused(&query)).await
    }

    async fn dense_only(
        &self,
        dense: DenseVector,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let query = NearestQuery::dense(dense, filters.clone(), limit);
        self.bounded(self.store.nearest(&query)).await
    }

    async fn bounded<F>(&self, call: F) -> Result<Vec<SearchResult>, StoreError>
    where
        F: Future<Output = Result<Vec<SearchResult>, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout.as_secs())),
        }
    }
}
