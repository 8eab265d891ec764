//! Build-once lifecycle for BM25 corpus statistics.
//!
//! The statistics are computed from a snapshot of the store's contents the
//! first time a caller needs them. Racing first callers are serialized on an
//! async mutex so exactly one fetch-and-build runs; later callers take the
//! lock-free fast path. There is no automatic refresh when the store changes.
//!
//! The vocabulary is saved in the store and restored before every build, so
//! a term keeps the index it had when stored sparse vectors were encoded.

use crate::encoder::{Bm25Params, CorpusInfo, SparseEncoder};
use crate::error::CorpusError;
use crate::store::VectorStore;
use crate::tokenizer::tokenize;
use crate::types::{SparseVector, TermId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub struct CorpusIndex {
    encoder: RwLock<SparseEncoder>,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
    builds: AtomicUsize,
}

impl CorpusIndex {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            encoder: RwLock::new(SparseEncoder::new(params)),
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.encoder.read().is_ready()
    }

    /// Number of statistics builds performed so far.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Acquire)
    }

    /// Builds statistics from the store snapshot unless that already happened.
    ///
    /// Returns whether the statistics are ready. An empty snapshot leaves the
    /// index uninitialized so a later call retries; fetch and build errors do
    /// the same and are returned to the caller.
    pub async fn ensure_initialized(&self, store: &dyn VectorStore) -> Result<bool, CorpusError> {
        if self.is_initialized() {
            return Ok(true);
        }

        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            tracing::debug!("BM25 corpus already initialized, skipping");
            return Ok(true);
        }

        tracing::info!("initializing BM25 corpus from store documents");
        let documents = store.scroll_contents().await?;
        if documents.is_empty() {
            tracing::warn!("no documents found in store for BM25 corpus initialization");
            return Ok(false);
        }

        self.build(store, &documents).await
    }

    /// Rebuilds statistics over the store snapshot plus `additional`
    /// documents that are about to be upserted.
    ///
    /// Runs under the same gate as [`ensure_initialized`](Self::ensure_initialized),
    /// so a concurrent first initialization cannot overwrite it.
    pub async fn rebuild(&self, store: &dyn VectorStore, additional: &[String]) -> Result<bool, CorpusError> {
        let _guard = self.init_lock.lock().await;
        let mut documents = store.scroll_contents().await?;
        documents.extend_from_slice(additional);
        self.build(store, &documents).await
    }

    /// Restores the saved vocabulary, builds statistics and saves the
    /// vocabulary back when it grew. Callers hold `init_lock`. The live
    /// encoder is replaced only after everything succeeded.
    async fn build(&self, store: &dyn VectorStore, documents: &[String]) -> Result<bool, CorpusError> {
        let saved = store.load_vocabulary().await?;
        let mut next = self.encoder.read().clone();
        let misplaced = next.extend_vocabulary(saved.as_slice())?;
        if misplaced > 0 {
            tracing::warn!(misplaced, "in-memory vocabulary diverges from the saved one");
        }
        next.build_statistics(documents.iter())?;

        if next.vocabulary().len() > saved.len() {
            let terms: Vec<String> = next.vocabulary().terms().map(str::to_string).collect();
            store.save_vocabulary(&terms).await?;
        }

        let ready = next.is_ready();
        *self.encoder.write() = next;
        self.initialized.store(ready, Ordering::Release);
        let builds = self.builds.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(builds, ready, "BM25 corpus rebuilt");
        Ok(ready)
    }

    /// Sparse vector for a query, normalized by the query's own length.
    pub fn encode_query(&self, text: &str) -> SparseVector {
        self.encoder.read().encode(text, None)
    }

    /// Sparse vector for a document with an explicit normalization length.
    pub fn encode_with_length(&self, text: &str, doc_length: usize) -> SparseVector {
        self.encoder.read().encode(text, Some(doc_length))
    }

    pub fn info(&self) -> CorpusInfo {
        self.encoder.read().info()
    }

    /// Tokens of `text` as the encoder sees them.
    pub fn tokens(&self, text: &str) -> Vec<String> {
        tokenize(text).collect()
    }

    /// Term behind a sparse-vector index.
    pub fn term(&self, id: TermId) -> Option<String> {
        self.encoder.read().vocabulary().term(id).map(str::to_string)
    }

    /// The first `n` vocabulary terms, in index order.
    pub fn vocabulary_sample(&self, n: usize) -> Vec<String> {
        self.encoder.read().vocabulary().terms().take(n).map(str::to_string).collect()
    }
}

impl Default for CorpusIndex {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}
