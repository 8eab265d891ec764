use async_trait::async_trait;
use retrieval_core::store::{FusedQuery, MemoryStore, NearestQuery, VectorStore};
use retrieval_core::tokenizer::tokenize;
use retrieval_core::{
    CorpusIndex, DenseEncoder, DenseVector, DocumentPayload, EmbeddingError, HybridSearcher, Point, PointId,
    SearchFilters, SearchRequest, SearchResult, SearchType, StoreError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DOCS: &[(u64, &str, &str)] = &[
    (1, "the cat sat", "math"),
    (2, "the dog ran", "history"),
    (3, "a cat and a dog played", "math"),
    (4, "quantum physics lecture", "physics"),
];

/// Keyword-count embedding with a constant bias so no vector has zero norm.
struct KeywordEmbedder;

#[async_trait]
impl DenseEncoder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<DenseVector, EmbeddingError> {
        let mut v = vec![0.0, 0.0, 0.0, 0.0, 1.0];
        for token in tokenize(text) {
            match token.as_str() {
                "cat" => v[0] += 1.0,
                "dog" => v[1] += 1.0,
                "ran" => v[2] += 1.0,
                "quantum" => v[3] += 1.0,
                _ => {}
            }
        }
        Ok(v)
    }
}

struct FailingEmbedder;

#[async_trait]
impl DenseEncoder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<DenseVector, EmbeddingError> {
        Err(EmbeddingError::Status(503))
    }
}

struct SlowEmbedder(Duration);

#[async_trait]
impl DenseEncoder for SlowEmbedder {
    async fn embed(&self, text: &str) -> Result<DenseVector, EmbeddingError> {
        tokio::time::sleep(self.0).await;
        KeywordEmbedder.embed(text).await
    }
}

#[derive(Default)]
struct Faults {
    fused: bool,
    nearest: bool,
    scroll: bool,
    scroll_delay: Option<Duration>,
}

/// Memory store that counts calls and injects failures.
struct InstrumentedStore {
    inner: MemoryStore,
    faults: Faults,
    scroll_calls: AtomicUsize,
    fused_calls: AtomicUsize,
    nearest_calls: AtomicUsize,
}

impl InstrumentedStore {
    fn new(faults: Faults) -> Self {
        Self {
            inner: MemoryStore::new(),
            faults,
            scroll_calls: AtomicUsize::new(0),
            fused_calls: AtomicUsize::new(0),
            nearest_calls: AtomicUsize::new(0),
        }
    }

    fn scrolls(&self) -> usize {
        self.scroll_calls.load(Ordering::SeqCst)
    }

    fn fuses(&self) -> usize {
        self.fused_calls.load(Ordering::SeqCst)
    }

    fn nearests(&self) -> usize {
        self.nearest_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for InstrumentedStore {
    async fn upsert(&self, points: Vec<Point>) -> Result<(), StoreError> {
        self.inner.upsert(points).await
    }

    async fn delete(&self, ids: &[PointId]) -> Result<usize, StoreError> {
        self.inner.delete(ids).await
    }

    async fn nearest(&self, query: &NearestQuery) -> Result<Vec<SearchResult>, StoreError> {
        self.nearest_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.nearest {
            return Err(StoreError::Other("nearest unavailable".into()));
        }
        self.inner.nearest(query).await
    }

    async fn fused(&self, query: &FusedQuery) -> Result<Vec<SearchResult>, StoreError> {
        self.fused_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.fused {
            return Err(StoreError::Other("fusion unavailable".into()));
        }
        self.inner.fused(query).await
    }

    async fn scroll_contents(&self) -> Result<Vec<String>, StoreError> {
        self.scroll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.faults.scroll_delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.scroll {
            return Err(StoreError::Other("scroll unavailable".into()));
        }
        self.inner.scroll_contents().await
    }

    async fn load_vocabulary(&self) -> Result<Vec<String>, StoreError> {
        self.inner.load_vocabulary().await
    }

    async fn save_vocabulary(&self, terms: &[String]) -> Result<(), StoreError> {
        self.inner.save_vocabulary(terms).await
    }
}

/// Encodes the documents the way ingestion does. Goes through the inner
/// store so call counters only see the searcher.
async fn points(store: &MemoryStore) -> Vec<Point> {
    let seeding = CorpusIndex::default();
    let contents: Vec<String> = DOCS.iter().map(|(_, text, _)| text.to_string()).collect();
    seeding.rebuild(store, &contents).await.unwrap();

    let mut points = Vec::new();
    for (id, text, subject) in DOCS {
        points.push(Point {
            id: PointId::Num(*id),
            dense: KeywordEmbedder.embed(text).await.unwrap(),
            sparse: Some(seeding.encode_query(text)),
            payload: DocumentPayload::new(*text).with_subject(*subject),
        });
    }
    points
}

async fn setup(embedder: Arc<dyn DenseEncoder>, faults: Faults) -> (HybridSearcher, Arc<InstrumentedStore>) {
    let store = Arc::new(InstrumentedStore::new(faults));
    store.upsert(points(&store.inner).await).await.unwrap();
    let searcher = HybridSearcher::new(embedder, store.clone(), Arc::new(CorpusIndex::default()));
    (searcher, store)
}

#[tokio::test]
async fn hybrid_search_ranks_matching_document_first() {
    let (searcher, store) = setup(Arc::new(KeywordEmbedder), Faults::default()).await;

    let outcome = searcher.search(&SearchRequest::new("cat").limit(3)).await;
    assert_eq!(outcome.search_type, SearchType::Hybrid);
    assert!(!outcome.results.is_empty());
    assert!(outcome.results.len() <= 3);
    assert_eq!(outcome.results[0].id, PointId::Num(1));
    assert_eq!(store.fuses(), 1);
    assert_eq!(store.nearests(), 0);
    assert!(searcher.corpus().is_ready());
}

#[tokio::test]
async fn snapshot_failure_degrades_to_dense_only() {
    let faults = Faults { scroll: true, ..Faults::default() };
    let (searcher, store) = setup(Arc::new(KeywordEmbedder), faults).await;

    let outcome = searcher.search(&SearchRequest::new("cat")).await;
    assert_eq!(outcome.search_type, SearchType::DenseOnly);
    assert!(!outcome.results.is_empty());
    assert_eq!(store.fuses(), 0);
    assert!(!searcher.corpus().is_initialized());
}

#[tokio::test]
async fn embedding_failure_is_an_error() {
    let (searcher, store) = setup(Arc::new(FailingEmbedder), Faults::default()).await;

    let outcome = searcher.search(&SearchRequest::new("cat")).await;
    assert_eq!(outcome.search_type, SearchType::Error);
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.total_found(), 0);
    assert_eq!(store.fuses() + store.nearests(), 0);
}

#[tokio::test]
async fn out_of_vocabulary_query_skips_fusion() {
    let (searcher, store) = setup(Arc::new(KeywordEmbedder), Faults::default()).await;

    let outcome = searcher.search(&SearchRequest::new("zebra")).await;
    assert_eq!(outcome.search_type, SearchType::DenseOnly);
    assert!(!outcome.results.is_empty());
    assert_eq!(store.fuses(), 0);
    assert_eq!(store.nearests(), 1);
    // statistics were still built for the next query
    assert!(searcher.corpus().is_ready());
}

#[tokio::test]
async fn filters_apply_to_hybrid_results() {
    let (searcher, _store) = setup(Arc::new(KeywordEmbedder), Faults::default()).await;

    let filters = SearchFilters::from_pairs([("subject", "math")]);
    let outcome = searcher.search(&SearchRequest::new("dog").limit(10).filters(filters)).await;
    assert_eq!(outcome.search_type, SearchType::Hybrid);
    assert!(!outcome.results.is_empty());
    for result in &outcome.results {
        assert_eq!(result.payload.subject.as_deref(), Some("math"));
    }
}

#[tokio::test]
async fn loose_filters_are_accepted() {
    let (searcher, _store) = setup(Arc::new(KeywordEmbedder), Faults::default()).await;

    let mut filters = HashMap::new();
    filters.insert("subject".to_string(), "physics".to_string());
    filters.insert("colour".to_string(), "blue".to_string());
    let outcome = searcher.search_with("quantum", 5, 0.0, filters).await;
    assert_eq!(outcome.total_found(), 1);
    assert_eq!(outcome.results[0].id, PointId::Num(4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_searches_build_statistics_once() {
    let faults = Faults { scroll_delay: Some(Duration::from_millis(50)), ..Faults::default() };
    let (searcher, store) = setup(Arc::new(KeywordEmbedder), faults).await;
    let searcher = Arc::new(searcher);

    let mut handles = Vec::new();
    for query in ["cat", "dog", "ran", "quantum", "cat dog", "sat"] {
        let searcher = searcher.clone();
        handles.push(tokio::spawn(async move { searcher.search(&SearchRequest::new(query)).await }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.search_type, SearchType::Hybrid);
    }

    assert_eq!(store.scrolls(), 1);
    assert_eq!(searcher.corpus().build_count(), 1);
}

#[tokio::test]
async fn concurrent_initialization_in_one_task() {
    let faults = Faults { scroll_delay: Some(Duration::from_millis(20)), ..Faults::default() };
    let (searcher, store) = setup(Arc::new(KeywordEmbedder), faults).await;
    let corpus = searcher.corpus().clone();

    let (a, b) = tokio::join!(
        corpus.ensure_initialized(store.as_ref()),
        corpus.ensure_initialized(store.as_ref())
    );
    assert!(a.unwrap());
    assert!(b.unwrap());
    assert_eq!(store.scrolls(), 1);
    assert_eq!(corpus.build_count(), 1);
}

#[tokio::test]
async fn fusion_failure_falls_back_to_dense() {
    let faults = Faults { fused: true, ..Faults::default() };
    let (searcher, store) = setup(Arc::new(KeywordEmbedder), faults).await;

    let outcome = searcher.search(&SearchRequest::new("cat")).await;
    assert_eq!(outcome.search_type, SearchType::DenseOnly);
    assert!(!outcome.results.is_empty());
    assert_eq!(store.fuses(), 1);
    assert_eq!(store.nearests(), 1);
}

#[tokio::test]
async fn dense_failure_is_an_error() {
    let faults = Faults { fused: true, nearest: true, ..Faults::default() };
    let (searcher, _store) = setup(Arc::new(KeywordEmbedder), faults).await;

    assert!(searcher.search(&SearchRequest::new("cat")).await.is_error());
    assert!(searcher.search(&SearchRequest::new("zebra")).await.is_error());
}

#[tokio::test]
async fn threshold_filters_everything_without_error() {
    let (searcher, _store) = setup(Arc::new(KeywordEmbedder), Faults::default()).await;

    let outcome = searcher.search(&SearchRequest::new("cat").score_threshold(10.0)).await;
    assert_eq!(outcome.search_type, SearchType::Hybrid);
    assert!(outcome.results.is_empty());

    let outcome = searcher.search(&SearchRequest::new("zebra").score_threshold(10.0)).await;
    assert_eq!(outcome.search_type, SearchType::DenseOnly);
    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn slow_embedding_times_out() {
    let (searcher, _store) = setup(Arc::new(SlowEmbedder(Duration::from_millis(500))), Faults::default()).await;
    let searcher = searcher.with_timeout(Duration::from_millis(20));

    let outcome = searcher.search(&SearchRequest::new("cat")).await;
    assert!(outcome.is_error());
}

#[tokio::test]
async fn slow_snapshot_times_out_to_dense_only() {
    let faults = Faults { scroll_delay: Some(Duration::from_millis(500)), ..Faults::default() };
    let (searcher, _store) = setup(Arc::new(KeywordEmbedder), faults).await;
    let searcher = searcher.with_timeout(Duration::from_millis(20));

    let outcome = searcher.search(&SearchRequest::new("cat")).await;
    assert_eq!(outcome.search_type, SearchType::DenseOnly);
    assert!(!searcher.corpus().is_initialized());
}

#[tokio::test]
async fn limit_is_clamped() {
    let (searcher, _store) = setup(Arc::new(KeywordEmbedder), Faults::default()).await;

    let outcome = searcher.search(&SearchRequest::new("cat").limit(0)).await;
    assert_eq!(outcome.total_found(), 1);

    let outcome = searcher.search(&SearchRequest::new("cat").limit(1_000)).await;
    assert_eq!(outcome.total_found(), DOCS.len());
}

#[tokio::test]
async fn empty_store_retries_initialization_later() {
    let store = Arc::new(InstrumentedStore::new(Faults::default()));
    let searcher = HybridSearcher::new(Arc::new(KeywordEmbedder), store.clone(), Arc::new(CorpusIndex::default()));

    let outcome = searcher.search(&SearchRequest::new("cat")).await;
    assert_eq!(outcome.search_type, SearchType::DenseOnly);
    assert!(outcome.results.is_empty());
    assert!(!searcher.corpus().is_initialized());

    store.upsert(points(&store.inner).await).await.unwrap();
    let outcome = searcher.search(&SearchRequest::new("cat")).await;
    assert_eq!(outcome.search_type, SearchType::Hybrid);
    assert_eq!(store.scrolls(), 2);
    assert_eq!(searcher.corpus().build_count(), 1);
}

#[tokio::test]
async fn outcome_serializes_with_tagged_search_type() {
    let (searcher, _store) = setup(Arc::new(KeywordEmbedder), Faults::default()).await;

    let outcome = searcher.search(&SearchRequest::new("zebra").limit(1)).await;
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["search_type"], "dense_only");
    assert_eq!(json["results"].as_array().map(Vec::len), Some(1));
}
