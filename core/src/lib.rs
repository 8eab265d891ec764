//! # Hybrid retrieval core
//!
//! BM25 sparse vectors computed locally, dense embeddings from an external
//! provider, and reciprocal rank fusion of both in a vector store that keeps
//! a `dense_vector` and a `bm25_sparse_vector` field per point.
//!
//! ```text
//! query ──> DenseEncoder ──────────────┐
//!   │                                  ├──> fused RRF query ──> SearchOutcome { hybrid }
//!   └──> CorpusIndex ─> SparseEncoder ─┘
//!              (not ready / empty)  ──> dense-only query ──> SearchOutcome { dense_only }
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use retrieval_core::{CorpusIndex, HttpEmbedder, HybridSearcher, SearchRequest, SledStore};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = Arc::new(HttpEmbedder::new("http://embedding:8005", std::time::Duration::from_secs(30))?);
//! let store = Arc::new(SledStore::open("./store")?);
//! let searcher = HybridSearcher::new(embedder, store, Arc::new(CorpusIndex::default()));
//!
//! let outcome = searcher.search(&SearchRequest::new("newton's second law").limit(5)).await;
//! println!("{} results via {}", outcome.total_found(), outcome.search_type);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod corpus;
pub mod embedding;
pub mod encoder;
pub mod error;
pub mod fusion;
pub mod search;
pub mod store;
pub mod tokenizer;
pub mod types;

pub use config::EngineConfig;
pub use corpus::CorpusIndex;
pub use embedding::{DenseEncoder, HttpEmbedder};
pub use encoder::{Bm25Params, CorpusInfo, CorpusStatistics, IdfMode, SparseEncoder, Vocabulary};
pub use error::{CorpusError, EmbeddingError, EncoderError, StoreError};
pub use fusion::RrfFusion;
pub use search::{HybridSearcher, SearchRequest};
#[cfg(feature = "qdrant")]
pub use store::QdrantStore;
pub use store::{FusedQuery, Fusion, MemoryStore, NearestQuery, QueryVector, SledStore, VectorStore};
pub use types::{
    DenseVector, DocumentPayload, Point, PointId, SearchFilters, SearchOutcome, SearchResult, SearchType,
    SparseVector, TermId, DENSE_FIELD, SPARSE_FIELD,
};
