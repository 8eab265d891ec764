//! Vector store interface and implementations.
//!
//! Every point carries two named vector fields, [`DENSE_FIELD`] and
//! [`SPARSE_FIELD`], plus a [`DocumentPayload`](crate::types::DocumentPayload).
//! Stores answer single-field nearest-neighbour queries and fused
//! multi-field queries, and expose a content snapshot used to build corpus
//! statistics. The BM25 vocabulary is saved next to the points so term
//! indices in stored sparse vectors stay valid across processes.

mod memory;
mod persist;
#[cfg(feature = "qdrant")]
mod qdrant;
mod scoring;

pub use memory::MemoryStore;
pub use persist::SledStore;
#[cfg(feature = "qdrant")]
pub use qdrant::QdrantStore;

use crate::error::StoreError;
use crate::types::{DenseVector, Point, PointId, SearchFilters, SearchResult, SparseVector};
use crate::types::{DENSE_FIELD, SPARSE_FIELD};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryVector {
    Dense(DenseVector),
    Sparse(SparseVector),
}

/// Nearest-neighbour query against one named vector field.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestQuery {
    pub using: String,
    pub vector: QueryVector,
    pub filter: SearchFilters,
    pub limit: usize,
}

impl NearestQuery {
    pub fn dense(vector: DenseVector, filter: SearchFilters, limit: usize) -> Self {
        Self { using: DENSE_FIELD.to_string(), vector: QueryVector::Dense(vector), filter, limit }
    }

    pub fn sparse(vector: SparseVector, filter: SearchFilters, limit: usize) -> Self {
        Self { using: SPARSE_FIELD.to_string(), vector: QueryVector::Sparse(vector), filter, limit }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fusion {
    /// Reciprocal rank fusion.
    Rrf,
}

/// Several prefetch legs merged into one ranked, deduplicated list.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedQuery {
    pub prefetch: Vec<NearestQuery>,
    pub fusion: Fusion,
    pub limit: usize,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces points by id.
    async fn upsert(&self, points: Vec<Point>) -> Result<(), StoreError>;

    /// Deletes points by id, returning how many existed.
    async fn delete(&self, ids: &[PointId]) -> Result<usize, StoreError>;

    /// Nearest neighbours on a single field, best first.
    async fn nearest(&self, query: &NearestQuery) -> Result<Vec<SearchResult>, StoreError>;

    /// Fused multi-field query, best first.
    async fn fused(&self, query: &FusedQuery) -> Result<Vec<SearchResult>, StoreError>;

    /// Content of every stored document.
    async fn scroll_contents(&self) -> Result<Vec<String>, StoreError>;

    /// BM25 vocabulary in index order, empty when none was saved.
    async fn load_vocabulary(&self) -> Result<Vec<String>, StoreError>;

    /// Replaces the saved BM25 vocabulary.
    async fn save_vocabulary(&self, terms: &[String]) -> Result<(), StoreError>;
}
