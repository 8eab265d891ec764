use super::{scoring, FusedQuery, NearestQuery, VectorStore};
use crate::error::StoreError;
use crate::fusion::RrfFusion;
use crate::types::{Point, PointId, SearchResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-process store with exact (brute-force) search.
#[derive(Default)]
pub struct MemoryStore {
    points: RwLock<BTreeMap<PointId, Point>>,
    vocabulary: RwLock<Vec<String>>,
    fusion: RrfFusion,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fusion(mut self, fusion: RrfFusion) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn upsert(&self, points: Vec<Point>) -> Result<(), StoreError> {
        let mut guard = self.points.write();
        for point in points {
            guard.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn delete(&self, ids: &[PointId]) -> Result<usize, StoreError> {
        let mut guard = self.points.write();
        Ok(ids.iter().filter(|id| guard.remove(*id).is_some()).count())
    }

    async fn nearest(&self, query: &NearestQuery) -> Result<Vec<SearchResult>, StoreError> {
        let guard = self.points.read();
        scoring::nearest(guard.values(), query)
    }

    async fn fused(&self, query: &FusedQuery) -> Result<Vec<SearchResult>, StoreError> {
        let points: Vec<Point> = self.points.read().values().cloned().collect();
        scoring::fused(&points, query, &self.fusion)
    }

    async fn scroll_contents(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.points.read().values().map(|p| p.payload.content.clone()).collect())
    }

    async fn load_vocabulary(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.vocabulary.read().clone())
    }

    async fn save_vocabulary(&self, terms: &[String]) -> Result<(), StoreError> {
        *self.vocabulary.write() = terms.to_vec();
        Ok(())
    }
}
