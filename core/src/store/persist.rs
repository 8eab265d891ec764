use super::{scoring, FusedQuery, NearestQuery, VectorStore};
use crate::error::StoreError;
use crate::fusion::RrfFusion;
use crate::types::{DenseVector, DocumentPayload, Point, PointId, SearchResult, SparseVector};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

const POINTS_TREE: &str = "points";
const META_TREE: &str = "meta";
const VOCABULARY_KEY: &[u8] = b"vocabulary";

/// Value stored per key; the point id lives in the key.
#[derive(Debug, Serialize, Deserialize)]
struct StoredPoint {
    dense: DenseVector,
    sparse: Option<SparseVector>,
    payload: DocumentPayload,
}

/// Persistent local store: bincode-encoded points in a sled tree, and the
/// BM25 vocabulary in a separate tree.
///
/// Search is exact and scans every point, which suits corpora that fit in
/// memory for a single query.
pub struct SledStore {
    db: sled::Db,
    points: sled::Tree,
    meta: sled::Tree,
    fusion: RrfFusion,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let db = sled::open(root)?;
        let points = db.open_tree(POINTS_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        tracing::debug!(path = %root.display(), points = points.len(), "opened sled store");
        Ok(Self { db, points, meta, fusion: RrfFusion::default() })
    }

    pub fn with_fusion(mut self, fusion: RrfFusion) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn load_points(&self) -> Result<Vec<Point>, StoreError> {
        let mut out = Vec::with_capacity(self.points.len());
        for entry in self.points.iter() {
            let (key, value) = entry?;
            let id = decode_key(&key)?;
            let stored: StoredPoint = bincode::deserialize(&value)?;
            out.push(Point { id, dense: stored.dense, sparse: stored.sparse, payload: stored.payload });
        }
        Ok(out)
    }
}

fn encode_key(id: &PointId) -> Vec<u8> {
    match id {
        PointId::Num(n) => {
            let mut key = Vec::with_capacity(9);
            key.push(b'n');
            key.extend_from_slice(&n.to_be_bytes());
            key
        }
        PointId::Uuid(s) => {
            let mut key = Vec::with_capacity(s.len() + 1);
            key.push(b'u');
            key.extend_from_slice(s.as_bytes());
            key
        }
    }
}

fn decode_key(key: &[u8]) -> Result<PointId, StoreError> {
    let corrupt = || StoreError::Other(format!("corrupt point key: {key:?}"));
    match key.split_first() {
        Some((b'n', rest)) => {
            let bytes: [u8; 8] = rest.try_into().map_err(|_| corrupt())?;
            Ok(PointId::Num(u64::from_be_bytes(bytes)))
        }
        Some((b'u', rest)) => {
            let s = std::str::from_utf8(rest).map_err(|_| corrupt())?;
            Ok(PointId::Uuid(s.to_string()))
        }
        _ => Err(corrupt()),
    }
}

#[async_trait]
impl VectorStore for SledStore {
    async fn upsert(&self, points: Vec<Point>) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        let count = points.len();
        for point in points {
            let key = encode_key(&point.id);
            let value = bincode::serialize(&StoredPoint {
                dense: point.dense,
                sparse: point.sparse,
                payload: point.payload,
            })?;
            batch.insert(key, value);
        }
        self.points.apply_batch(batch)?;
        self.db.flush_async().await?;
        tracing::debug!(count, "upserted points");
        Ok(())
    }

    async fn delete(&self, ids: &[PointId]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for id in ids {
            if self.points.remove(encode_key(id))?.is_some() {
                removed += 1;
            }
        }
        self.db.flush_async().await?;
        Ok(removed)
    }

    async fn nearest(&self, query: &NearestQuery) -> Result<Vec<SearchResult>, StoreError> {
        let points = self.load_points()?;
        scoring::nearest(&points, query)
    }

    async fn fused(&self, query: &FusedQuery) -> Result<Vec<SearchResult>, StoreError> {
        let points = self.load_points()?;
        scoring::fused(&points, query, &self.fusion)
    }

    async fn scroll_contents(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.load_points()?.into_iter().map(|p| p.payload.content).collect())
    }

    async fn load_vocabulary(&self) -> Result<Vec<String>, StoreError> {
        match self.meta.get(VOCABULARY_KEY)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_vocabulary(&self, terms: &[String]) -> Result<(), StoreError> {
        self.meta.insert(VOCABULARY_KEY, bincode::serialize(terms)?)?;
        self.db.flush_async().await?;
        tracing::debug!(terms = terms.len(), "saved BM25 vocabulary");
        Ok(())
    }
}
