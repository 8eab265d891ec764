use super::{FusedQuery, Fusion, NearestQuery, QueryVector, VectorStore};
use crate::error::StoreError;
use crate::types::{DocumentPayload, Point, PointId, SearchFilters, SearchResult, DENSE_FIELD, SPARSE_FIELD};
use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Distance,
    FieldType, Filter, Fusion as QdrantFusion, GetPointsBuilder, NamedVectors, PointId as QdrantPointId, PointStruct, PointsIdsList,
    PrefetchQueryBuilder, Query, QueryPointsBuilder, ScrollPointsBuilder, SparseVectorParamsBuilder,
    SparseVectorsConfigBuilder, UpsertPointsBuilder, Value, Vector, VectorInput, VectorParamsBuilder,
    VectorsConfigBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;
use std::time::Duration;

const SCROLL_PAGE: u32 = 1000;
/// Payload-only point holding the BM25 vocabulary. It has no vectors and no
/// content, so searches and content scrolls never return it.
const VOCABULARY_POINT: &str = "6b9e2c1a-0000-4000-8000-00000000b425";
const VOCABULARY_FIELD: &str = "bm25_vocabulary";

/// Qdrant collection with a `dense_vector` and a `bm25_sparse_vector` field.
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
}

impl QdrantStore {
    pub fn connect(
        url: &str,
        api_key: Option<String>,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Qdrant::from_url(url).api_key(api_key).timeout(timeout).build()?;
        let collection = collection.into();
        tracing::info!(url, collection = %collection, "qdrant client initialized");
        Ok(Self { client, collection })
    }

    /// Creates the collection and keyword indexes on the filterable fields if missing.
    pub async fn ensure_collection(&self, dimension: u64) -> Result<(), StoreError> {
        if self.client.collection_exists(&self.collection).await? {
            tracing::debug!(collection = %self.collection, "collection already exists");
            return Ok(());
        }

        let mut dense = VectorsConfigBuilder::default();
        dense.add_named_vector_params(DENSE_FIELD, VectorParamsBuilder::new(dimension, Distance::Cosine));
        let mut sparse = SparseVectorsConfigBuilder::default();
        sparse.add_named_vector_params(SPARSE_FIELD, SparseVectorParamsBuilder::default());
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(dense)
                    .sparse_vectors_config(sparse),
            )
            .await?;

        for field in ["subject", "title", "week"] {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    field,
                    FieldType::Keyword,
                ))
                .await?;
        }
        tracing::info!(collection = %self.collection, dimension, "collection created");
        Ok(())
    }
}

fn to_filter(filters: &SearchFilters) -> Option<Filter> {
    let conditions: Vec<Condition> = filters
        .conditions()
        .into_iter()
        .map(|(field, value)| Condition::matches(field, value.to_string()))
        .collect();
    if conditions.is_empty() {
        None
    } else {
        Some(Filter::must(conditions))
    }
}

fn to_query(vector: &QueryVector) -> Query {
    match vector {
        QueryVector::Dense(v) => Query::new_nearest(v.clone()),
        QueryVector::Sparse(s) => Query::new_nearest(VectorInput::new_sparse(s.indices(), s.values())),
    }
}

fn to_qdrant_id(id: &PointId) -> QdrantPointId {
    match id {
        PointId::Num(n) => QdrantPointId::from(*n),
        PointId::Uuid(s) => QdrantPointId::from(s.clone()),
    }
}

fn from_qdrant_id(id: Option<QdrantPointId>) -> Option<PointId> {
    match id?.point_id_options? {
        PointIdOptions::Num(n) => Some(PointId::Num(n)),
        PointIdOptions::Uuid(s) => Some(PointId::Uuid(s)),
    }
}

fn string_field(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        Kind::IntegerValue(i) => Some(i.to_string()),
        Kind::DoubleValue(d) => Some(d.to_string()),
        Kind::BoolValue(b) => Some(b.to_string()),
        _ => None,
    }
}

fn content_field(payload: &HashMap<String, Value>) -> Option<String> {
    string_field(payload, "content").or_else(|| string_field(payload, "text"))
}

fn to_payload(id: &PointId, payload: &HashMap<String, Value>) -> Result<DocumentPayload, StoreError> {
    let content = content_field(payload).ok_or_else(|| StoreError::InvalidPayload {
        id: id.to_string(),
        reason: "missing content".to_string(),
    })?;
    let chunk_id = match payload.get("chunk_id").and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(i)) => u64::try_from(*i).ok(),
        Some(Kind::StringValue(s)) => s.parse().ok(),
        _ => None,
    };
    Ok(DocumentPayload {
        content,
        subject: string_field(payload, "subject"),
        title: string_field(payload, "title"),
        week: string_field(payload, "week"),
        chunk_id,
        timestamp: string_field(payload, "timestamp"),
    })
}

fn payload_map(payload: &DocumentPayload) -> HashMap<String, Value> {
    let mut map: HashMap<String, Value> = HashMap::new();
    map.insert("content".to_string(), payload.content.clone().into());
    for (key, value) in [
        ("subject", &payload.subject),
        ("title", &payload.title),
        ("week", &payload.week),
        ("timestamp", &payload.timestamp),
    ] {
        if let Some(v) = value {
            map.insert(key.to_string(), v.clone().into());
        }
    }
    if let Some(chunk_id) = payload.chunk_id {
        map.insert("chunk_id".to_string(), (chunk_id as i64).into());
    }
    map
}

fn to_results(points: Vec<qdrant_client::qdrant::ScoredPoint>) -> Vec<SearchResult> {
    points
        .into_iter()
        .filter_map(|p| {
            let Some(id) = from_qdrant_id(p.id) else {
                tracing::warn!("skipping scored point without id");
                return None;
            };
            match to_payload(&id, &p.payload) {
                Ok(payload) => Some(SearchResult { id, score: p.score, payload }),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping point with invalid payload");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, points: Vec<Point>) -> Result<(), StoreError> {
        let count = points.len();
        let structs: Vec<PointStruct> = points
            .iter()
            .map(|point| {
                let mut vectors = NamedVectors::default().add_vector(DENSE_FIELD, point.dense.clone());
                if let Some(sparse) = &point.sparse {
                    vectors = vectors.add_vector(SPARSE_FIELD, Vector::new_sparse(sparse.indices(), sparse.values()));
                }
                PointStruct::new(to_qdrant_id(&point.id), vectors, Payload::from(payload_map(&point.payload)))
            })
            .collect();
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, structs).wait(true))
            .await?;
        tracing::debug!(count, collection = %self.collection, "upserted points");
        Ok(())
    }

    // Qdrant does not report how many ids existed; the requested count is returned.
    async fn delete(&self, ids: &[PointId]) -> Result<usize, StoreError> {
        let list = PointsIdsList { ids: ids.iter().map(to_qdrant_id).collect() };
        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(list).wait(true))
            .await?;
        Ok(ids.len())
    }

    async fn nearest(&self, query: &NearestQuery) -> Result<Vec<SearchResult>, StoreError> {
        let mut request = QueryPointsBuilder::new(&self.collection)
            .query(to_query(&query.vector))
            .using(query.using.as_str())
            .limit(query.limit as u64)
            .with_payload(true);
        if let Some(filter) = to_filter(&query.filter) {
            request = request.filter(filter);
        }
        let response = self.client.query(request).await?;
        Ok(to_results(response.result))
    }

    async fn fused(&self, query: &FusedQuery) -> Result<Vec<SearchResult>, StoreError> {
        let mut request = QueryPointsBuilder::new(&self.collection);
        for leg in &query.prefetch {
            let mut prefetch = PrefetchQueryBuilder::default()
                .query(to_query(&leg.vector))
                .using(leg.using.as_str())
                .limit(leg.limit as u64);
            if let Some(filter) = to_filter(&leg.filter) {
                prefetch = prefetch.filter(filter);
            }
            request = request.add_prefetch(prefetch);
        }
        let fusion = match query.fusion {
            Fusion::Rrf => QdrantFusion::Rrf,
        };
        let request = request.query(fusion).limit(query.limit as u64).with_payload(true);
        let response = self.client.query(request).await?;
        Ok(to_results(response.result))
    }

    async fn scroll_contents(&self) -> Result<Vec<String>, StoreError> {
        let mut contents = Vec::new();
        let mut offset: Option<QdrantPointId> = None;
        loop {
            let mut request = ScrollPointsBuilder::new(&self.collection)
                .limit(SCROLL_PAGE)
                .with_payload(true)
                .with_vectors(false);
            if let Some(next) = offset.take() {
                request = request.offset(next);
            }
            let page = self.client.scroll(request).await?;
            contents.extend(page.result.iter().filter_map(|p| content_field(&p.payload)));
            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        tracing::debug!(documents = contents.len(), collection = %self.collection, "scrolled corpus snapshot");
        Ok(contents)
    }

    async fn load_vocabulary(&self) -> Result<Vec<String>, StoreError> {
        let request = GetPointsBuilder::new(&self.collection, vec![vocabulary_id()]).with_payload(true);
        let response = self.client.get_points(request).await?;
        let Some(raw) = response.result.first().and_then(|p| string_field(&p.payload, VOCABULARY_FIELD)) else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).map_err(|err| StoreError::Other(format!("corrupt BM25 vocabulary: {err}")))
    }

    async fn save_vocabulary(&self, terms: &[String]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(terms).map_err(|err| StoreError::Other(err.to_string()))?;
        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert(VOCABULARY_FIELD.to_string(), raw.into());
        let point = PointStruct::new(vocabulary_id(), NamedVectors::default(), Payload::from(payload));
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await?;
        tracing::debug!(terms = terms.len(), collection = %self.collection, "saved BM25 vocabulary");
        Ok(())
    }
}

fn vocabulary_id() -> QdrantPointId {
    QdrantPointId::from(VOCABULARY_POINT.to_string())
}
