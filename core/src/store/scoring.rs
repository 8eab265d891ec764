//! Brute-force scoring shared by the local stores.

use super::{FusedQuery, Fusion, NearestQuery, QueryVector};
use crate::error::StoreError;
use crate::fusion::RrfFusion;
use crate::types::{Point, PointId, SearchResult, DENSE_FIELD, SPARSE_FIELD};
use std::collections::HashMap;

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> Result<f32, StoreError> {
    if a.len() != b.len() {
        return Err(StoreError::InvalidDimension { expected: b.len(), actual: a.len() });
    }
    // f64 accumulation: squares of large f32 components overflow f32.
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (na.sqrt() * nb.sqrt())) as f32)
}

pub(crate) fn nearest<'a, I>(points: I, query: &NearestQuery) -> Result<Vec<SearchResult>, StoreError>
where
    I: IntoIterator<Item = &'a Point>,
{
    let mut scored: Vec<(&Point, f32)> = Vec::new();
    for point in points {
        if !query.filter.matches(&point.payload) {
            continue;
        }
        let score = match (query.using.as_str(), &query.vector) {
            (DENSE_FIELD, QueryVector::Dense(v)) => Some(cosine(v, &point.dense)?),
            (SPARSE_FIELD, QueryVector::Sparse(v)) => point.sparse.as_ref().and_then(|s| v.dot(s)),
            (field, _) => return Err(StoreError::UnknownField(field.to_string())),
        };
        match score {
            Some(score) if score.is_finite() => scored.push((point, score)),
            Some(_) => tracing::warn!(id = %point.id, "dropping point with non-finite score"),
            None => {}
        }
    }

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(query.limit);
    Ok(scored
        .into_iter()
        .map(|(p, score)| SearchResult { id: p.id.clone(), score, payload: p.payload.clone() })
        .collect())
}

pub(crate) fn fused(points: &[Point], query: &FusedQuery, rrf: &RrfFusion) -> Result<Vec<SearchResult>, StoreError> {
    let mut legs: Vec<Vec<PointId>> = Vec::with_capacity(query.prefetch.len());
    for prefetch in &query.prefetch {
        let hits = nearest(points, prefetch)?;
        legs.push(hits.into_iter().map(|h| h.id).collect());
    }

    let ranked = match query.fusion {
        Fusion::Rrf => rrf.fuse(legs),
    };

    let by_id: HashMap<&PointId, &Point> = points.iter().map(|p| (&p.id, p)).collect();
    Ok(ranked
        .into_iter()
        .take(query.limit)
        .filter_map(|(id, score)| {
            by_id
                .get(&id)
                .map(|p| SearchResult { id: id.clone(), score, payload: p.payload.clone() })
        })
        .collect())
}
