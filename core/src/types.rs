use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub type TermId = u32;

/// Dense embedding as produced by the embedding provider.
pub type DenseVector = Vec<f32>;

/// Name of the dense vector field on stored points.
pub const DENSE_FIELD: &str = "dense_vector";
/// Name of the BM25 sparse vector field on stored points.
pub const SPARSE_FIELD: &str = "bm25_sparse_vector";

/// Sparse vector holding only strictly positive weights, ordered by term index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    entries: BTreeMap<TermId, f32>,
}

impl SparseVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `weight` for `index`. Non-positive and NaN weights are ignored.
    pub fn insert(&mut self, index: TermId, weight: f32) {
        if weight > 0.0 {
            self.entries.insert(index, weight);
        }
    }

    pub fn get(&self, index: TermId) -> Option<f32> {
        self.entries.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TermId, f32)> + '_ {
        self.entries.iter().map(|(i, w)| (*i, *w))
    }

    pub fn indices(&self) -> Vec<TermId> {
        self.entries.keys().copied().collect()
    }

    pub fn values(&self) -> Vec<f32> {
        self.entries.values().copied().collect()
    }

    /// Dot product over shared indices, `None` when no index is shared.
    pub fn dot(&self, other: &SparseVector) -> Option<f32> {
        let (small, large) = if self.len() <= other.len() { (self, other) } else { (other, self) };
        let mut shared = false;
        let mut sum = 0.0f32;
        for (idx, w) in small.iter() {
            if let Some(v) = large.get(idx) {
                shared = true;
                sum += w * v;
            }
        }
        shared.then_some(sum)
    }
}

impl FromIterator<(TermId, f32)> for SparseVector {
    fn from_iter<I: IntoIterator<Item = (TermId, f32)>>(iter: I) -> Self {
        let mut v = SparseVector::new();
        for (idx, w) in iter {
            v.insert(idx, w);
        }
        v
    }
}

/// Identifier of a stored point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointId {
    Num(u64),
    Uuid(String),
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointId::Num(n) => write!(f, "{n}"),
            PointId::Uuid(s) => f.write_str(s),
        }
    }
}

impl From<u64> for PointId {
    fn from(n: u64) -> Self {
        PointId::Num(n)
    }
}

impl From<String> for PointId {
    fn from(s: String) -> Self {
        // Numeric strings become numeric ids.
        match s.parse::<u64>() {
            Ok(n) => PointId::Num(n),
            Err(_) => PointId::Uuid(s),
        }
    }
}

impl From<&str> for PointId {
    fn from(s: &str) -> Self {
        PointId::from(s.to_string())
    }
}

/// Payload stored alongside each point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    #[serde(alias = "text")]
    pub content: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub week: Option<String>,
    #[serde(default)]
    pub chunk_id: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl DocumentPayload {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), ..Self::default() }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_week(mut self, week: impl Into<String>) -> Self {
        self.week = Some(week.into());
        self
    }

    /// Value of a filterable field by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "subject" => self.subject.as_deref(),
            "title" => self.title.as_deref(),
            "week" => self.week.as_deref(),
            _ => None,
        }
    }
}

/// Conjunction of equality constraints over the filterable payload fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub week: Option<String>,
}

impl SearchFilters {
    /// Builds filters from loose key/value pairs. Unknown keys are ignored.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut filters = SearchFilters::default();
        for (key, value) in pairs {
            let value = value.into();
            match key.as_ref() {
                "subject" => filters.subject = Some(value),
                "title" => filters.title = Some(value),
                "week" => filters.week = Some(value),
                other => tracing::warn!(field = other, "ignoring filter on unknown payload field"),
            }
        }
        filters
    }

    /// Active `(field, value)` constraints. Empty values impose no constraint.
    pub fn conditions(&self) -> Vec<(&'static str, &str)> {
        [("subject", &self.subject), ("title", &self.title), ("week", &self.week)]
            .into_iter()
            .filter_map(|(field, value)| match value.as_deref() {
                Some(v) if !v.is_empty() => Some((field, v)),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions().is_empty()
    }

    pub fn matches(&self, payload: &DocumentPayload) -> bool {
        self.conditions()
            .into_iter()
            .all(|(field, value)| payload.field(field) == Some(value))
    }
}

impl From<HashMap<String, String>> for SearchFilters {
    fn from(map: HashMap<String, String>) -> Self {
        SearchFilters::from_pairs(map)
    }
}

/// Point as held by a vector store: both vector fields plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: PointId,
    pub dense: DenseVector,
    #[serde(default)]
    pub sparse: Option<SparseVector>,
    pub payload: DocumentPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: PointId,
    pub score: f32,
    pub payload: DocumentPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Hybrid,
    DenseOnly,
    Error,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Hybrid => "hybrid",
            SearchType::DenseOnly => "dense_only",
            SearchType::Error => "error",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub search_type: SearchType,
}

impl SearchOutcome {
    pub fn error() -> Self {
        Self { results: Vec::new(), search_type: SearchType::Error }
    }

    pub fn total_found(&self) -> usize {
        self.results.len()
    }

    pub fn is_error(&self) -> bool {
        self.search_type == SearchType::Error
    }
}
