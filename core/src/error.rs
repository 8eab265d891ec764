use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("vocabulary is full: cannot assign an index to term {0:?}")]
    VocabularyFull(String),
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("embedding service returned status {0}")]
    Status(u16),

    #[error("embedding service returned an empty vector")]
    Empty,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("unknown vector field: {0}")]
    UnknownField(String),

    #[error("invalid payload for point {id}: {reason}")]
    InvalidPayload { id: String, reason: String },

    #[error("store request timed out after {0}s")]
    Timeout(u64),

    #[cfg(feature = "qdrant")]
    #[error("qdrant error: {0}")]
    Qdrant(#[from] qdrant_client::QdrantError),

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("failed to fetch corpus snapshot: {0}")]
    Fetch(#[from] StoreError),

    #[error("failed to build corpus statistics: {0}")]
    Build(#[from] EncoderError),
}
