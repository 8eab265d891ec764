use crate::encoder::{Bm25Params, IdfMode};
use crate::fusion::DEFAULT_RRF_K;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_EMBEDDING_URL: &str = "http://embedding:8005";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_COLLECTION: &str = "agent_data";

/// Engine settings, read from the environment by [`EngineConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub embedding_url: String,
    pub request_timeout_secs: u64,
    pub store_path: PathBuf,
    pub bm25: Bm25Params,
    pub rrf_k: f32,
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub collection: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding_url: DEFAULT_EMBEDDING_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            store_path: PathBuf::from("./store"),
            bm25: Bm25Params::default(),
            rrf_k: DEFAULT_RRF_K,
            qdrant_url: None,
            qdrant_api_key: None,
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `EMBEDDING_SERVICE_URL`, `HYBRID_REQUEST_TIMEOUT_SECS`,
    /// `HYBRID_STORE_PATH`, `BM25_K1`, `BM25_B`, `BM25_IDF`, `RRF_K`, `QDRANT_URL`,
    /// `QDRANT_API_KEY` and `QDRANT_COLLECTION`. Unparsable values are ignored
    /// with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = EngineConfig::default();
        if let Some(url) = lookup("EMBEDDING_SERVICE_URL") {
            cfg.embedding_url = url;
        }
        if let Some(secs) = parsed(&lookup, "HYBRID_REQUEST_TIMEOUT_SECS") {
            cfg.request_timeout_secs = secs;
        }
        if let Some(path) = lookup("HYBRID_STORE_PATH") {
            cfg.store_path = PathBuf::from(path);
        }
        if let Some(k1) = parsed(&lookup, "BM25_K1") {
            cfg.bm25.k1 = k1;
        }
        if let Some(b) = parsed(&lookup, "BM25_B") {
            cfg.bm25.b = b;
        }
        if let Some(idf) = parsed::<IdfMode, _>(&lookup, "BM25_IDF") {
            cfg.bm25.idf = idf;
        }
        if let Some(k) = parsed(&lookup, "RRF_K") {
            cfg.rrf_k = k;
        }
        cfg.qdrant_url = lookup("QDRANT_URL").filter(|s| !s.is_empty());
        cfg.qdrant_api_key = lookup("QDRANT_API_KEY").filter(|s| !s.is_empty());
        if let Some(collection) = lookup("QDRANT_COLLECTION") {
            cfg.collection = collection;
        }
        cfg
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(err) => {
            tracing::warn!(key, value = %raw, error = %err, "ignoring invalid configuration value");
            None
        }
    }
}
