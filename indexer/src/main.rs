use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use retrieval_core::{
    CorpusIndex, DenseEncoder, DocumentPayload, EngineConfig, HttpEmbedder, HybridSearcher, IdfMode, Point, PointId,
    RrfFusion, SearchFilters, SearchRequest, SledStore, VectorStore,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const UPSERT_BATCH: usize = 64;

#[derive(Debug, Deserialize)]
struct InputDoc {
    id: PointId,
    #[serde(alias = "text", alias = "body")]
    content: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    week: Option<String>,
    #[serde(default)]
    chunk_id: Option<u64>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl InputDoc {
    fn point_id(&self) -> PointId {
        match &self.id {
            PointId::Uuid(s) => PointId::from(s.as_str()),
            id => id.clone(),
        }
    }

    fn into_payload(self, now: &Option<String>) -> DocumentPayload {
        DocumentPayload {
            content: self.content,
            subject: self.subject,
            title: self.title,
            week: self.week,
            chunk_id: self.chunk_id,
            timestamp: self.timestamp.or_else(|| now.clone()),
        }
    }
}

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Ingest documents and run hybrid BM25 + dense searches", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,
    #[command(subcommand)]
    command: Commands,
}

/// Overrides on top of [`EngineConfig::from_env`].
#[derive(Args)]
struct Settings {
    /// Local store directory
    #[arg(long, global = true, env = "HYBRID_STORE_PATH")]
    store_path: Option<PathBuf>,
    /// Base URL of the embedding service
    #[arg(long, global = true, env = "EMBEDDING_SERVICE_URL")]
    embedding_url: Option<String>,
    /// Timeout for each embedding or store call, in seconds
    #[arg(long, global = true, env = "HYBRID_REQUEST_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
    /// IDF variant: smoothed or okapi
    #[arg(long, global = true, env = "BM25_IDF")]
    idf: Option<IdfMode>,
    /// Qdrant URL; requires the `qdrant` feature
    #[arg(long, global = true, env = "QDRANT_URL")]
    qdrant_url: Option<String>,
    /// Qdrant collection name
    #[arg(long, global = true, env = "QDRANT_COLLECTION")]
    collection: Option<String>,
}

impl Settings {
    fn resolve(self) -> EngineConfig {
        let mut cfg = EngineConfig::from_env();
        if let Some(path) = self.store_path {
            cfg.store_path = path;
        }
        if let Some(url) = self.embedding_url {
            cfg.embedding_url = url;
        }
        if let Some(secs) = self.timeout_secs {
            cfg.request_timeout_secs = secs;
        }
        if let Some(idf) = self.idf {
            cfg.bm25.idf = idf;
        }
        if let Some(url) = self.qdrant_url.filter(|s| !s.is_empty()) {
            cfg.qdrant_url = Some(url);
        }
        if let Some(collection) = self.collection {
            cfg.collection = collection;
        }
        cfg
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Embed, BM25-encode and upsert documents from JSON/JSONL files or a directory
    Ingest {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
    },
    /// Run a hybrid search and print the outcome as JSON
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        #[arg(long, default_value_t = 0.0)]
        threshold: f32,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        week: Option<String>,
    },
    /// Print BM25 corpus statistics
    Stats,
    /// Show how a text is tokenized and BM25-encoded against the stored corpus
    Encode {
        #[arg(long)]
        text: String,
        /// Length used for normalization instead of the text's own token count
        #[arg(long)]
        doc_length: Option<usize>,
    },
    /// Delete points by id
    Delete {
        #[arg(long, required = true, num_args = 1..)]
        ids: Vec<String>,
    },
}

#[derive(Serialize)]
struct EncodeReport {
    tokens: Vec<String>,
    indices: Vec<u32>,
    terms: Vec<String>,
    values: Vec<f32>,
    stats_ready: bool,
    vocabulary_size: usize,
    vocabulary_sample: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let cfg = cli.settings.resolve();

    match cli.command {
        Commands::Ingest { input } => ingest(&cfg, &input).await,
        Commands::Search { query, limit, threshold, subject, title, week } => {
            let filters = SearchFilters { subject, title, week };
            let request = SearchRequest::new(query).limit(limit).score_threshold(threshold).filters(filters);
            search(&cfg, &request).await
        }
        Commands::Stats => stats(&cfg).await,
        Commands::Encode { text, doc_length } => encode(&cfg, &text, doc_length).await,
        Commands::Delete { ids } => delete(&cfg, ids).await,
    }
}

async fn ingest(cfg: &EngineConfig, input: &str) -> Result<()> {
    let docs = read_documents(Path::new(input))?;
    if docs.is_empty() {
        bail!("no documents found under {input}");
    }
    tracing::info!(documents = docs.len(), "read input documents");

    let embedder = HttpEmbedder::new(&cfg.embedding_url, cfg.request_timeout())?;
    let mut dense = Vec::with_capacity(docs.len());
    for doc in &docs {
        let vector = embedder
            .embed(&doc.content)
            .await
            .with_context(|| format!("embedding document {}", doc.id))?;
        dense.push(vector);
    }
    let dimension = dense.first().map(|v| v.len() as u64);

    let store = open_store(cfg, dimension).await?;
    let contents: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
    let corpus = CorpusIndex::new(cfg.bm25);
    corpus.rebuild(store.as_ref(), &contents).await?;
    let info = corpus.info();
    tracing::info!(
        corpus_size = info.corpus_size,
        new = docs.len(),
        vocabulary_size = info.vocabulary_size,
        "rebuilt BM25 statistics for ingestion"
    );

    let now = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .ok();
    let mut points = Vec::with_capacity(docs.len());
    for (doc, dense) in docs.into_iter().zip(dense) {
        let length = corpus.tokens(&doc.content).len();
        let sparse = corpus.encode_with_length(&doc.content, length);
        let id = doc.point_id();
        points.push(Point { id, dense, sparse: Some(sparse), payload: doc.into_payload(&now) });
    }

    let total = points.len();
    let mut batches = points.into_iter().peekable();
    while batches.peek().is_some() {
        let batch: Vec<Point> = batches.by_ref().take(UPSERT_BATCH).collect();
        store.upsert(batch).await?;
    }

    tracing::info!(total, "ingestion complete");
    Ok(())
}

async fn search(cfg: &EngineConfig, request: &SearchRequest) -> Result<()> {
    let embedder = Arc::new(HttpEmbedder::new(&cfg.embedding_url, cfg.request_timeout())?);
    let store = open_store(cfg, None).await?;
    let searcher = HybridSearcher::new(embedder, store, Arc::new(CorpusIndex::new(cfg.bm25)))
        .with_timeout(cfg.request_timeout());

    let outcome = searcher.search(request).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn stats(cfg: &EngineConfig) -> Result<()> {
    let store = open_store(cfg, None).await?;
    let corpus = CorpusIndex::new(cfg.bm25);
    corpus.ensure_initialized(store.as_ref()).await?;
    println!("{}", serde_json::to_string_pretty(&corpus.info())?);
    Ok(())
}

async fn encode(cfg: &EngineConfig, text: &str, doc_length: Option<usize>) -> Result<()> {
    let store = open_store(cfg, None).await?;
    let corpus = CorpusIndex::new(cfg.bm25);
    corpus.ensure_initialized(store.as_ref()).await?;

    let sparse = match doc_length {
        Some(length) => corpus.encode_with_length(text, length),
        None => corpus.encode_query(text),
    };
    let info = corpus.info();
    let report = EncodeReport {
        tokens: corpus.tokens(text),
        terms: sparse.indices().into_iter().filter_map(|id| corpus.term(id)).collect(),
        indices: sparse.indices(),
        values: sparse.values(),
        stats_ready: info.stats_ready,
        vocabulary_size: info.vocabulary_size,
        vocabulary_sample: corpus.vocabulary_sample(10),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn delete(cfg: &EngineConfig, ids: Vec<String>) -> Result<()> {
    let store = open_store(cfg, None).await?;
    let ids: Vec<PointId> = ids.into_iter().map(PointId::from).collect();
    let removed = store.delete(&ids).await?;
    tracing::info!(requested = ids.len(), removed, "deleted points");
    Ok(())
}

async fn open_store(cfg: &EngineConfig, dimension: Option<u64>) -> Result<Arc<dyn VectorStore>> {
    if let Some(store) = remote_store(cfg, dimension).await? {
        return Ok(store);
    }
    let store = SledStore::open(&cfg.store_path)?.with_fusion(RrfFusion::new(cfg.rrf_k));
    tracing::debug!(path = %cfg.store_path.display(), points = store.len(), "opened local store");
    Ok(Arc::new(store))
}

#[cfg(feature = "qdrant")]
async fn remote_store(cfg: &EngineConfig, dimension: Option<u64>) -> Result<Option<Arc<dyn VectorStore>>> {
    let Some(url) = cfg.qdrant_url.as_deref() else {
        return Ok(None);
    };
    let store = retrieval_core::QdrantStore::connect(
        url,
        cfg.qdrant_api_key.clone(),
        cfg.collection.clone(),
        cfg.request_timeout(),
    )?;
    if let Some(dimension) = dimension {
        store.ensure_collection(dimension).await?;
    }
    Ok(Some(Arc::new(store)))
}

#[cfg(not(feature = "qdrant"))]
async fn remote_store(cfg: &EngineConfig, _dimension: Option<u64>) -> Result<Option<Arc<dyn VectorStore>>> {
    if cfg.qdrant_url.is_some() {
        tracing::warn!("QDRANT_URL is set but the qdrant feature is disabled, using the local store");
    }
    Ok(None)
}

fn read_documents(input_path: &Path) -> Result<Vec<InputDoc>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
        files.sort();
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    } else {
        bail!("input path {} does not exist", input_path.display());
    }

    let mut docs = Vec::new();
    for file in files {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file, &mut docs)?;
        } else {
            read_json(&file, &mut docs)?;
        }
    }
    Ok(docs)
}

fn read_jsonl(file: &Path, docs: &mut Vec<InputDoc>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: InputDoc =
            serde_json::from_str(&line).with_context(|| format!("{}:{}", file.display(), n + 1))?;
        docs.push(doc);
    }
    Ok(())
}

fn read_json(file: &Path, docs: &mut Vec<InputDoc>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    match json {
        serde_json::Value::Array(arr) => {
            for v in arr {
                docs.push(serde_json::from_value(v).with_context(|| file.display().to_string())?);
            }
        }
        serde_json::Value::Object(_) => {
            docs.push(serde_json::from_value(json).with_context(|| file.display().to_string())?);
        }
        _ => tracing::warn!(file = %file.display(), "skipping JSON that is neither an object nor an array"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_json_and_jsonl_with_content_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let mut jsonl = File::create(dir.path().join("a.jsonl")).unwrap();
        writeln!(jsonl, r#"{{"id": 1, "content": "the cat sat", "subject": "math"}}"#).unwrap();
        writeln!(jsonl).unwrap();
        writeln!(jsonl, r#"{{"id": "2", "text": "the dog ran"}}"#).unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"[{"id": "a1b2c3d4-0000-0000-0000-000000000000", "body": "quantum physics", "week": "3"}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "not a document").unwrap();

        let docs = read_documents(dir.path()).unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].point_id(), PointId::Num(1));
        assert_eq!(docs[1].point_id(), PointId::Num(2));
        assert_eq!(docs[1].content, "the dog ran");
        assert!(matches!(docs[2].point_id(), PointId::Uuid(_)));
        assert_eq!(docs[2].week.as_deref(), Some("3"));
    }

    #[test]
    fn payload_keeps_given_timestamp() {
        let doc: InputDoc =
            serde_json::from_str(r#"{"id": 7, "content": "x", "timestamp": "2024-01-01T00:00:00Z"}"#).unwrap();
        let payload = doc.into_payload(&Some("now".to_string()));
        assert_eq!(payload.timestamp.as_deref(), Some("2024-01-01T00:00:00Z"));

        let doc: InputDoc = serde_json::from_str(r#"{"id": 8, "content": "y"}"#).unwrap();
        assert_eq!(doc.into_payload(&Some("now".to_string())).timestamp.as_deref(), Some("now"));
    }

    #[test]
    fn missing_input_is_an_error() {
        assert!(read_documents(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn cli_parses_search_flags() {
        let cli = Cli::try_parse_from([
            "indexer", "--store-path", "/tmp/s", "search", "--query", "cat", "--limit", "3", "--subject", "math",
        ])
        .unwrap();
        assert_eq!(cli.settings.store_path, Some(PathBuf::from("/tmp/s")));
        match cli.command {
            Commands::Search { query, limit, subject, .. } => {
                assert_eq!(query, "cat");
                assert_eq!(limit, 3);
                assert_eq!(subject.as_deref(), Some("math"));
            }
            _ => panic!("expected search"),
        }
    }
}
