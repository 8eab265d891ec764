//! BM25 sparse encoder.
//!
//! Statistics are computed once over a document snapshot and then used to
//! weight the terms of any text (queries or documents) into a
//! [`SparseVector`] addressed by stable vocabulary indices.

use crate::error::EncoderError;
use crate::tokenizer::tokenize;
use crate::types::{SparseVector, TermId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// How inverse document frequency is derived from `N` and `df`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdfMode {
    /// `ln(1 + (N - df + 0.5) / (df + 0.5))`, always positive.
    #[default]
    Smoothed,
    /// `ln((N - df + 0.5) / (df + 0.5))`, zero or negative for terms in half the corpus or more.
    Okapi,
}

impl IdfMode {
    pub fn idf(self, corpus_size: usize, df: u32) -> f64 {
        let n = corpus_size as f64;
        let df = df as f64;
        let ratio = (n - df + 0.5) / (df + 0.5);
        match self {
            IdfMode::Smoothed => (1.0 + ratio).ln(),
            IdfMode::Okapi => ratio.ln(),
        }
    }
}

impl std::str::FromStr for IdfMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smoothed" => Ok(IdfMode::Smoothed),
            "okapi" => Ok(IdfMode::Okapi),
            other => Err(format!("unknown idf mode {other:?} (expected smoothed or okapi)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length-normalization strength.
    pub b: f64,
    pub idf: IdfMode,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75, idf: IdfMode::default() }
    }
}

/// Insertion-ordered term → index map. Indices are never reassigned.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    index: HashMap<String, TermId>,
    terms: Vec<String>,
}

impl Vocabulary {
    pub fn get(&self, term: &str) -> Option<TermId> {
        self.index.get(term).copied()
    }

    pub fn term(&self, id: TermId) -> Option<&str> {
        self.terms.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Terms in index order.
    pub fn terms(&self) -> impl Iterator<Item = &str> + '_ {
        self.terms.iter().map(String::as_str)
    }

    fn assign(&mut self, term: &str) -> Result<TermId, EncoderError> {
        if let Some(id) = self.get(term) {
            return Ok(id);
        }
        let id = TermId::try_from(self.terms.len())
            .map_err(|_| EncoderError::VocabularyFull(term.to_string()))?;
        self.index.insert(term.to_string(), id);
        self.terms.push(term.to_string());
        Ok(id)
    }
}

/// Aggregate counts over one corpus snapshot.
#[derive(Debug, Clone, Default)]
pub struct CorpusStatistics {
    corpus_size: usize,
    doc_freqs: HashMap<String, u32>,
    idf: HashMap<String, f64>,
    average_length: f64,
    ready: bool,
}

impl CorpusStatistics {
    pub fn corpus_size(&self) -> usize {
        self.corpus_size
    }

    pub fn doc_freq(&self, term: &str) -> Option<u32> {
        self.doc_freqs.get(term).copied()
    }

    /// IDF of `term`; only meaningful while the statistics are ready.
    pub fn idf(&self, term: &str) -> Option<f64> {
        if !self.ready {
            return None;
        }
        self.idf.get(term).copied()
    }

    pub fn average_length(&self) -> f64 {
        self.average_length
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

/// Diagnostics snapshot of an encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusInfo {
    pub corpus_size: usize,
    pub vocabulary_size: usize,
    pub average_doc_length: f64,
    pub stats_ready: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SparseEncoder {
    params: Bm25Params,
    vocabulary: Vocabulary,
    stats: CorpusStatistics,
}

impl SparseEncoder {
    pub fn new(params: Bm25Params) -> Self {
        Self { params, vocabulary: Vocabulary::default(), stats: CorpusStatistics::default() }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn statistics(&self) -> &CorpusStatistics {
        &self.stats
    }

    pub fn is_ready(&self) -> bool {
        self.stats.ready
    }

    pub fn info(&self) -> CorpusInfo {
        CorpusInfo {
            corpus_size: self.stats.corpus_size,
            vocabulary_size: self.vocabulary.len(),
            average_doc_length: self.stats.average_length,
            stats_ready: self.stats.ready,
        }
    }

    /// Appends `terms` to the vocabulary in order, skipping known ones.
    ///
    /// Used to restore a persisted term order before statistics are built.
    /// Returns how many terms did not land at their position in `terms`,
    /// which is non-zero only when the vocabulary already diverged.
    pub fn extend_vocabulary<S: AsRef<str>>(&mut self, terms: &[S]) -> Result<usize, EncoderError> {
        let mut vocabulary = self.vocabulary.clone();
        let mut misplaced = 0;
        for (position, term) in terms.iter().enumerate() {
            let term = term.as_ref();
            let id = vocabulary.assign(term)?;
            if id as usize != position {
                misplaced += 1;
            }
        }
        self.vocabulary = vocabulary;
        Ok(misplaced)
    }

    /// Replaces the corpus statistics with ones computed over `documents`.
    ///
    /// New terms are appended to the vocabulary; existing indices are kept.
    /// An empty corpus leaves the encoder not ready. On error the previous
    /// statistics and vocabulary are left untouched.
    pub fn build_statistics<I, S>(&mut self, documents: I) -> Result<(), EncoderError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut corpus_size = 0usize;
        let mut total_length = 0usize;
        let mut doc_freqs: HashMap<String, u32> = HashMap::new();
        let mut first_seen: Vec<String> = Vec::new();

        for document in documents {
            corpus_size += 1;
            let mut seen_in_doc: HashSet<String> = HashSet::new();
            for token in tokenize(document.as_ref()) {
                total_length += 1;
                if !seen_in_doc.insert(token.clone()) {
                    continue;
                }
                match doc_freqs.get_mut(&token) {
                    Some(df) => *df += 1,
                    None => {
                        doc_freqs.insert(token.clone(), 1);
                        first_seen.push(token);
                    }
                }
            }
        }

        if corpus_size == 0 {
            tracing::warn!("BM25 statistics requested over an empty corpus");
            self.stats = CorpusStatistics::default();
            return Ok(());
        }

        let mut vocabulary = self.vocabulary.clone();
        let mut idf = HashMap::with_capacity(first_seen.len());
        for term in &first_seen {
            vocabulary.assign(term)?;
            let df = doc_freqs[term];
            idf.insert(term.clone(), self.params.idf.idf(corpus_size, df));
        }

        let average_length = total_length as f64 / corpus_size as f64;
        self.vocabulary = vocabulary;
        self.stats = CorpusStatistics { corpus_size, doc_freqs, idf, average_length, ready: true };

        tracing::info!(
            corpus_size,
            vocabulary_size = self.vocabulary.len(),
            average_length,
            "BM25 corpus statistics built"
        );
        Ok(())
    }

    /// BM25-weights the terms of `text`.
    ///
    /// `doc_length` overrides the length used for normalization; it defaults
    /// to the token count of `text`. Returns an empty vector while the
    /// statistics are not ready. Out-of-vocabulary terms are skipped.
    pub fn encode(&self, text: &str, doc_length: Option<usize>) -> SparseVector {
        let mut vector = SparseVector::new();
        if !self.stats.ready {
            tracing::debug!("BM25 statistics not ready, returning empty sparse vector");
            return vector;
        }

        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        let mut token_count = 0usize;
        for token in tokenize(text) {
            token_count += 1;
            *term_freqs.entry(token).or_insert(0) += 1;
        }

        let Bm25Params { k1, b, .. } = self.params;
        let doc_len = doc_length.unwrap_or(token_count) as f64;
        let length_ratio = if self.stats.average_length > 0.0 {
            doc_len / self.stats.average_length
        } else {
            1.0
        };
        let norm = k1 * (1.0 - b + b * length_ratio);

        for (term, tf) in term_freqs {
            let (Some(index), Some(idf)) = (self.vocabulary.get(&term), self.stats.idf.get(&term)) else {
                continue;
            };
            let tf = tf as f64;
            let score = idf * tf * (k1 + 1.0) / (tf + norm);
            if score > 0.0 {
                vector.insert(index, score as f32);
            }
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_encoder_returns_empty_vector() {
        let encoder = SparseEncoder::default();
        assert!(encoder.encode("anything at all", None).is_empty());
        assert!(!encoder.is_ready());
    }

    #[test]
    fn empty_corpus_is_not_ready() {
        let mut encoder = SparseEncoder::default();
        encoder.build_statistics(Vec::<String>::new()).unwrap();
        assert!(!encoder.is_ready());
        assert_eq!(encoder.statistics().corpus_size(), 0);
        assert_eq!(encoder.statistics().average_length(), 0.0);
    }

    #[test]
    fn rebuild_keeps_existing_indices_and_replaces_stats() {
        let mut encoder = SparseEncoder::default();
        encoder.build_statistics(["alpha beta", "beta gamma"]).unwrap();
        let beta = encoder.vocabulary().get("beta").unwrap();

        encoder.build_statistics(["delta beta"]).unwrap();
        assert_eq!(encoder.vocabulary().get("beta"), Some(beta));
        assert_eq!(encoder.vocabulary().get("delta"), Some(3));
        assert_eq!(encoder.statistics().corpus_size(), 1);
        // "alpha" is still indexed but no longer has statistics.
        assert!(encoder.vocabulary().get("alpha").is_some());
        assert!(encoder.statistics().idf("alpha").is_none());
        assert!(encoder.encode("alpha", None).is_empty());
    }

    #[test]
    fn vocabulary_is_first_seen_ordered() {
        let mut encoder = SparseEncoder::default();
        encoder.build_statistics(["zeta alpha zeta", "mu alpha"]).unwrap();
        let terms: Vec<&str> = encoder.vocabulary().terms().collect();
        assert_eq!(terms, vec!["zeta", "alpha", "mu"]);
    }

    #[test]
    fn all_empty_documents_do_not_divide_by_zero() {
        let mut encoder = SparseEncoder::default();
        encoder.build_statistics(["", "  ..  "]).unwrap();
        assert!(encoder.is_ready());
        assert_eq!(encoder.statistics().average_length(), 0.0);
        assert!(encoder.encode("unseen", Some(10)).is_empty());
    }

    #[test]
    fn okapi_idf_drops_common_terms() {
        let mut encoder = SparseEncoder::new(Bm25Params { idf: IdfMode::Okapi, ..Bm25Params::default() });
        encoder.build_statistics(["the cat", "the dog", "the fish"]).unwrap();
        let v = encoder.encode("the cat", None);
        let the = encoder.vocabulary().get("the").unwrap();
        let cat = encoder.vocabulary().get("cat").unwrap();
        assert!(v.get(the).is_none());
        assert!(v.get(cat).unwrap() > 0.0);
    }

    #[test]
    fn persisted_terms_keep_their_positions() {
        let mut encoder = SparseEncoder::default();
        assert_eq!(encoder.extend_vocabulary(&["zeta", "alpha"]).unwrap(), 0);
        encoder.build_statistics(["alpha beta"]).unwrap();
        assert_eq!(encoder.vocabulary().get("zeta"), Some(0));
        assert_eq!(encoder.vocabulary().get("alpha"), Some(1));
        assert_eq!(encoder.vocabulary().get("beta"), Some(2));
        assert_eq!(encoder.vocabulary().term(2), Some("beta"));
        // zeta has no statistics in this snapshot
        assert!(encoder.encode("zeta", None).is_empty());
    }

    #[test]
    fn diverged_vocabulary_is_reported_not_renumbered() {
        let mut encoder = SparseEncoder::default();
        encoder.build_statistics(["beta alpha"]).unwrap();
        assert_eq!(encoder.extend_vocabulary(&["alpha", "beta", "gamma"]).unwrap(), 2);
        assert_eq!(encoder.vocabulary().get("beta"), Some(0));
        assert_eq!(encoder.vocabulary().get("gamma"), Some(2));
    }

    #[test]
    fn parses_idf_mode() {
        assert_eq!("Okapi".parse::<IdfMode>().unwrap(), IdfMode::Okapi);
        assert!("bogus".parse::<IdfMode>().is_err());
    }
}
