//! Similarity index over bag-of-words vectors.
//!
//! Vectors are L2-normalised at indexing time, so cosine similarity reduces
//! to a dot product. Search is a linear scan; the index is volatile.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").expect("static regex"));

/// Lower-case `text` and split it into word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    WORD.find_iter(&lowered).map(|m| m.as_str().to_string()).collect()
}

/// Sparse term-frequency vector keyed by token.
pub type TermVector = HashMap<String, f32>;

/// Build an L2-normalised term-frequency vector for `text`.
pub fn vectorize(text: &str) -> TermVector {
    let mut counts = TermVector::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }

    let norm = counts.values().map(|v| v * v).sum::<f32>().sqrt();
    let norm = if norm == 0.0 { 1.0 } else { norm };
    for value in counts.values_mut() {
        *value /= norm;
    }
    counts
}

fn dot(a: &TermVector, b: &TermVector) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, weight)| large.get(term).map(|other| weight * other))
        .sum()
}

/// A scored search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Contract for text similarity indexes.
///
/// A learned-embedding index can replace [`BagOfWordsIndex`] as long as it
/// keeps these semantics: `upsert` replaces by id, `search` returns at most
/// `top_k` hits by descending score, `delete` reports prior existence.
pub trait SimilarityIndex: Send + Sync + std::fmt::Debug {
    fn upsert(&self, id: &str, text: &str, metadata: HashMap<String, serde_json::Value>);
    fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit>;
    fn delete(&self, id: &str) -> bool;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct IndexedDocument {
    id: String,
    text: String,
    vector: TermVector,
    metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default)]
struct IndexState {
    next_seq: u64,
    // Insertion sequence -> document; iteration order is the tie-break.
    documents: BTreeMap<u64, IndexedDocument>,
    positions: HashMap<String, u64>,
}

/// Default in-memory [`SimilarityIndex`].
///
/// Equal scores are ordered by first insertion of the document id; replacing
/// a document keeps its original position.
#[derive(Debug, Default)]
pub struct BagOfWordsIndex {
    state: RwLock<IndexState>,
}

impl BagOfWordsIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SimilarityIndex for BagOfWordsIndex {
    #[instrument(skip(self, text, metadata))]
    fn upsert(&self, id: &str, text: &str, metadata: HashMap<String, serde_json::Value>) {
        let document = IndexedDocument {
            id: id.to_string(),
            text: text.to_string(),
            vector: vectorize(text),
            metadata,
        };

        let mut state = self.state.write();
        let existing = state.positions.get(id).copied();
        let seq = match existing {
            Some(seq) => seq,
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.positions.insert(id.to_string(), seq);
                seq
            }
        };
        state.documents.insert(seq, document);
        debug!("Indexed document {}, total documents: {}", id, state.documents.len());
    }

    fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let query_vector = vectorize(query);
        let state = self.state.read();

        let mut scored: Vec<(f32, &IndexedDocument)> = state
            .documents
            .values()
            .map(|doc| (dot(&query_vector, &doc.vector), doc))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(top_k)
            .map(|(score, doc)| SearchHit {
                id: doc.id.clone(),
                text: doc.text.clone(),
                score,
                metadata: doc.metadata.clone(),
            })
            .collect()
    }

    fn delete(&self, id: &str) -> bool {
        let mut state = self.state.write();
        match state.positions.remove(id) {
            Some(seq) => state.documents.remove(&seq).is_some(),
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.state.read().documents.len()
    }
}
