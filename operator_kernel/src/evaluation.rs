//! Continuous per-agent evaluation on three heuristics.
//!
//! * `hallucination_frequency` - share of sentences with uncertainty markers
//!   (lower is better)
//! * `context_relevance` - Jaccard overlap of prompt and response words
//! * `correctness` - ground-truth label when the caller has one

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::storage::tokenize;

/// Phrases that suggest speculative or uncertain language.
pub const UNCERTAINTY_MARKERS: &[&str] = &[
    "maybe",
    "perhaps",
    "possibly",
    "might",
    "could",
    "unsure",
    "unclear",
    "probably",
    "apparently",
    "seemingly",
    "i think",
    "i believe",
    "not sure",
    "hallucinate",
    "fabricate",
    "made up",
    "uncertain",
];

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub hallucination_frequency: f64,
    pub context_relevance: f64,
    /// `None` when no ground truth was supplied.
    pub correctness: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    pub scores: Scores,
}

/// Mean of every recorded, non-null value per metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub hallucination_frequency: Option<f64>,
    pub context_relevance: Option<f64>,
    pub correctness: Option<f64>,
}

/// Fraction of sentence fragments containing an uncertainty marker.
///
/// Every fragment of the split counts, including the empty one after a
/// trailing terminator, so `"Maybe."` scores 0.5.
pub fn hallucination_frequency(response: &str) -> f64 {
    let lowered = response.to_lowercase();
    let (total, uncertain) = SENTENCE_END
        .split(&lowered)
        .fold((0usize, 0usize), |(total, uncertain), sentence| {
            let flagged = UNCERTAINTY_MARKERS.iter().any(|marker| sentence.contains(marker));
            (total + 1, uncertain + usize::from(flagged))
        });
    if total == 0 {
        return 0.0;
    }
    uncertain as f64 / total as f64
}

/// Jaccard similarity of the word sets of `prompt` and `response`.
pub fn context_relevance(prompt: &str, response: &str) -> f64 {
    let prompt_words: HashSet<String> = tokenize(prompt).into_iter().collect();
    let response_words: HashSet<String> = tokenize(response).into_iter().collect();

    match (prompt_words.is_empty(), response_words.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let shared = prompt_words.intersection(&response_words).count();
            let union = prompt_words.union(&response_words).count();
            shared as f64 / union as f64
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Scores agent turns and keeps running aggregates.
#[derive(Debug, Default)]
pub struct EvaluationEngine {
    records: RwLock<BTreeMap<String, Vec<EvaluationRecord>>>,
}

impl EvaluationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score one response and append the record.
    pub fn evaluate(
        &self,
        agent: &str,
        prompt: &str,
        response: &str,
        correct: Option<bool>,
    ) -> EvaluationRecord {
        let scores = Scores {
            hallucination_frequency: hallucination_frequency(response),
            context_relevance: context_relevance(prompt, response),
            correctness: correct.map(|c| if c { 1.0 } else { 0.0 }),
        };
        let record = EvaluationRecord {
            agent: agent.to_string(),
            timestamp: Utc::now(),
            scores,
        };

        self.records
            .write()
            .entry(agent.to_string())
            .or_default()
            .push(record.clone());
        debug!("Evaluated turn for {}: {:?}", agent, scores);
        record
    }

    pub fn records(&self, agent: &str) -> Vec<EvaluationRecord> {
        self.records.read().get(agent).cloned().unwrap_or_default()
    }

    /// Averages for one agent; every metric is `None` without records.
    pub fn aggregate(&self, agent: &str) -> Aggregate {
        let records = self.records.read();
        records.get(agent).map(|r| aggregate_of(r)).unwrap_or_default()
    }

    /// Aggregates for every agent with at least one record.
    pub fn report(&self) -> BTreeMap<String, Aggregate> {
        self.records
            .read()
            .iter()
            .map(|(agent, records)| (agent.clone(), aggregate_of(records)))
            .collect()
    }
}

fn aggregate_of(records: &[EvaluationRecord]) -> Aggregate {
    Aggregate {
        hallucination_frequency: mean(records.iter().map(|r| r.scores.hallucination_frequency)),
        context_relevance: mean(records.iter().map(|r| r.scores.context_relevance)),
        correctness: mean(records.iter().filter_map(|r| r.scores.correctness)),
    }
}
