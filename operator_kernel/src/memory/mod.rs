//! Two-tier memory: volatile session-scoped short-term memory and
//! long-term memory persisted in the data tier.
//!
//! Long-term records and similarity-index documents are independent. Writing
//! one never touches the other; callers that want both must do both.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::storage::{DataLayer, SearchHit};

/// Record-store table holding long-term memory.
pub const LONG_TERM_TABLE: &str = "long_term_memory";

/// A persisted long-term memory record, addressed by `namespace::key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermRecord {
    pub namespace: String,
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

/// Composite record id for a namespaced key.
pub fn long_term_id(namespace: &str, key: &str) -> String {
    format!("{}::{}", namespace, key)
}

/// Short-term and long-term memory over a shared [`DataLayer`].
#[derive(Debug)]
pub struct MemoryManager {
    data: Arc<DataLayer>,
    short_term: DashMap<String, HashMap<String, Value>>,
}

impl MemoryManager {
    pub fn new(data: Arc<DataLayer>) -> Self {
        Self {
            data,
            short_term: DashMap::new(),
        }
    }

    // --- short-term ---

    pub fn remember_short(&self, session_id: &str, key: &str, value: Value) {
        self.short_term
            .entry(session_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Value stored for `key` in the session, or `default` on a miss.
    pub fn recall_short(&self, session_id: &str, key: &str, default: Value) -> Value {
        self.short_term
            .get(session_id)
            .and_then(|entries| entries.get(key).cloned())
            .unwrap_or(default)
    }

    /// Drop every short-term entry of a session.
    pub fn forget_short(&self, session_id: &str) {
        self.short_term.remove(session_id);
    }

    // --- long-term ---

    /// Persist `value` under `namespace::key`, replacing any previous value.
    #[instrument(skip(self, value))]
    pub fn remember_long(&self, namespace: &str, key: &str, value: Value) {
        let record = LongTermRecord {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value,
            updated_at: Utc::now(),
        };

        match serde_json::to_value(&record) {
            Ok(json) => {
                self.data
                    .records
                    .insert(LONG_TERM_TABLE, &long_term_id(namespace, key), json)
            }
            // Serializing a struct of strings, a Value and a timestamp cannot fail.
            Err(e) => warn!("Failed to encode long-term record {}::{}: {}", namespace, key, e),
        }
    }

    /// Full long-term record, if present.
    pub fn long_term_record(&self, namespace: &str, key: &str) -> Option<LongTermRecord> {
        let json = self.data.records.get(LONG_TERM_TABLE, &long_term_id(namespace, key))?;
        serde_json::from_value(json)
            .map_err(|e| warn!("Corrupt long-term record {}::{}: {}", namespace, key, e))
            .ok()
    }

    /// Stored value for `namespace::key`, or `default` when absent.
    pub fn recall_long(&self, namespace: &str, key: &str, default: Value) -> Value {
        self.long_term_record(namespace, key)
            .map(|record| record.value)
            .unwrap_or(default)
    }

    /// Keys stored in a namespace, sorted.
    pub fn list_long(&self, namespace: &str) -> Vec<String> {
        let mut filters = Map::new();
        filters.insert("namespace".to_string(), Value::String(namespace.to_string()));

        let mut keys: Vec<String> = self
            .data
            .records
            .query(LONG_TERM_TABLE, &filters)
            .into_iter()
            .filter_map(|record| record.get("key").and_then(Value::as_str).map(str::to_string))
            .collect();
        keys.sort();
        keys
    }

    /// Remove a long-term record; returns whether it existed.
    pub fn forget_long(&self, namespace: &str, key: &str) -> bool {
        self.data.records.delete(LONG_TERM_TABLE, &long_term_id(namespace, key))
    }

    /// Add or replace a document in the similarity index.
    pub fn index_memory(&self, id: &str, text: &str, metadata: HashMap<String, Value>) {
        self.data.index.upsert(id, text, metadata);
    }

    /// Semantic search across every indexed document, regardless of namespace.
    #[instrument(skip(self))]
    pub fn search_long(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let hits = self.data.index.search(query, top_k);
        debug!("Memory search returned {} results", hits.len());
        hits
    }
}
