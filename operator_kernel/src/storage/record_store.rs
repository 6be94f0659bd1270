//! Keyed record storage: tables of JSON records addressed by `(table, id)`.

use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// In-process table store.
///
/// Each table lives in its own shard entry, so writers to one table never
/// block readers of another. Queries are linear scans; there are no
/// secondary indexes.
#[derive(Debug, Default)]
pub struct RecordStore {
    tables: DashMap<String, HashMap<String, Value>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn insert(&self, table: &str, id: &str, record: Value) {
        debug!("Inserting record {}/{}", table, id);
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), record);
    }

    /// Retrieve a record by id.
    pub fn get(&self, table: &str, id: &str) -> Option<Value> {
        self.tables.get(table)?.get(id).cloned()
    }

    /// Return every record in `table` whose fields equal all `filters`.
    ///
    /// An empty filter map matches every record. Non-object records only
    /// match an empty filter.
    pub fn query(&self, table: &str, filters: &Map<String, Value>) -> Vec<Value> {
        let Some(records) = self.tables.get(table) else {
            return Vec::new();
        };

        records
            .values()
            .filter(|record| {
                filters
                    .iter()
                    .all(|(field, expected)| record.get(field) == Some(expected))
            })
            .cloned()
            .collect()
    }

    /// Delete a record; returns whether it existed.
    pub fn delete(&self, table: &str, id: &str) -> bool {
        self.tables
            .get_mut(table)
            .map(|mut records| records.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Number of records currently held in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map(|records| records.len()).unwrap_or(0)
    }
}
