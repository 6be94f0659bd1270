//! Path-keyed byte storage for file artifacts.

use dashmap::DashMap;

/// In-memory blob store. Paths are opaque keys; no hierarchy is enforced.
#[derive(Debug, Default)]
pub struct BlobStore {
    files: DashMap<String, Vec<u8>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.files.insert(path.to_string(), content.into());
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).map(|entry| entry.value().clone())
    }

    pub fn delete(&self, path: &str) -> bool {
        self.files.remove(path).is_some()
    }

    /// All stored paths starting with `prefix`, sorted.
    pub fn list(&self, prefix: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .files
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        paths.sort();
        paths
    }
}
