//! In-process shared store.

use std::io;
use std::sync::Arc;

use dashmap::DashMap;

use super::KeyValueStore;

/// A key-value store shared between every clone of the handle.
///
/// Instances in the same process that hold clones of one `MemoryStore` see
/// each other's writes immediately.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys present.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn write(&self, key: &str, value: &str) -> io::Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
