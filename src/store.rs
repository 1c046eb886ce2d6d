use crate::errors::{AppError, AppResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const STATE_KEY: &str = "state";

/// Key/value substrate the dashboard persists into.
///
/// Implementations report failures, but callers in the persistence path treat
/// any error as "no data" and only log it.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<Value>>;
    fn set(&self, key: &str, value: &Value) -> AppResult<()>;
}

/// Reads a key, logging and swallowing storage failures.
pub fn get_or_none(store: &dyn KeyValueStore, key: &str) -> Option<Value> {
    match store.get(key) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(key = %key, error = %error, "storage read failed");
            None
        }
    }
}

/// Writes a key, logging and swallowing storage failures.
pub fn set_best_effort(store: &dyn KeyValueStore, key: &str, value: &Value) -> bool {
    match store.set(key, value) {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(key = %key, error = %error, "storage write failed");
            false
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every subsequent call fail until turned off again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Io("memory store unavailable".to_string()));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> AppResult<Option<Value>> {
        self.check_available()?;
        let entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("memory store mutex poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> AppResult<()> {
        self.check_available()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("memory store mutex poisoned".to_string()))?;
        entries.insert(key.to_string(), value.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_store_round_trips_and_counts_writes() {
        let store = MemoryStore::new();
        assert!(store.get(STATE_KEY).expect("get").is_none());
        store.set(STATE_KEY, &json!({"pages": []})).expect("set");
        assert_eq!(store.get(STATE_KEY).expect("get"), Some(json!({"pages": []})));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn failures_are_swallowed_by_helpers() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(get_or_none(&store, STATE_KEY).is_none());
        assert!(!set_best_effort(&store, STATE_KEY, &json!({})));
        assert_eq!(store.write_count(), 0);
    }
}
