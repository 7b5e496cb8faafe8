use super::Item;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

/// A basic in-memory read-through cache of items, keyed by table and key. Writes invalidate
/// previous reads, but otherwise entries never expire. Concurrent writers to the same key race;
/// the last one to touch the cache wins.
///
/// When disabled every method is a no-op and every lookup misses.
#[derive(Debug)]
pub struct ItemCache {
    enabled: AtomicBool,
    entries: Arc<Mutex<HashMap<String, Item>>>,
}

impl ItemCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            entries: Arc::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.clear();
        }
    }

    /// `table:JSON(key)`. `key` must hold only key attributes so equal keys map to equal entries.
    pub fn entry_key(table: &str, key: &Item) -> String {
        format!("{}:{}", table, Value::Object(key.clone()))
    }

    pub fn load(&self, table: &str, key: &Item) -> Option<Item> {
        if !self.is_enabled() {
            return None;
        }
        self.entries.lock().unwrap().get(&Self::entry_key(table, key)).cloned()
    }

    pub fn store(&self, table: &str, key: &Item, item: Item) {
        if !self.is_enabled() {
            return;
        }
        self.entries.lock().unwrap().insert(Self::entry_key(table, key), item);
    }

    pub fn invalidate(&self, table: &str, key: &Item) {
        if !self.is_enabled() {
            return;
        }
        self.entries.lock().unwrap().remove(&Self::entry_key(table, key));
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
