use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use anyhow::Result;
use serde_json::Value;

/// Key/value store for the offline event buffer (the page's `localStorage`).
pub trait LocalStore: Send + Sync {
    /// Append `entry` to the list under `key`, evicting the oldest entries past `cap`.
    fn append(&self, key: &str, entry: Value, cap: usize) -> Result<()>;

    fn set_scalar(&self, key: &str, value: Value) -> Result<()>;
}

/// Append-then-trim shared by every store implementation.
pub(crate) fn push_capped(list: &mut Vec<Value>, entry: Value, cap: usize) {
    list.push(entry);
    if list.len() > cap {
        let excess = list.len() - cap;
        list.drain(..excess);
    }
}

/// Process-local store; contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, Vec<Value>>>,
    scalars: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self, key: &str) -> Vec<Value> {
        let lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        lists.get(key).cloned().unwrap_or_default()
    }

    pub fn scalar(&self, key: &str) -> Option<Value> {
        let scalars = self.scalars.lock().unwrap_or_else(PoisonError::into_inner);
        scalars.get(key).cloned()
    }
}

impl LocalStore for MemoryStore {
    fn append(&self, key: &str, entry: Value, cap: usize) -> Result<()> {
        let mut lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        push_capped(lists.entry(key.to_string()).or_default(), entry, cap);
        Ok(())
    }

    fn set_scalar(&self, key: &str, value: Value) -> Result<()> {
        let mut scalars = self.scalars.lock().unwrap_or_else(PoisonError::into_inner);
        scalars.insert(key.to_string(), value);
        Ok(())
    }
}
