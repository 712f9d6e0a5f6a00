use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{KvGraphStore, KvStore, StoreError};

#[derive(Default)]
struct State {
    data: BTreeMap<String, Vec<u8>>,
    mutations: usize,
}

/// A key-value in-memory store.
///
/// Counts effective mutations, i.e. writes that changed a value and deletes
/// that removed one, so that callers can check that a repeated update is a no-op.
#[derive(Default)]
pub struct MemoryKvStore {
    state: Mutex<State>,
}

/// An iterator over a MemoryKvStore range
pub struct Iter(std::vec::IntoIter<(String, Vec<u8>)>);

impl Iterator for Iter {
    type Item = (String, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }
}

impl MemoryKvStore {
    /// Create a new MemoryKvStore
    pub fn new() -> KvGraphStore<Self> {
        KvGraphStore(Self::default())
    }

    /// Number of effective mutations so far
    pub fn mutation_count(&self) -> usize {
        self.lock().map(|state| state.mutations).unwrap_or(0)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.lock().map(|state| state.data.len()).unwrap_or(0)
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Unavailable("poisoned lock".to_string()))
    }
}

impl KvStore for MemoryKvStore {
    type Iter = Iter;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.data.get(key).map(|existing| existing.as_slice()) == Some(value) {
            return Ok(());
        }
        state.data.insert(key.to_string(), value.to_vec());
        state.mutations += 1;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.data.get(key).cloned())
    }

    fn get_prefix(&self, prefix: &str) -> Result<Self::Iter, StoreError> {
        let state = self.lock()?;
        let values: Vec<_> = state
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Iter(values.into_iter()))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.data.remove(key).is_some() {
            state.mutations += 1;
        }
        Ok(())
    }
}
