//! Reference-counted pinning cache shared by the page cache and the data
//! item cache.
//!
//! This is not an LRU. A slot is occupied while at least one caller holds a
//! pin on it, and the moment the last pin is dropped the value is handed to
//! the backend for write-back and the slot is freed. When every slot is
//! pinned, `get` fails with [`DatabaseError::CacheFull`] instead of waiting.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::types::error::DatabaseError;

/// Loads values on a miss and persists them when they are evicted.
pub trait CacheBackend<T>: Send + Sync {
    fn fetch(&self, key: u64) -> Result<T, DatabaseError>;
    fn write_back(&self, value: &T) -> Result<(), DatabaseError>;
}

struct Slot<T> {
    key: u64,
    value: Arc<T>,
    pins: usize,
}

struct CacheTable<T> {
    slots: Vec<Option<Slot<T>>>,
    free_slots: Vec<usize>,
    index: HashMap<u64, usize>,
    // keys being read from, or written back to, the backend
    loading: HashSet<u64>,
}

impl<T> CacheTable<T> {
    fn occupied(&self) -> usize {
        self.index.len() + self.loading.len()
    }

    fn place(&mut self, slot: Slot<T>) {
        let key = slot.key;
        let position = match self.free_slots.pop() {
            Some(position) => {
                self.slots[position] = Some(slot);
                position
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, position);
    }

    fn take(&mut self, key: u64) -> Option<Slot<T>> {
        let position = self.index.remove(&key)?;
        self.free_slots.push(position);
        self.slots[position].take()
    }
}

pub struct RefCountCache<T> {
    // 0 means unbounded
    capacity: usize,
    table: Mutex<CacheTable<T>>,
    loaded: Condvar,
}

impl<T> RefCountCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            table: Mutex::new(CacheTable {
                slots: Vec::with_capacity(capacity),
                free_slots: Vec::new(),
                index: HashMap::new(),
                loading: HashSet::new(),
            }),
            loaded: Condvar::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident values.
    pub fn len(&self) -> usize {
        self.table.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pins(&self, key: u64) -> usize {
        let table = self.table.lock();
        table
            .index
            .get(&key)
            .and_then(|&position| table.slots[position].as_ref())
            .map_or(0, |slot| slot.pins)
    }

    /// Pins `key`, loading it through `backend` on a miss.
    pub fn get<B>(&self, key: u64, backend: &B) -> Result<Arc<T>, DatabaseError>
    where
        B: CacheBackend<T> + ?Sized,
    {
        let mut table = self.table.lock();
        loop {
            if table.loading.contains(&key) {
                self.loaded.wait(&mut table);
                continue;
            }
            if let Some(&position) = table.index.get(&key) {
                if let Some(slot) = table.slots[position].as_mut() {
                    slot.pins += 1;
                    return Ok(Arc::clone(&slot.value));
                }
            }
            if self.capacity > 0 && table.occupied() >= self.capacity {
                return Err(DatabaseError::CacheFull);
            }
            table.loading.insert(key);
            break;
        }
        drop(table);

        let fetched = backend.fetch(key);

        let mut table = self.table.lock();
        table.loading.remove(&key);
        let result = fetched.map(|value| {
            let value = Arc::new(value);
            table.place(Slot {
                key,
                value: Arc::clone(&value),
                pins: 1,
            });
            value
        });
        drop(table);
        self.loaded.notify_all();
        if result.is_ok() {
            debug!(key, "cache loaded");
        }
        result
    }

    /// Drops one pin on `key`. The last pin writes the value back and
    /// evicts it.
    pub fn release<B>(&self, key: u64, backend: &B) -> Result<(), DatabaseError>
    where
        B: CacheBackend<T> + ?Sized,
    {
        let mut table = self.table.lock();
        let Some(&position) = table.index.get(&key) else {
            return Ok(());
        };
        let Some(slot) = table.slots[position].as_mut() else {
            return Ok(());
        };
        slot.pins = slot.pins.saturating_sub(1);
        if slot.pins > 0 {
            return Ok(());
        }
        let Some(slot) = table.take(key) else {
            return Ok(());
        };
        table.loading.insert(key);
        drop(table);

        let written = backend.write_back(&slot.value);

        self.table.lock().loading.remove(&key);
        self.loaded.notify_all();
        debug!(key, "cache evicted");
        written
    }

    /// Writes back and evicts every resident value regardless of pins.
    pub fn close<B>(&self, backend: &B) -> Result<(), DatabaseError>
    where
        B: CacheBackend<T> + ?Sized,
    {
        let drained: Vec<Slot<T>> = {
            let mut table = self.table.lock();
            let keys: Vec<u64> = table.index.keys().copied().collect();
            keys.into_iter().filter_map(|key| table.take(key)).collect()
        };
        for slot in &drained {
            backend.write_back(&slot.value)?;
        }
        Ok(())
    }
}
