use std::collections::HashMap;
use std::hash::Hash;

use chrono::Utc;

/// Accumulator contract for values kept in [`IndexedTtlCache`]. The
/// implementation decides which fields add up and which keep their
/// first-seen value.
pub trait Merge {
    fn merge(&mut self, other: Self);
}

#[derive(Debug)]
struct Entry<V> {
    inserted_at: i64,
    data: V,
}

/// Keyed store that folds repeated inserts into one accumulator per key and
/// releases entries once their age passes the ttl. The first insert's
/// timestamp is kept across merges, so age counts from first sight.
///
/// Exclusive access goes through `&mut self`; every worker owns its cache
/// instance outright instead of sharing one behind a lock.
#[derive(Debug)]
pub struct IndexedTtlCache<K, V> {
    ttl: i64,
    entries: HashMap<K, Entry<V>>,
}

impl<K, V> IndexedTtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Merge,
{
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl: ttl_seconds as i64,
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Utc::now().timestamp());
    }

    pub fn insert_at(&mut self, key: K, value: V, now: i64) {
        match self.entries.get_mut(&key) {
            Some(entry) => entry.data.merge(value),
            None => {
                self.entries.insert(
                    key,
                    Entry {
                        inserted_at: now,
                        data: value,
                    },
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns every accumulator older than the ttl, keeping the
    /// rest for a later sweep.
    pub fn drain_expired(&mut self) -> Vec<V> {
        self.drain_expired_at(Utc::now().timestamp())
    }

    pub fn drain_expired_at(&mut self, now: i64) -> Vec<V> {
        let expired_keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| now - entry.inserted_at > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();

        expired_keys
            .into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .map(|entry| entry.data)
            .collect()
    }
}
