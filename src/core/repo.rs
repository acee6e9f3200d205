use std::borrow::Borrow;
use std::hash::Hash;

use hashbrown::HashMap;

use super::record::Record;

/// Unordered identifier-to-record map with merge-on-upsert.
#[derive(Debug, Clone)]
pub struct FlatRepository<V: Record> {
    records: HashMap<V::Id, V>,
}

impl<V: Record> Default for FlatRepository<V> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<V: Record> FlatRepository<V> {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges into an existing record or inserts. Returns true when inserted.
    pub fn upsert(&mut self, value: V) -> bool {
        let id = value.record_id();
        match self.records.get_mut(&id) {
            Some(existing) => {
                existing.merge(value);
                false
            }
            None => {
                self.records.insert(id, value);
                true
            }
        }
    }

    /// Inserts only when `id` is unknown. Returns true when inserted.
    pub fn insert_if_absent(&mut self, value: V) -> bool {
        let id = value.record_id();
        if self.records.contains_key(&id) {
            return false;
        }
        self.records.insert(id, value);
        true
    }

    /// Mutates the record `id` in place. Returns false if absent.
    pub fn update<Q, F>(&mut self, id: &Q, f: F) -> bool
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&mut V),
    {
        match self.records.get_mut(id) {
            Some(v) => {
                f(v);
                true
            }
            None => false,
        }
    }

    /// Record with identifier `id`.
    pub fn get<Q>(&self, id: &Q) -> Option<&V>
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.records.get(id)
    }

    /// True when a record with identifier `id` is stored.
    pub fn contains<Q>(&self, id: &Q) -> bool
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.records.contains_key(id)
    }

    /// Removes and returns the record `id`.
    pub fn delete<Q>(&mut self, id: &Q) -> Option<V>
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.records.remove(id)
    }

    /// Keeps only records matching `keep`; returns the removed identifiers.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<V::Id>
    where
        F: FnMut(&V) -> bool,
    {
        let mut removed = Vec::new();
        self.records.retain(|id, v| {
            let k = keep(v);
            if !k {
                removed.push(id.clone());
            }
            k
        });
        removed
    }

    /// All records, in no particular order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.records.values()
    }

    /// All identifiers, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &V::Id> {
        self.records.keys()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Removes every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
