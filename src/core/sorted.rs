use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::hash::Hash;

use hashbrown::HashMap;

use super::record::Record;

#[derive(Debug, Clone)]
struct Entry<V, S> {
    value: V,
    key: S,
    seq: u64,
}

/// Keyed collection iterated in the order of a derived sort key.
///
/// `sort_key` plays the comparator role: entries iterate in ascending `S`
/// order. Entries with equal keys keep their first-insertion order, and every
/// mutation re-derives the key so iteration never goes stale.
#[derive(Debug, Clone)]
pub struct SortedKeyedCollection<V: Record, S: Ord + Clone> {
    sort_key: fn(&V) -> S,
    entries: HashMap<V::Id, Entry<V, S>>,
    order: BTreeMap<(S, u64), V::Id>,
    next_seq: u64,
}

impl<V: Record, S: Ord + Clone> SortedKeyedCollection<V, S> {
    /// Empty collection ordered by `sort_key`.
    pub fn new(sort_key: fn(&V) -> S) -> Self {
        Self {
            sort_key,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Inserts items whose identifier is not yet present; returns how many.
    pub fn insert_if_absent(&mut self, items: impl IntoIterator<Item = V>) -> usize {
        let mut inserted = 0;
        for item in items {
            let id = item.record_id();
            if !self.entries.contains_key(&id) {
                self.insert_new(id, item);
                inserted += 1;
            }
        }
        inserted
    }

    /// Inserts new items and merges existing ones, repositioning each.
    pub fn upsert(&mut self, items: impl IntoIterator<Item = V>) {
        for item in items {
            let id = item.record_id();
            if self.entries.contains_key(&id) {
                self.update(&id, |existing| existing.merge(item));
            } else {
                self.insert_new(id, item);
            }
        }
    }

    /// Mutates an entry and re-derives its position. Returns false if absent.
    pub fn update<Q, F>(&mut self, id: &Q, f: F) -> bool
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&mut V),
    {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };

        f(&mut entry.value);
        let new_key = (self.sort_key)(&entry.value);
        if new_key != entry.key {
            let old_key = std::mem::replace(&mut entry.key, new_key.clone());
            if let Some(rid) = self.order.remove(&(old_key, entry.seq)) {
                self.order.insert((new_key, entry.seq), rid);
            }
        }
        true
    }

    /// Removes an entry.
    pub fn delete<Q>(&mut self, id: &Q) -> Option<V>
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.entries.remove(id)?;
        self.order.remove(&(entry.key, entry.seq));
        Some(entry.value)
    }

    /// Looks up an entry.
    pub fn get<Q>(&self, id: &Q) -> Option<&V>
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(id).map(|e| &e.value)
    }

    /// True when `id` is present.
    pub fn contains<Q>(&self, id: &Q) -> bool
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(id)
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Iterates in sort order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &V> {
        self.order
            .values()
            .filter_map(|id| self.entries.get(id).map(|e| &e.value))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert_new(&mut self, id: V::Id, value: V) {
        let key = (self.sort_key)(&value);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert((key.clone(), seq), id.clone());
        self.entries.insert(id, Entry { value, key, seq });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Label;

    fn by_color(label: &Label) -> u32 {
        label.color
    }

    fn label(id: &str, color: u32) -> Label {
        Label {
            id: id.to_string(),
            color,
            ..Label::default()
        }
    }

    fn ids(c: &SortedKeyedCollection<Label, u32>) -> Vec<&str> {
        c.iter().map(|l| l.id.as_str()).collect()
    }

    #[test]
    fn equal_keys_keep_insertion_order_across_updates() {
        let mut c = SortedKeyedCollection::new(by_color);
        c.upsert([label("a", 1), label("b", 1), label("c", 0)]);
        assert_eq!(ids(&c), ["c", "a", "b"]);

        assert!(c.update("c", |l| l.color = 1));
        assert_eq!(ids(&c), ["a", "b", "c"]);

        assert!(c.update("a", |l| l.color = 2));
        assert!(c.update("a", |l| l.color = 1));
        assert_eq!(ids(&c), ["a", "b", "c"]);
    }

    #[test]
    fn insert_if_absent_skips_known_ids() {
        let mut c = SortedKeyedCollection::new(by_color);
        assert_eq!(c.insert_if_absent([label("a", 5)]), 1);
        assert_eq!(c.insert_if_absent([label("a", 0), label("b", 0)]), 1);
        assert_eq!(c.get("a").map(|l| l.color), Some(5));
        assert_eq!(c.delete("b").map(|l| l.id), Some("b".to_string()));
        assert!(!c.update("b", |_| {}));
        assert_eq!(ids(&c), ["a"]);
    }
}
