use std::borrow::Borrow;
use std::collections::VecDeque;
use std::hash::Hash;
use std::ops::Range;

use hashbrown::HashMap;

use super::record::Record;

/// End of the sequence a new item is inserted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Before every existing item (backward history fill).
    Prepend,
    /// After every existing item (live arrival).
    Append,
}

/// Arrival-ordered map with O(1) lookup by identifier.
///
/// Items live in one deque. The side index maps each identifier to a logical
/// slot number; the head slot moves down on prepend, so neither end insertion
/// renumbers existing entries. Only `remove_where` compacts the slots.
#[derive(Debug, Clone)]
pub struct OrderedKeyedSequence<V: Record> {
    items: VecDeque<V>,
    slots: HashMap<V::Id, i64>,
    head: i64,
}

impl<V: Record> Default for OrderedKeyedSequence<V> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            slots: HashMap::new(),
            head: 0,
        }
    }
}

impl<V: Record> OrderedKeyedSequence<V> {
    /// Empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces an existing item in place, or inserts a new one at `placement`.
    ///
    /// Returns true when the item was new.
    pub fn upsert(&mut self, item: V, placement: Placement) -> bool {
        let id = item.record_id();
        if let Some(idx) = self.index_of(&id) {
            self.items[idx] = item;
            return false;
        }

        match placement {
            Placement::Append => {
                let slot = self.head + self.items.len() as i64;
                self.items.push_back(item);
                self.slots.insert(id, slot);
            }
            Placement::Prepend => {
                self.head -= 1;
                self.items.push_front(item);
                self.slots.insert(id, self.head);
            }
        }
        true
    }

    /// Looks up an item by identifier.
    pub fn get<Q>(&self, id: &Q) -> Option<&V>
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index_of(id).map(|idx| &self.items[idx])
    }

    /// Mutates an item in place without moving it. Returns false if absent.
    pub fn update_assign<Q, F>(&mut self, id: &Q, f: F) -> bool
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&mut V),
    {
        match self.index_of(id) {
            Some(idx) => {
                f(&mut self.items[idx]);
                true
            }
            None => false,
        }
    }

    /// Removes every item matching `pred`, keeping the order of the rest.
    pub fn remove_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&V) -> bool,
    {
        let before = self.items.len();
        self.items.retain(|item| !pred(item));
        let removed = before - self.items.len();
        if removed > 0 {
            self.reindex();
        }
        removed
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.items.clear();
        self.slots.clear();
        self.head = 0;
    }

    /// Position of `id` in arrival order.
    pub fn position<Q>(&self, id: &Q) -> Option<usize>
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index_of(id)
    }

    /// The full ordered view, without copying.
    pub fn ordered(&self) -> &VecDeque<V> {
        &self.items
    }

    /// Iterates in arrival order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator {
        self.items.iter()
    }

    /// Iterates a positional window in arrival order.
    pub fn range(&self, range: Range<usize>) -> impl DoubleEndedIterator<Item = &V> {
        self.items.range(range)
    }

    /// Most recently appended item.
    pub fn last(&self) -> Option<&V> {
        self.items.back()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn index_of<Q>(&self, id: &Q) -> Option<usize>
    where
        V::Id: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.slots.get(id).map(|slot| (slot - self.head) as usize)
    }

    fn reindex(&mut self) {
        self.head = 0;
        self.slots.clear();
        for (idx, item) in self.items.iter().enumerate() {
            self.slots.insert(item.record_id(), idx as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, MessageKey};

    fn msg(id: &str) -> Message {
        Message {
            key: MessageKey::new("c1", id),
            ..Message::default()
        }
    }

    fn ids(seq: &OrderedKeyedSequence<Message>) -> Vec<String> {
        seq.iter().map(|m| m.key.id.clone()).collect()
    }

    #[test]
    fn prepend_and_append_keep_lookup_consistent() {
        let mut seq = OrderedKeyedSequence::new();
        seq.upsert(msg("m2"), Placement::Append);
        seq.upsert(msg("m3"), Placement::Append);
        seq.upsert(msg("m1"), Placement::Prepend);
        seq.upsert(msg("m0"), Placement::Prepend);

        assert_eq!(ids(&seq), ["m0", "m1", "m2", "m3"]);
        assert_eq!(seq.position("m0"), Some(0));
        assert_eq!(seq.position("m3"), Some(3));
        assert_eq!(seq.get("m2").map(|m| m.key.id.as_str()), Some("m2"));
    }

    #[test]
    fn remove_where_compacts_slots() {
        let mut seq = OrderedKeyedSequence::new();
        for id in ["a", "b", "c", "d"] {
            seq.upsert(msg(id), Placement::Append);
        }
        seq.upsert(msg("z"), Placement::Prepend);

        assert_eq!(seq.remove_where(|m| m.key.id == "b" || m.key.id == "z"), 2);
        assert_eq!(ids(&seq), ["a", "c", "d"]);
        assert_eq!(seq.position("d"), Some(2));

        seq.upsert(msg("e"), Placement::Append);
        assert_eq!(seq.position("e"), Some(3));
    }
}
