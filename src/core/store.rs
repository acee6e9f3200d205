use std::cmp::Reverse;

use hashbrown::{HashMap, HashSet};

use crate::{
    model::{
        Chat, ChatPresence, ConnectionState, Contact, GroupMetadata, Label, LabelAssociation,
        Message, UserReceipt,
    },
    types::{Fetched, Jid},
};

use super::{
    contact_hash::ContactHashIndex, repo::FlatRepository, sequence::OrderedKeyedSequence,
    sorted::SortedKeyedCollection,
};

/// Conversation ordering: pinned first, archived last among equals, newest
/// activity first, identifier as tie-break.
pub type ChatOrderKey = (Reverse<bool>, bool, Reverse<u64>, Jid);

/// Derives the [`ChatOrderKey`] of `chat`.
pub fn chat_order_key(chat: &Chat) -> ChatOrderKey {
    (
        Reverse(chat.is_pinned()),
        chat.is_archived(),
        Reverse(chat.conversation_timestamp),
        chat.id.clone(),
    )
}

fn association_order_key(assoc: &LabelAssociation) -> String {
    assoc.composite_key()
}

/// Cache state of a group metadata lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLookup<'a> {
    /// Metadata is cached.
    Cached(&'a GroupMetadata),
    /// A lookup was attempted and failed; not retried automatically.
    Unavailable,
    /// Never looked up.
    Unknown,
}

/// In-memory mirror of remote conversation state.
///
/// Mutated only through [`ChatStore::apply`] and the fill hooks; every
/// read is synchronous.
#[derive(Debug, Clone)]
pub struct ChatStore {
    pub(crate) connection: ConnectionState,
    pub(crate) chats: SortedKeyedCollection<Chat, ChatOrderKey>,
    pub(crate) messages: HashMap<Jid, OrderedKeyedSequence<Message>>,
    pub(crate) contacts: FlatRepository<Contact>,
    pub(crate) contact_hashes: ContactHashIndex,
    pub(crate) groups: FlatRepository<GroupMetadata>,
    pub(crate) unavailable_groups: HashSet<Jid>,
    pub(crate) presences: FlatRepository<ChatPresence>,
    pub(crate) labels: FlatRepository<Label>,
    pub(crate) label_associations: SortedKeyedCollection<LabelAssociation, String>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self {
            connection: ConnectionState::default(),
            chats: SortedKeyedCollection::new(chat_order_key),
            messages: HashMap::new(),
            contacts: FlatRepository::new(),
            contact_hashes: ContactHashIndex::default(),
            groups: FlatRepository::new(),
            unavailable_groups: HashSet::new(),
            presences: FlatRepository::new(),
            labels: FlatRepository::new(),
            label_associations: SortedKeyedCollection::new(association_order_key),
        }
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.connection
    }

    /// Conversations in display order.
    pub fn chats(&self) -> impl Iterator<Item = &Chat> {
        self.chats.iter()
    }

    pub fn chats_cloned(&self) -> Vec<Chat> {
        self.chats().cloned().collect()
    }

    pub fn chat(&self, jid: &str) -> Option<&Chat> {
        self.chats.get(jid)
    }

    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    pub fn contact(&self, jid: &str) -> Option<&Contact> {
        self.contacts.get(jid)
    }

    pub fn group_metadata(&self, jid: &str) -> Option<&GroupMetadata> {
        self.groups.get(jid)
    }

    pub fn presence(&self, jid: &str) -> Option<&ChatPresence> {
        self.presences.get(jid)
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.values()
    }

    pub fn label(&self, id: &str) -> Option<&Label> {
        self.labels.get(id)
    }

    /// Label associations in composite-key order.
    pub fn label_associations(&self) -> impl Iterator<Item = &LabelAssociation> {
        self.label_associations.iter()
    }

    /// Message sequence of `jid`, if any message was ever stored for it.
    pub fn messages(&self, jid: &str) -> Option<&OrderedKeyedSequence<Message>> {
        self.messages.get(jid)
    }

    pub fn message_count(&self, jid: &str) -> usize {
        self.messages.get(jid).map_or(0, |seq| seq.len())
    }

    pub fn load_message(&self, jid: &str, id: &str) -> Option<&Message> {
        self.messages.get(jid)?.get(id)
    }

    pub fn most_recent_message(&self, jid: &str) -> Option<&Message> {
        self.messages.get(jid)?.last()
    }

    pub fn message_receipts(&self, jid: &str, id: &str) -> Option<&[UserReceipt]> {
        self.load_message(jid, id).map(|m| m.user_receipt.as_slice())
    }

    /// Cached profile image state; `None` when the contact is unknown.
    pub fn profile_picture(&self, jid: &str) -> Option<&Fetched<String>> {
        self.contacts.get(jid).map(|c| &c.img_url)
    }

    /// Writes back a profile image fill, creating the contact on first
    /// reference. Returns true when the contact was created.
    pub fn record_profile_picture(&mut self, jid: &str, value: Fetched<String>) -> bool {
        if self.contacts.contains(jid) {
            self.contacts.update(jid, |c| c.img_url = value);
            return false;
        }
        self.contacts.insert_if_absent(Contact {
            id: jid.to_string(),
            img_url: value,
            ..Contact::default()
        });
        self.contact_hashes.invalidate();
        true
    }

    pub fn group_lookup(&self, jid: &str) -> GroupLookup<'_> {
        match self.groups.get(jid) {
            Some(meta) => GroupLookup::Cached(meta),
            None if self.unavailable_groups.contains(jid) => GroupLookup::Unavailable,
            None => GroupLookup::Unknown,
        }
    }

    /// Caches fetched metadata. An entry already present is kept: once cached,
    /// metadata changes only through update events.
    pub fn cache_group_metadata(&mut self, meta: GroupMetadata) -> bool {
        self.unavailable_groups.remove(&meta.id);
        self.groups.insert_if_absent(meta)
    }

    pub fn mark_group_unavailable(&mut self, jid: &str) {
        if !self.groups.contains(jid) {
            self.unavailable_groups.insert(jid.to_string());
        }
    }

    pub(crate) fn sequence_mut(&mut self, jid: &str) -> &mut OrderedKeyedSequence<Message> {
        self.messages.entry_ref(jid).or_default()
    }
}
