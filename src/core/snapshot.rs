//! Whole-store structural snapshot.
//!
//! Restoring goes through the same event handlers as live ingestion, so a
//! restored store satisfies exactly the invariants a live one does.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    event::{AssociationChange, ChatEvent, LabelsAssociation, MessageUpsertType},
    model::{Chat, Contact, Label, LabelAssociation, Message},
    types::Jid,
};

use super::store::ChatStore;

/// Current on-disk snapshot format.
pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

/// Serializable copy of the store's durable collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreSnapshotV1 {
    /// Conversations in display order.
    pub chats: Vec<Chat>,
    /// Contacts by identifier.
    pub contacts: HashMap<Jid, Contact>,
    /// Message sequences by conversation, oldest first.
    pub messages: HashMap<Jid, Vec<Message>>,
    /// Labels by identifier.
    pub labels: HashMap<String, Label>,
    /// Label associations.
    pub label_associations: Vec<LabelAssociation>,
}

/// Versioned wrapper written by every snapshot sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    /// Format of `snapshot`.
    pub format_version: u16,
    /// Payload.
    pub snapshot: StoreSnapshotV1,
}

impl SnapshotEnvelope {
    /// Wraps `snapshot` at the current format version.
    pub fn new(snapshot: StoreSnapshotV1) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot,
        }
    }
}

impl StoreSnapshotV1 {
    /// Total number of messages across conversations.
    pub fn message_count(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }
}

impl ChatStore {
    /// Captures conversations, contacts, messages, labels and associations.
    pub fn to_snapshot(&self) -> StoreSnapshotV1 {
        StoreSnapshotV1 {
            chats: self.chats_cloned(),
            contacts: self
                .contacts
                .values()
                .map(|c| (c.id.clone(), c.clone()))
                .collect(),
            messages: self
                .messages
                .iter()
                .filter(|(_, seq)| !seq.is_empty())
                .map(|(jid, seq)| (jid.clone(), seq.iter().cloned().collect()))
                .collect(),
            labels: self
                .labels
                .values()
                .map(|l| (l.id.clone(), l.clone()))
                .collect(),
            label_associations: self.label_associations.iter().cloned().collect(),
        }
    }

    /// Builds a fresh store from `snapshot`.
    pub fn from_snapshot(snapshot: StoreSnapshotV1) -> Self {
        let mut store = Self::new();
        store.restore(snapshot);
        store
    }

    /// Merges `snapshot` into this store through the live event handlers.
    pub fn restore(&mut self, snapshot: StoreSnapshotV1) {
        let StoreSnapshotV1 {
            chats,
            contacts,
            messages,
            labels,
            label_associations,
        } = snapshot;

        let counts = (chats.len(), contacts.len(), messages.len());
        self.apply(ChatEvent::ChatsUpsert(chats));
        self.apply(ChatEvent::ContactsUpsert(contacts.into_values().collect()));
        for (_, batch) in messages {
            self.apply(ChatEvent::MessagesUpsert {
                messages: batch,
                kind: MessageUpsertType::Append,
            });
        }
        for label in labels.into_values() {
            self.apply(ChatEvent::LabelsEdit(label));
        }
        for association in label_associations {
            self.apply(ChatEvent::LabelsAssociation(LabelsAssociation {
                association,
                change: AssociationChange::Add,
            }));
        }

        debug!(
            chats = counts.0,
            contacts = counts.1,
            conversations = counts.2,
            "snapshot restored"
        );
    }
}
