use std::fmt::Debug;
use std::hash::Hash;

use crate::model::{
    Chat, ChatPresence, Contact, GroupMetadata, Label, LabelAssociation, Message,
};
use crate::types::{Jid, MessageId};

/// An entity stored in one of the keyed collections.
pub trait Record {
    /// Stable identifier type.
    type Id: Clone + Eq + Hash + Debug;

    /// Identifier of this record.
    fn record_id(&self) -> Self::Id;

    /// Merges `incoming` (same identifier) into `self`.
    fn merge(&mut self, incoming: Self);
}

impl Record for Chat {
    type Id = Jid;

    fn record_id(&self) -> Jid {
        self.id.clone()
    }

    fn merge(&mut self, incoming: Self) {
        self.merge_from(incoming);
    }
}

impl Record for Message {
    type Id = MessageId;

    fn record_id(&self) -> MessageId {
        self.key.id.clone()
    }

    fn merge(&mut self, incoming: Self) {
        self.merge_from(incoming);
    }
}

impl Record for Contact {
    type Id = Jid;

    fn record_id(&self) -> Jid {
        self.id.clone()
    }

    fn merge(&mut self, incoming: Self) {
        self.merge_from(incoming);
    }
}

impl Record for GroupMetadata {
    type Id = Jid;

    fn record_id(&self) -> Jid {
        self.id.clone()
    }

    fn merge(&mut self, incoming: Self) {
        *self = incoming;
    }
}

impl Record for ChatPresence {
    type Id = Jid;

    fn record_id(&self) -> Jid {
        self.id.clone()
    }

    fn merge(&mut self, incoming: Self) {
        self.participants.extend(incoming.participants);
    }
}

impl Record for Label {
    type Id = String;

    fn record_id(&self) -> String {
        self.id.clone()
    }

    fn merge(&mut self, incoming: Self) {
        *self = incoming;
    }
}

impl Record for LabelAssociation {
    type Id = String;

    fn record_id(&self) -> String {
        self.composite_key()
    }

    fn merge(&mut self, incoming: Self) {
        *self = incoming;
    }
}
