//! Event reduction: one invariant-preserving handler per [`ChatEvent`] kind.
//!
//! Handlers validate their whole payload before touching any collection, so a
//! rejected event leaves the store exactly as it was.

use hashbrown::{HashMap, HashSet};
use tracing::{debug, trace, warn};

use crate::{
    event::{
        AssociationChange, ChatEvent, EventKind, GroupParticipantsUpdate, HistorySet,
        HistorySyncType, LabelsAssociation, MessageUpdate, MessageUpsertType, MessagesDelete,
        ParticipantAction, PresenceUpdate, ReactionUpdate, ReceiptUpdate,
    },
    model::{
        Chat, ChatPresence, ChatUpdate, Contact, ContactUpdate, GroupParticipant, GroupUpdate,
        ImageChange, Label, Message, MessageKey,
    },
    types::{Fetched, Jid, MessageId},
};

use super::{sequence::Placement, store::ChatStore};

/// Reason an event was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReduceError {
    /// A message key lacks its conversation or message identifier.
    #[error("`{kind}` carries a message key without conversation or message id")]
    UnaddressableMessage {
        /// Rejected event.
        kind: EventKind,
    },
    /// An entity identifier is empty.
    #[error("`{kind}` carries an empty identifier")]
    EmptyId {
        /// Rejected event.
        kind: EventKind,
    },
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Event kind.
    pub kind: EventKind,
    /// False when the event was rejected and skipped.
    pub applied: bool,
    /// Contacts whose profile image was invalidated and should be refetched.
    pub refresh_pictures: Vec<Jid>,
}

impl Applied {
    fn ok(kind: EventKind) -> Self {
        Self {
            kind,
            applied: true,
            refresh_pictures: Vec::new(),
        }
    }
}

impl ChatStore {
    /// Applies `event`. A rejected event is logged and skipped; it never
    /// affects other state or later events.
    pub fn apply(&mut self, event: ChatEvent) -> Applied {
        let kind = event.kind();
        match self.try_apply(event) {
            Ok(applied) => applied,
            Err(err) => {
                warn!(%kind, error = %err, "event skipped");
                Applied {
                    kind,
                    applied: false,
                    refresh_pictures: Vec::new(),
                }
            }
        }
    }

    /// Applies `event`, returning the rejection instead of logging it.
    pub fn try_apply(&mut self, event: ChatEvent) -> Result<Applied, ReduceError> {
        let mut applied = Applied::ok(event.kind());
        match event {
            ChatEvent::ConnectionUpdate(update) => self.connection.merge_from(update),
            ChatEvent::HistorySet(set) => self.on_history_set(set)?,
            ChatEvent::ContactsUpsert(contacts) => self.on_contacts_upsert(contacts)?,
            ChatEvent::ContactsUpdate(updates) => {
                applied.refresh_pictures = self.on_contacts_update(updates);
            }
            ChatEvent::ChatsUpsert(chats) => self.on_chats_upsert(chats)?,
            ChatEvent::ChatsUpdate(updates) => self.on_chats_update(updates),
            ChatEvent::PresenceUpdate(update) => self.on_presence_update(update)?,
            ChatEvent::ChatsDelete(ids) => self.on_chats_delete(ids),
            ChatEvent::MessagesUpsert { messages, kind } => self.on_messages_upsert(messages, kind)?,
            ChatEvent::MessagesUpdate(updates) => self.on_messages_update(updates),
            ChatEvent::MessagesDelete(del) => self.on_messages_delete(del)?,
            ChatEvent::GroupsUpdate(updates) => self.on_groups_update(updates),
            ChatEvent::GroupParticipantsUpdate(update) => self.on_group_participants(update),
            ChatEvent::MessageReceiptUpdate(updates) => self.on_receipts(updates),
            ChatEvent::MessagesReaction(reactions) => self.on_reactions(reactions),
            ChatEvent::LabelsEdit(label) => self.on_labels_edit(label)?,
            ChatEvent::LabelsAssociation(change) => self.on_labels_association(change)?,
        }
        Ok(applied)
    }

    fn on_history_set(&mut self, set: HistorySet) -> Result<(), ReduceError> {
        let kind = EventKind::HistorySet;
        require_keys(kind, set.messages.iter().map(|m| &m.key))?;

        if set.sync_type == HistorySyncType::OnDemand {
            let count = set.messages.len();
            // Reverse so the batch keeps its own order ahead of what is stored.
            for msg in set.messages.into_iter().rev() {
                let jid = msg.key.remote_jid.clone();
                self.sequence_mut(&jid).upsert(msg, Placement::Prepend);
            }
            debug!(messages = count, "on-demand history merged");
            return Ok(());
        }

        require_ids(kind, set.chats.iter().map(|c| c.id.as_str()))?;
        require_ids(kind, set.contacts.iter().map(|c| c.id.as_str()))?;

        if set.is_latest {
            self.chats.clear();
            self.messages.clear();
        }

        let chats = self.chats.insert_if_absent(set.chats);

        let incoming: HashSet<Jid> = set.contacts.iter().map(|c| c.id.clone()).collect();
        for contact in set.contacts {
            self.contacts.upsert(contact);
        }
        let evicted = if set.is_latest {
            self.contacts.retain(|c| incoming.contains(&c.id)).len()
        } else {
            0
        };
        self.contact_hashes.invalidate();

        let messages = set.messages.len();
        for msg in set.messages {
            let jid = msg.key.remote_jid.clone();
            self.sequence_mut(&jid).upsert(msg, Placement::Append);
        }

        debug!(
            chats,
            contacts = incoming.len(),
            evicted,
            messages,
            is_latest = set.is_latest,
            "history sync applied"
        );
        Ok(())
    }

    fn on_contacts_upsert(&mut self, contacts: Vec<Contact>) -> Result<(), ReduceError> {
        require_ids(EventKind::ContactsUpsert, contacts.iter().map(|c| c.id.as_str()))?;
        let mut grew = false;
        for contact in contacts {
            grew |= self.contacts.upsert(contact);
        }
        if grew {
            self.contact_hashes.invalidate();
        }
        Ok(())
    }

    fn on_contacts_update(&mut self, updates: Vec<ContactUpdate>) -> Vec<Jid> {
        let mut refresh = Vec::new();
        for mut update in updates {
            let Some(jid) = self.resolve_contact(&update.id) else {
                debug!(id = %update.id, "update for unknown contact");
                continue;
            };

            let image = update.img_url.take();
            let changed = matches!(image, Some(ImageChange::Changed));
            self.contacts.update(&jid, |contact| {
                match image {
                    Some(ImageChange::Changed) => contact.img_url = Fetched::NotFetched,
                    Some(ImageChange::Removed) => contact.img_url = Fetched::None,
                    Some(ImageChange::Url(url)) => contact.img_url = Fetched::Some(url),
                    None => {}
                }
                update.apply_fields_to(contact);
            });
            if changed {
                refresh.push(jid);
            }
        }
        refresh
    }

    /// Direct identifier match, then the salted short-hash fallback.
    fn resolve_contact(&mut self, id: &str) -> Option<Jid> {
        if self.contacts.contains(id) {
            return Some(id.to_string());
        }
        let resolved = self.contact_hashes.resolve(id, self.contacts.ids());
        if let Some(jid) = &resolved {
            trace!(code = id, %jid, "contact resolved by short hash");
        }
        resolved
    }

    fn on_chats_upsert(&mut self, chats: Vec<Chat>) -> Result<(), ReduceError> {
        require_ids(EventKind::ChatsUpsert, chats.iter().map(|c| c.id.as_str()))?;
        self.chats.upsert(chats);
        Ok(())
    }

    fn on_chats_update(&mut self, updates: Vec<ChatUpdate>) {
        for update in updates {
            let id = update.id.clone();
            if !self.chats.update(&id, |chat| update.apply_to(chat)) {
                debug!(jid = %id, "update for unknown chat");
            }
        }
    }

    fn on_presence_update(&mut self, update: PresenceUpdate) -> Result<(), ReduceError> {
        require_ids(EventKind::PresenceUpdate, [update.id.as_str()])?;
        self.presences.upsert(ChatPresence {
            id: update.id,
            participants: update.presences,
        });
        Ok(())
    }

    fn on_chats_delete(&mut self, ids: Vec<Jid>) {
        for id in ids {
            if self.chats.delete(&id).is_none() {
                debug!(jid = %id, "delete for unknown chat");
            }
        }
    }

    fn on_messages_upsert(
        &mut self,
        messages: Vec<Message>,
        kind: MessageUpsertType,
    ) -> Result<(), ReduceError> {
        if kind == MessageUpsertType::Replay {
            trace!(messages = messages.len(), "replayed upsert left to history sync");
            return Ok(());
        }
        require_keys(EventKind::MessagesUpsert, messages.iter().map(|m| &m.key))?;

        for msg in messages {
            let jid = msg.key.remote_jid.clone();
            let ts = msg.message_timestamp;
            self.sequence_mut(&jid).upsert(msg, Placement::Append);

            if kind == MessageUpsertType::Notify && !self.chats.contains(&jid) {
                debug!(%jid, "chat synthesized from incoming message");
                self.chats.insert_if_absent([Chat::synthesized(jid, ts)]);
            }
        }
        Ok(())
    }

    fn on_messages_update(&mut self, updates: Vec<MessageUpdate>) {
        for MessageUpdate { key, update } in updates {
            let found = self.messages.get_mut(&key.remote_jid).is_some_and(|seq| {
                seq.update_assign(&key.id, |msg| {
                    let mut patch = update;
                    if let (Some(incoming), Some(current)) = (patch.status, msg.status) {
                        if current >= incoming {
                            patch.status = None;
                        }
                    }
                    if !patch.is_empty() {
                        patch.apply_to(msg);
                    }
                })
            });
            if !found {
                debug!(jid = %key.remote_jid, id = %key.id, "update for unknown message");
            }
        }
    }

    fn on_messages_delete(&mut self, del: MessagesDelete) -> Result<(), ReduceError> {
        match del {
            MessagesDelete::All { jid } => match self.messages.get_mut(&jid) {
                Some(seq) => seq.clear(),
                None => debug!(%jid, "clear for chat without messages"),
            },
            MessagesDelete::Keys { keys } => {
                require_keys(EventKind::MessagesDelete, keys.iter())?;
                let mut by_jid: HashMap<Jid, HashSet<MessageId>> = HashMap::new();
                for key in keys {
                    by_jid.entry(key.remote_jid).or_default().insert(key.id);
                }
                for (jid, ids) in by_jid {
                    match self.messages.get_mut(&jid) {
                        Some(seq) => {
                            seq.remove_where(|m| ids.contains(&m.key.id));
                        }
                        None => debug!(%jid, "delete for chat without messages"),
                    }
                }
            }
        }
        Ok(())
    }

    fn on_groups_update(&mut self, updates: Vec<GroupUpdate>) {
        for update in updates {
            let id = update.id.clone();
            if !self.groups.update(&id, |meta| update.apply_to(meta)) {
                debug!(jid = %id, "update for unknown group");
            }
        }
    }

    fn on_group_participants(&mut self, update: GroupParticipantsUpdate) {
        let GroupParticipantsUpdate {
            id,
            participants,
            action,
        } = update;

        let found = self.groups.update(&id, |meta| match action {
            ParticipantAction::Add => {
                for jid in participants {
                    if !meta.participants.iter().any(|p| p.id == jid) {
                        meta.participants.push(GroupParticipant::member(jid));
                    }
                }
            }
            ParticipantAction::Promote | ParticipantAction::Demote => {
                let targets: HashSet<&Jid> = participants.iter().collect();
                let is_admin = action == ParticipantAction::Promote;
                for p in meta.participants.iter_mut() {
                    if targets.contains(&p.id) {
                        p.is_admin = is_admin;
                    }
                }
            }
            ParticipantAction::Remove => {
                let targets: HashSet<&Jid> = participants.iter().collect();
                meta.participants.retain(|p| !targets.contains(&p.id));
            }
        });

        if !found {
            debug!(jid = %id, ?action, "participants update for unknown group");
        }
    }

    fn on_receipts(&mut self, updates: Vec<ReceiptUpdate>) {
        for ReceiptUpdate { key, receipt } in updates {
            if !self.with_message(&key, |msg| msg.merge_receipt(receipt)) {
                trace!(jid = %key.remote_jid, id = %key.id, "receipt for message not in memory");
            }
        }
    }

    fn on_reactions(&mut self, reactions: Vec<ReactionUpdate>) {
        for ReactionUpdate { key, reaction } in reactions {
            if !self.with_message(&key, |msg| msg.merge_reaction(reaction)) {
                trace!(jid = %key.remote_jid, id = %key.id, "reaction for message not in memory");
            }
        }
    }

    fn on_labels_edit(&mut self, label: Label) -> Result<(), ReduceError> {
        require_ids(EventKind::LabelsEdit, [label.id.as_str()])?;
        if label.deleted {
            self.labels.delete(&label.id);
        } else {
            self.labels.upsert(label);
        }
        Ok(())
    }

    fn on_labels_association(&mut self, change: LabelsAssociation) -> Result<(), ReduceError> {
        require_ids(
            EventKind::LabelsAssociation,
            [change.association.label_id.as_str()],
        )?;
        match change.change {
            AssociationChange::Add => self.label_associations.upsert([change.association]),
            AssociationChange::Remove => {
                if self
                    .label_associations
                    .delete(&change.association.composite_key())
                    .is_none()
                {
                    debug!(label = %change.association.label_id, "remove for unknown association");
                }
            }
        }
        Ok(())
    }

    fn with_message<F: FnOnce(&mut Message)>(&mut self, key: &MessageKey, f: F) -> bool {
        self.messages
            .get_mut(&key.remote_jid)
            .is_some_and(|seq| seq.update_assign(&key.id, f))
    }
}

fn require_ids<'a>(
    kind: EventKind,
    ids: impl IntoIterator<Item = &'a str>,
) -> Result<(), ReduceError> {
    if ids.into_iter().any(str::is_empty) {
        return Err(ReduceError::EmptyId { kind });
    }
    Ok(())
}

fn require_keys<'a>(
    kind: EventKind,
    keys: impl IntoIterator<Item = &'a MessageKey>,
) -> Result<(), ReduceError> {
    if keys.into_iter().any(|k| !k.is_addressable()) {
        return Err(ReduceError::UnaddressableMessage { kind });
    }
    Ok(())
}
