//! Inbound mutation events emitted by the protocol layer.

use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    model::{
        Chat, ChatUpdate, ConnectionState, Contact, ContactUpdate, GroupUpdate, Label,
        LabelAssociation, Message, MessageKey, MessagePatch, PresenceData, Reaction, UserReceipt,
    },
    types::Jid,
};

/// Failure to turn a named upstream payload into a [`ChatEvent`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The event name is not one the store understands.
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    /// The payload does not match the event's shape.
    #[error("malformed `{kind}` payload: {source}")]
    Payload {
        /// Event the payload was decoded for.
        kind: EventKind,
        /// Underlying decode error.
        source: serde_json::Error,
    },
}

/// Kind of history sync batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySyncType {
    /// First sync after pairing.
    InitialBootstrap,
    /// Complete resync.
    #[default]
    Full,
    /// Recent conversations only.
    Recent,
    /// Push-name directory.
    PushName,
    /// Older history requested on demand.
    OnDemand,
}

/// Bulk history replay.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistorySet {
    /// Conversations in the batch.
    pub chats: Vec<Chat>,
    /// Contacts in the batch.
    pub contacts: Vec<Contact>,
    /// Messages in the batch, oldest first.
    pub messages: Vec<Message>,
    /// The batch is the authoritative latest state.
    pub is_latest: bool,
    /// Batch kind.
    pub sync_type: HistorySyncType,
}

/// Presence change for one conversation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceUpdate {
    /// Conversation identifier.
    pub id: Jid,
    /// Presence by participant.
    pub presences: HashMap<Jid, PresenceData>,
}

/// Delivery type of a `messages.upsert` batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageUpsertType {
    /// Messages appended by this client or a linked device.
    Append,
    /// Newly received messages.
    Notify,
    /// History replay variants, handled by history sync.
    #[serde(other)]
    Replay,
}

/// Message update with the key it targets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageUpdate {
    /// Target message.
    pub key: MessageKey,
    /// Fields to merge.
    pub update: MessagePatch,
}

/// Which messages to delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessagesDelete", into = "RawMessagesDelete")]
pub enum MessagesDelete {
    /// Every message of one conversation.
    All {
        /// Conversation to clear.
        jid: Jid,
    },
    /// Exactly these messages.
    Keys {
        /// Messages to remove.
        keys: Vec<MessageKey>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawMessagesDelete {
    #[serde(skip_serializing_if = "Option::is_none")]
    jid: Option<Jid>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    all: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    keys: Vec<MessageKey>,
}

impl TryFrom<RawMessagesDelete> for MessagesDelete {
    type Error = String;

    fn try_from(raw: RawMessagesDelete) -> Result<Self, String> {
        match (raw.all, raw.jid) {
            (true, Some(jid)) => Ok(Self::All { jid }),
            (true, None) => Err("`all` delete without `jid`".to_string()),
            (false, _) => Ok(Self::Keys { keys: raw.keys }),
        }
    }
}

impl From<MessagesDelete> for RawMessagesDelete {
    fn from(value: MessagesDelete) -> Self {
        match value {
            MessagesDelete::All { jid } => Self {
                jid: Some(jid),
                all: true,
                keys: Vec::new(),
            },
            MessagesDelete::Keys { keys } => Self {
                keys,
                ..Self::default()
            },
        }
    }
}

/// Membership change kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantAction {
    /// Participants joined.
    Add,
    /// Participants left or were removed.
    Remove,
    /// Participants became admins.
    Promote,
    /// Participants lost admin rights.
    Demote,
}

/// Group membership change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupParticipantsUpdate {
    /// Group identifier.
    pub id: Jid,
    /// Affected participants.
    pub participants: Vec<Jid>,
    /// What happened to them.
    pub action: ParticipantAction,
}

/// Receipt for one message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptUpdate {
    /// Target message.
    pub key: MessageKey,
    /// Receipt to merge.
    pub receipt: UserReceipt,
}

/// Reaction on one message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactionUpdate {
    /// Target message.
    pub key: MessageKey,
    /// Reaction to merge.
    pub reaction: Reaction,
}

/// Direction of a label association change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationChange {
    /// Attach the label.
    Add,
    /// Detach the label.
    Remove,
}

/// Label attachment change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelsAssociation {
    /// The association.
    pub association: LabelAssociation,
    /// Attach or detach.
    #[serde(rename = "type")]
    pub change: AssociationChange,
}

/// Every mutation the store consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Connection record changed.
    ConnectionUpdate(ConnectionState),
    /// History replay batch.
    HistorySet(HistorySet),
    /// Contacts added or refreshed.
    ContactsUpsert(Vec<Contact>),
    /// Sparse contact changes.
    ContactsUpdate(Vec<ContactUpdate>),
    /// Conversations added or refreshed.
    ChatsUpsert(Vec<Chat>),
    /// Sparse conversation changes.
    ChatsUpdate(Vec<ChatUpdate>),
    /// Presence change.
    PresenceUpdate(PresenceUpdate),
    /// Conversations removed.
    ChatsDelete(Vec<Jid>),
    /// Messages arrived.
    MessagesUpsert {
        /// New messages.
        messages: Vec<Message>,
        /// Delivery type.
        kind: MessageUpsertType,
    },
    /// Sparse message changes.
    MessagesUpdate(Vec<MessageUpdate>),
    /// Messages removed.
    MessagesDelete(MessagesDelete),
    /// Sparse group changes.
    GroupsUpdate(Vec<GroupUpdate>),
    /// Group membership change.
    GroupParticipantsUpdate(GroupParticipantsUpdate),
    /// Delivery receipts.
    MessageReceiptUpdate(Vec<ReceiptUpdate>),
    /// Reactions.
    MessagesReaction(Vec<ReactionUpdate>),
    /// Label created, edited or deleted.
    LabelsEdit(Label),
    /// Label attached or detached.
    LabelsAssociation(LabelsAssociation),
}

/// Discriminant of [`ChatEvent`], carrying the upstream event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `connection.update`
    ConnectionUpdate,
    /// `messaging-history.set`
    HistorySet,
    /// `contacts.upsert`
    ContactsUpsert,
    /// `contacts.update`
    ContactsUpdate,
    /// `chats.upsert`
    ChatsUpsert,
    /// `chats.update`
    ChatsUpdate,
    /// `presence.update`
    PresenceUpdate,
    /// `chats.delete`
    ChatsDelete,
    /// `messages.upsert`
    MessagesUpsert,
    /// `messages.update`
    MessagesUpdate,
    /// `messages.delete`
    MessagesDelete,
    /// `groups.update`
    GroupsUpdate,
    /// `group-participants.update`
    GroupParticipantsUpdate,
    /// `message-receipt.update`
    MessageReceiptUpdate,
    /// `messages.reaction`
    MessagesReaction,
    /// `labels.edit`
    LabelsEdit,
    /// `labels.association`
    LabelsAssociation,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 17] = [
        Self::ConnectionUpdate,
        Self::HistorySet,
        Self::ContactsUpsert,
        Self::ContactsUpdate,
        Self::ChatsUpsert,
        Self::ChatsUpdate,
        Self::PresenceUpdate,
        Self::ChatsDelete,
        Self::MessagesUpsert,
        Self::MessagesUpdate,
        Self::MessagesDelete,
        Self::GroupsUpdate,
        Self::GroupParticipantsUpdate,
        Self::MessageReceiptUpdate,
        Self::MessagesReaction,
        Self::LabelsEdit,
        Self::LabelsAssociation,
    ];

    /// Upstream event name.
    pub fn name(self) -> &'static str {
        match self {
            Self::ConnectionUpdate => "connection.update",
            Self::HistorySet => "messaging-history.set",
            Self::ContactsUpsert => "contacts.upsert",
            Self::ContactsUpdate => "contacts.update",
            Self::ChatsUpsert => "chats.upsert",
            Self::ChatsUpdate => "chats.update",
            Self::PresenceUpdate => "presence.update",
            Self::ChatsDelete => "chats.delete",
            Self::MessagesUpsert => "messages.upsert",
            Self::MessagesUpdate => "messages.update",
            Self::MessagesDelete => "messages.delete",
            Self::GroupsUpdate => "groups.update",
            Self::GroupParticipantsUpdate => "group-participants.update",
            Self::MessageReceiptUpdate => "message-receipt.update",
            Self::MessagesReaction => "messages.reaction",
            Self::LabelsEdit => "labels.edit",
            Self::LabelsAssociation => "labels.association",
        }
    }

    /// Kind for an upstream event name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Deserialize)]
struct MessagesUpsertPayload {
    messages: Vec<Message>,
    #[serde(rename = "type")]
    kind: MessageUpsertType,
}

#[derive(Deserialize)]
struct ListPayload<T> {
    #[serde(alias = "chats", alias = "contacts", alias = "updates", alias = "reactions")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct IdsPayload {
    ids: Vec<Jid>,
}

#[derive(Deserialize)]
struct LabelPayload {
    label: Label,
}

impl ChatEvent {
    /// Kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionUpdate(_) => EventKind::ConnectionUpdate,
            Self::HistorySet(_) => EventKind::HistorySet,
            Self::ContactsUpsert(_) => EventKind::ContactsUpsert,
            Self::ContactsUpdate(_) => EventKind::ContactsUpdate,
            Self::ChatsUpsert(_) => EventKind::ChatsUpsert,
            Self::ChatsUpdate(_) => EventKind::ChatsUpdate,
            Self::PresenceUpdate(_) => EventKind::PresenceUpdate,
            Self::ChatsDelete(_) => EventKind::ChatsDelete,
            Self::MessagesUpsert { .. } => EventKind::MessagesUpsert,
            Self::MessagesUpdate(_) => EventKind::MessagesUpdate,
            Self::MessagesDelete(_) => EventKind::MessagesDelete,
            Self::GroupsUpdate(_) => EventKind::GroupsUpdate,
            Self::GroupParticipantsUpdate(_) => EventKind::GroupParticipantsUpdate,
            Self::MessageReceiptUpdate(_) => EventKind::MessageReceiptUpdate,
            Self::MessagesReaction(_) => EventKind::MessagesReaction,
            Self::LabelsEdit(_) => EventKind::LabelsEdit,
            Self::LabelsAssociation(_) => EventKind::LabelsAssociation,
        }
    }

    /// Decodes an upstream `(name, payload)` pair.
    ///
    /// List payloads are accepted either as a bare array or wrapped in an
    /// object (`{"chats": [...]}`, `{"updates": [...]}`, ...).
    pub fn from_named(name: &str, payload: Value) -> Result<Self, DecodeError> {
        let kind =
            EventKind::from_name(name).ok_or_else(|| DecodeError::UnknownEvent(name.to_string()))?;
        let wrap = |source: serde_json::Error| DecodeError::Payload { kind, source };

        Ok(match kind {
            EventKind::ConnectionUpdate => {
                Self::ConnectionUpdate(serde_json::from_value(payload).map_err(wrap)?)
            }
            EventKind::HistorySet => Self::HistorySet(serde_json::from_value(payload).map_err(wrap)?),
            EventKind::ContactsUpsert => Self::ContactsUpsert(list(payload).map_err(wrap)?),
            EventKind::ContactsUpdate => Self::ContactsUpdate(list(payload).map_err(wrap)?),
            EventKind::ChatsUpsert => Self::ChatsUpsert(list(payload).map_err(wrap)?),
            EventKind::ChatsUpdate => Self::ChatsUpdate(list(payload).map_err(wrap)?),
            EventKind::PresenceUpdate => {
                Self::PresenceUpdate(serde_json::from_value(payload).map_err(wrap)?)
            }
            EventKind::ChatsDelete => {
                let ids = if payload.is_array() {
                    serde_json::from_value(payload).map_err(wrap)?
                } else {
                    serde_json::from_value::<IdsPayload>(payload).map_err(wrap)?.ids
                };
                Self::ChatsDelete(ids)
            }
            EventKind::MessagesUpsert => {
                let p: MessagesUpsertPayload = serde_json::from_value(payload).map_err(wrap)?;
                Self::MessagesUpsert {
                    messages: p.messages,
                    kind: p.kind,
                }
            }
            EventKind::MessagesUpdate => Self::MessagesUpdate(list(payload).map_err(wrap)?),
            EventKind::MessagesDelete => {
                Self::MessagesDelete(serde_json::from_value(payload).map_err(wrap)?)
            }
            EventKind::GroupsUpdate => Self::GroupsUpdate(list(payload).map_err(wrap)?),
            EventKind::GroupParticipantsUpdate => {
                Self::GroupParticipantsUpdate(serde_json::from_value(payload).map_err(wrap)?)
            }
            EventKind::MessageReceiptUpdate => {
                Self::MessageReceiptUpdate(list(payload).map_err(wrap)?)
            }
            EventKind::MessagesReaction => Self::MessagesReaction(list(payload).map_err(wrap)?),
            EventKind::LabelsEdit => {
                let label = if payload.get("label").is_some() {
                    serde_json::from_value::<LabelPayload>(payload).map_err(wrap)?.label
                } else {
                    serde_json::from_value(payload).map_err(wrap)?
                };
                Self::LabelsEdit(label)
            }
            EventKind::LabelsAssociation => {
                Self::LabelsAssociation(serde_json::from_value(payload).map_err(wrap)?)
            }
        })
    }
}

fn list<T: serde::de::DeserializeOwned>(payload: Value) -> Result<Vec<T>, serde_json::Error> {
    if payload.is_array() {
        serde_json::from_value(payload)
    } else {
        serde_json::from_value::<ListPayload<T>>(payload).map(|p| p.items)
    }
}
