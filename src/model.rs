//! Mirrored entities and the sparse update payloads that patch them.
//!
//! Every record keeps the upstream fields it does not model in `extra`, so a
//! merge never loses data the protocol layer sent.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Fetched, Jid, MessageId, MessageStatus};

/// Free-form upstream fields.
pub type Extra = Map<String, Value>;

/// Key-wise merge of free-form fields.
pub(crate) fn merge_extra(into: &mut Extra, from: Extra) {
    for (k, v) in from {
        into.insert(k, v);
    }
}

fn assign<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

/// A conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Chat {
    /// Conversation identifier.
    pub id: Jid,
    /// Display name.
    pub name: Option<String>,
    /// Pinned to the top of the list. `None` when never supplied.
    pub pinned: Option<bool>,
    /// Archived conversations sort after unarchived ones.
    pub archived: Option<bool>,
    /// Last activity, seconds since epoch.
    pub conversation_timestamp: u64,
    /// Unread counter. Negative values are upstream "marked unread" markers.
    pub unread_count: Option<i32>,
    /// Mute expiry, seconds since epoch.
    pub mute_end_time: Option<u64>,
    /// Unmodelled upstream fields.
    #[serde(flatten)]
    pub extra: Extra,
}

impl Chat {
    /// Minimal entry for a conversation first seen through a live message.
    pub fn synthesized(id: Jid, conversation_timestamp: u64) -> Self {
        Self {
            id,
            conversation_timestamp,
            unread_count: Some(1),
            ..Self::default()
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.unwrap_or(false)
    }

    pub fn is_archived(&self) -> bool {
        self.archived.unwrap_or(false)
    }

    /// Unread counter, zero when never supplied.
    pub fn unread(&self) -> i32 {
        self.unread_count.unwrap_or(0)
    }

    /// Field merge used by upserts: fields the incoming chat leaves unset
    /// keep their stored value. A zero timestamp means "not supplied".
    pub fn merge_from(&mut self, incoming: Chat) {
        assign(&mut self.name, incoming.name);
        assign(&mut self.pinned, incoming.pinned);
        assign(&mut self.archived, incoming.archived);
        if incoming.conversation_timestamp != 0 {
            self.conversation_timestamp = incoming.conversation_timestamp;
        }
        assign(&mut self.unread_count, incoming.unread_count);
        assign(&mut self.mute_end_time, incoming.mute_end_time);
        merge_extra(&mut self.extra, incoming.extra);
    }
}

/// Sparse conversation update where each `Some` field overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatUpdate {
    /// Target conversation.
    pub id: Jid,
    /// Optional replacement for the name.
    pub name: Option<String>,
    /// Optional replacement for the pin flag.
    pub pinned: Option<bool>,
    /// Optional replacement for the archive flag.
    pub archived: Option<bool>,
    /// Optional replacement for the activity timestamp.
    pub conversation_timestamp: Option<u64>,
    /// Positive values are deltas added to the stored counter; zero or
    /// negative values overwrite it.
    pub unread_count: Option<i32>,
    /// Optional replacement for the mute expiry.
    pub mute_end_time: Option<u64>,
    /// Unmodelled upstream fields.
    #[serde(flatten)]
    pub extra: Extra,
}

impl ChatUpdate {
    /// Applies this update in place to `chat`.
    pub fn apply_to(self, chat: &mut Chat) {
        if let Some(v) = self.unread_count {
            chat.unread_count = Some(if v > 0 {
                chat.unread().saturating_add(v)
            } else {
                v
            });
        }
        assign(&mut chat.name, self.name);
        assign(&mut chat.pinned, self.pinned);
        assign(&mut chat.archived, self.archived);
        if let Some(v) = self.conversation_timestamp {
            chat.conversation_timestamp = v;
        }
        assign(&mut chat.mute_end_time, self.mute_end_time);
        merge_extra(&mut chat.extra, self.extra);
    }
}

/// Addresses one message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageKey {
    /// Conversation the message belongs to.
    pub remote_jid: Jid,
    /// Sent by this client.
    pub from_me: bool,
    /// Message identifier.
    pub id: MessageId,
    /// Sender inside a group conversation.
    pub participant: Option<Jid>,
}

/// Party that authored a message or reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Author<'a> {
    /// This client.
    Me,
    /// Another participant.
    Jid(&'a str),
}

impl MessageKey {
    /// Convenience constructor for a key received from `remote_jid`.
    pub fn new(remote_jid: impl Into<Jid>, id: impl Into<MessageId>) -> Self {
        Self {
            remote_jid: remote_jid.into(),
            id: id.into(),
            ..Self::default()
        }
    }

    /// The party that authored the keyed message.
    pub fn author(&self) -> Author<'_> {
        if self.from_me {
            Author::Me
        } else {
            Author::Jid(self.participant.as_deref().unwrap_or(&self.remote_jid))
        }
    }

    /// True when both identifiers are present.
    pub fn is_addressable(&self) -> bool {
        !self.remote_jid.is_empty() && !self.id.is_empty()
    }
}

/// Per-user delivery receipt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserReceipt {
    /// Receiving user.
    pub user_jid: Jid,
    /// Delivery time.
    pub receipt_timestamp: Option<u64>,
    /// Read time.
    pub read_timestamp: Option<u64>,
    /// Played time.
    pub played_timestamp: Option<u64>,
}

impl UserReceipt {
    fn merge_from(&mut self, incoming: UserReceipt) {
        assign(&mut self.receipt_timestamp, incoming.receipt_timestamp);
        assign(&mut self.read_timestamp, incoming.read_timestamp);
        assign(&mut self.played_timestamp, incoming.played_timestamp);
    }
}

/// Reaction attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Reaction {
    /// Key of the reaction itself; its author identifies the reacting party.
    pub key: MessageKey,
    /// Emoji text. Empty or absent removes the party's reaction.
    pub text: Option<String>,
    /// Sender clock in milliseconds.
    pub sender_timestamp_ms: Option<u64>,
}

/// A mirrored message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Message {
    /// Message address.
    pub key: MessageKey,
    /// Opaque protocol payload.
    pub message: Option<Value>,
    /// Send time, seconds since epoch.
    pub message_timestamp: u64,
    /// Delivery status.
    pub status: Option<MessageStatus>,
    /// Sender display name.
    pub push_name: Option<String>,
    /// Receipts by user.
    pub user_receipt: Vec<UserReceipt>,
    /// Reactions, at most one per reacting party.
    pub reactions: Vec<Reaction>,
    /// Unmodelled upstream fields.
    #[serde(flatten)]
    pub extra: Extra,
}

impl Message {
    /// Merges `receipt` into the receipt of the same user, or appends it.
    pub fn merge_receipt(&mut self, receipt: UserReceipt) {
        match self
            .user_receipt
            .iter_mut()
            .find(|r| r.user_jid == receipt.user_jid)
        {
            Some(existing) => existing.merge_from(receipt),
            None => self.user_receipt.push(receipt),
        }
    }

    /// Replaces `self` with a re-delivered copy. The status never moves
    /// backwards.
    pub fn merge_from(&mut self, incoming: Message) {
        let status = self.status.max(incoming.status);
        *self = incoming;
        self.status = status;
    }

    /// Replaces the reacting party's previous reaction with `reaction`.
    pub fn merge_reaction(&mut self, reaction: Reaction) {
        let author = reaction.key.author();
        self.reactions.retain(|r| r.key.author() != author);
        if reaction.text.as_deref().is_some_and(|t| !t.is_empty()) {
            self.reactions.push(reaction);
        }
    }
}

/// Sparse message update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessagePatch {
    /// Optional new status; dropped if it would regress.
    pub status: Option<MessageStatus>,
    /// Optional replacement payload.
    pub message: Option<Value>,
    /// Optional replacement timestamp.
    pub message_timestamp: Option<u64>,
    /// Optional replacement sender name.
    pub push_name: Option<String>,
    /// Unmodelled upstream fields.
    #[serde(flatten)]
    pub extra: Extra,
}

impl MessagePatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `msg`.
    pub fn apply_to(self, msg: &mut Message) {
        if self.status.is_some() {
            msg.status = self.status;
        }
        if self.message.is_some() {
            msg.message = self.message;
        }
        if let Some(v) = self.message_timestamp {
            msg.message_timestamp = v;
        }
        assign(&mut msg.push_name, self.push_name);
        merge_extra(&mut msg.extra, self.extra);
    }
}

/// A contact.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Contact {
    /// Contact identifier.
    pub id: Jid,
    /// Name from the address book.
    pub name: Option<String>,
    /// Name the contact chose.
    pub notify: Option<String>,
    /// Verified business name.
    pub verified_name: Option<String>,
    /// Status text.
    pub status: Option<String>,
    /// Cached profile image URL.
    #[serde(skip_serializing_if = "Fetched::is_not_fetched")]
    pub img_url: Fetched<String>,
    /// Unmodelled upstream fields.
    #[serde(flatten)]
    pub extra: Extra,
}

impl Contact {
    /// Field merge: absent incoming fields keep the stored value.
    pub fn merge_from(&mut self, incoming: Contact) {
        assign(&mut self.name, incoming.name);
        assign(&mut self.notify, incoming.notify);
        assign(&mut self.verified_name, incoming.verified_name);
        assign(&mut self.status, incoming.status);
        if !incoming.img_url.is_not_fetched() {
            self.img_url = incoming.img_url;
        }
        merge_extra(&mut self.extra, incoming.extra);
    }
}

/// Profile image field of a contact update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageChange {
    /// The image changed upstream; the cached URL is stale.
    Changed,
    /// The image was removed.
    Removed,
    /// A concrete new URL.
    Url(String),
}

impl From<String> for ImageChange {
    fn from(value: String) -> Self {
        match value.as_str() {
            "changed" => Self::Changed,
            "removed" => Self::Removed,
            _ => Self::Url(value),
        }
    }
}

impl From<ImageChange> for String {
    fn from(value: ImageChange) -> Self {
        match value {
            ImageChange::Changed => "changed".to_string(),
            ImageChange::Removed => "removed".to_string(),
            ImageChange::Url(url) => url,
        }
    }
}

/// Sparse contact update. `id` may be a real identifier or a short hash code.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContactUpdate {
    /// Target contact identifier or short hash code.
    pub id: Jid,
    /// Optional replacement for the address-book name.
    pub name: Option<String>,
    /// Optional replacement for the chosen name.
    pub notify: Option<String>,
    /// Optional replacement for the verified name.
    pub verified_name: Option<String>,
    /// Optional replacement for the status text.
    pub status: Option<String>,
    /// Profile image marker or URL.
    pub img_url: Option<ImageChange>,
    /// Unmodelled upstream fields.
    #[serde(flatten)]
    pub extra: Extra,
}

impl ContactUpdate {
    /// Applies all fields except the image marker, which the reducer handles.
    pub fn apply_fields_to(self, contact: &mut Contact) {
        assign(&mut contact.name, self.name);
        assign(&mut contact.notify, self.notify);
        assign(&mut contact.verified_name, self.verified_name);
        assign(&mut contact.status, self.status);
        merge_extra(&mut contact.extra, self.extra);
    }
}

/// Group member.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupParticipant {
    /// Participant identifier.
    pub id: Jid,
    /// Group admin.
    pub is_admin: bool,
    /// Group creator.
    pub is_super_admin: bool,
}

impl GroupParticipant {
    /// Non-admin participant record.
    pub fn member(id: impl Into<Jid>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Group description and membership.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupMetadata {
    /// Group identifier.
    pub id: Jid,
    /// Subject line.
    pub subject: String,
    /// Creator.
    pub owner: Option<Jid>,
    /// Creation time, seconds since epoch.
    pub creation: Option<u64>,
    /// Description.
    pub desc: Option<String>,
    /// Only admins may edit group info.
    pub restrict: Option<bool>,
    /// Only admins may send messages.
    pub announce: Option<bool>,
    /// Members.
    pub participants: Vec<GroupParticipant>,
    /// Unmodelled upstream fields.
    #[serde(flatten)]
    pub extra: Extra,
}

/// Sparse group update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupUpdate {
    /// Target group.
    pub id: Jid,
    /// Optional replacement subject.
    pub subject: Option<String>,
    /// Optional replacement owner.
    pub owner: Option<Jid>,
    /// Optional replacement description.
    pub desc: Option<String>,
    /// Optional replacement restrict flag.
    pub restrict: Option<bool>,
    /// Optional replacement announce flag.
    pub announce: Option<bool>,
    /// Unmodelled upstream fields.
    #[serde(flatten)]
    pub extra: Extra,
}

impl GroupUpdate {
    /// Applies this update in place to `meta`.
    pub fn apply_to(self, meta: &mut GroupMetadata) {
        if let Some(v) = self.subject {
            meta.subject = v;
        }
        assign(&mut meta.owner, self.owner);
        assign(&mut meta.desc, self.desc);
        assign(&mut meta.restrict, self.restrict);
        assign(&mut meta.announce, self.announce);
        merge_extra(&mut meta.extra, self.extra);
    }
}

/// Presence kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Offline.
    #[default]
    Unavailable,
    /// Online.
    Available,
    /// Typing.
    Composing,
    /// Recording audio.
    Recording,
    /// Stopped typing.
    Paused,
}

/// Last known presence of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PresenceData {
    /// Presence kind.
    pub last_known_presence: Presence,
    /// Last seen, seconds since epoch.
    pub last_seen: Option<u64>,
}

/// Presence table entry for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatPresence {
    /// Conversation identifier.
    pub id: Jid,
    /// Presence by participant.
    pub participants: HashMap<Jid, PresenceData>,
}

/// A label.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Label {
    /// Label identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Colour index.
    pub color: u32,
    /// Tombstone flag sent by upstream edits.
    pub deleted: bool,
    /// Built-in label identifier.
    pub predefined_id: Option<String>,
}

/// What a label is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LabelTarget {
    /// A conversation.
    #[serde(rename_all = "camelCase")]
    Chat {
        /// Conversation identifier.
        chat_id: Jid,
    },
    /// A single message.
    #[serde(rename_all = "camelCase")]
    Message {
        /// Conversation identifier.
        chat_id: Jid,
        /// Message identifier.
        message_id: MessageId,
    },
}

/// Attachment of a label to a conversation or message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelAssociation {
    /// Labelled target.
    #[serde(flatten)]
    pub target: LabelTarget,
    /// Attached label.
    pub label_id: String,
}

impl LabelAssociation {
    /// Composite key of association kind, target identifiers and label.
    pub fn composite_key(&self) -> String {
        match &self.target {
            LabelTarget::Chat { chat_id } => format!("chat\u{1f}{chat_id}\u{1f}{}", self.label_id),
            LabelTarget::Message {
                chat_id,
                message_id,
            } => format!(
                "message\u{1f}{chat_id}\u{1f}{message_id}\u{1f}{}",
                self.label_id
            ),
        }
    }
}

/// Connection status reported by the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connection {
    /// Handshaking.
    Connecting,
    /// Ready.
    Open,
    /// Disconnected.
    Close,
}

/// Connection record, merged field-wise on every update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionState {
    /// Current status.
    pub connection: Option<Connection>,
    /// Details of the last disconnect.
    pub last_disconnect: Option<Value>,
    /// First login on this device.
    pub is_new_login: Option<bool>,
    /// Pairing QR payload.
    pub qr: Option<String>,
    /// Offline notifications have been drained.
    pub received_pending_notifications: Option<bool>,
    /// Presence is online.
    pub is_online: Option<bool>,
    /// Unmodelled upstream fields.
    #[serde(flatten)]
    pub extra: Extra,
}

impl ConnectionState {
    /// Shallow merge: only fields present in `update` change.
    pub fn merge_from(&mut self, update: ConnectionState) {
        assign(&mut self.connection, update.connection);
        assign(&mut self.last_disconnect, update.last_disconnect);
        assign(&mut self.is_new_login, update.is_new_login);
        assign(&mut self.qr, update.qr);
        assign(
            &mut self.received_pending_notifications,
            update.received_pending_notifications,
        );
        assign(&mut self.is_online, update.is_online);
        merge_extra(&mut self.extra, update.extra);
    }
}
