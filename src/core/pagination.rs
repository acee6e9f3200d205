//! Cursor-based windows over a conversation's message sequence.

use serde::{Deserialize, Serialize};

use crate::model::{Message, MessageKey};

use super::store::ChatStore;

/// Anchor of a paged message read. The anchor itself is never returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cursor {
    /// Messages strictly older than the anchor.
    Before(MessageKey),
    /// Messages strictly newer than the anchor.
    After(MessageKey),
}

impl Cursor {
    fn key(&self) -> &MessageKey {
        match self {
            Self::Before(key) | Self::After(key) => key,
        }
    }
}

impl ChatStore {
    /// Up to `count` messages of `jid` in arrival order.
    ///
    /// Without a cursor this is the newest `count`. With a cursor whose
    /// message is not stored the result is empty. Never mutates.
    pub fn load_messages(&self, jid: &str, count: usize, cursor: Option<&Cursor>) -> Vec<Message> {
        let Some(seq) = self.messages.get(jid) else {
            return Vec::new();
        };
        if count == 0 {
            return Vec::new();
        }

        let len = seq.len();
        let window = match cursor {
            None => len.saturating_sub(count)..len,
            Some(cursor) => {
                let key = cursor.key();
                if !key.remote_jid.is_empty() && key.remote_jid != jid {
                    return Vec::new();
                }
                let Some(pos) = seq.position(key.id.as_str()) else {
                    return Vec::new();
                };
                match cursor {
                    Cursor::Before(_) => pos.saturating_sub(count)..pos,
                    Cursor::After(_) => {
                        let start = pos + 1;
                        start..len.min(start.saturating_add(count))
                    }
                }
            }
        };

        seq.range(window).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event::ChatEvent, event::MessageUpsertType};

    fn store_with(ids: &[&str]) -> ChatStore {
        let mut store = ChatStore::new();
        let messages = ids
            .iter()
            .map(|id| Message {
                key: MessageKey::new("c1", *id),
                ..Message::default()
            })
            .collect();
        store.apply(ChatEvent::MessagesUpsert {
            messages,
            kind: MessageUpsertType::Append,
        });
        store
    }

    fn ids(msgs: &[Message]) -> Vec<&str> {
        msgs.iter().map(|m| m.key.id.as_str()).collect()
    }

    #[test]
    fn windows_around_cursor() {
        let store = store_with(&["m1", "m2", "m3", "m4", "m5"]);

        assert_eq!(ids(&store.load_messages("c1", 2, None)), ["m4", "m5"]);

        let before = Cursor::Before(MessageKey::new("c1", "m4"));
        assert_eq!(ids(&store.load_messages("c1", 2, Some(&before))), ["m2", "m3"]);
        assert_eq!(
            ids(&store.load_messages("c1", 10, Some(&before))),
            ["m1", "m2", "m3"]
        );

        let after = Cursor::After(MessageKey::new("c1", "m2"));
        assert_eq!(ids(&store.load_messages("c1", 2, Some(&after))), ["m3", "m4"]);
    }

    #[test]
    fn unknown_chat_or_cursor_is_empty() {
        let store = store_with(&["m1"]);
        assert!(store.load_messages("c9", 5, None).is_empty());
        let missing = Cursor::Before(MessageKey::new("c1", "nope"));
        assert!(store.load_messages("c1", 5, Some(&missing)).is_empty());
        let first = Cursor::Before(MessageKey::new("c1", "m1"));
        assert!(store.load_messages("c1", 5, Some(&first)).is_empty());
    }
}
