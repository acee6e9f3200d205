//! Shared primitive identifiers, enums, and the three-state fetch cache.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque conversation or participant address (`user[:device]@server`).
pub type Jid = String;
/// Message identifier, unique within one conversation.
pub type MessageId = String;

/// Returns the user part of `jid`, without device suffix or server.
///
/// `"123:4@s.whatsapp.net"` yields `"123"`.
pub fn jid_user(jid: &str) -> &str {
    let user = jid.split_once('@').map_or(jid, |(user, _)| user);
    user.split_once(':').map_or(user, |(user, _)| user)
}

/// Normalizes `jid` to `user@server` form with the device suffix dropped.
pub fn normalize_jid(jid: &str) -> String {
    match jid.split_once('@') {
        Some((_, server)) => format!("{}@{}", jid_user(jid), server),
        None => jid_user(jid).to_string(),
    }
}

/// Delivery status of a message. Ordinals only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageStatus {
    /// Sending failed.
    Error = 0,
    /// Queued locally.
    Pending = 1,
    /// Accepted by the server.
    ServerAck = 2,
    /// Delivered to the recipient device.
    DeliveryAck = 3,
    /// Read by the recipient.
    Read = 4,
    /// Media played by the recipient.
    Played = 5,
}

impl TryFrom<u8> for MessageStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        Ok(match value {
            0 => MessageStatus::Error,
            1 => MessageStatus::Pending,
            2 => MessageStatus::ServerAck,
            3 => MessageStatus::DeliveryAck,
            4 => MessageStatus::Read,
            5 => MessageStatus::Played,
            other => return Err(format!("unknown message status ordinal {other}")),
        })
    }
}

impl From<MessageStatus> for u8 {
    fn from(value: MessageStatus) -> Self {
        value as u8
    }
}

/// Cache slot for a value filled lazily from a collaborator.
///
/// `None` records "attempted, unavailable" so the lookup is not repeated;
/// `NotFetched` means no attempt has been made (or the value was invalidated).
///
/// As a struct field, pair with
/// `#[serde(default, skip_serializing_if = "Fetched::is_not_fetched")]`:
/// a missing field decodes to `NotFetched`, `null` to `None`, and a value to
/// `Some`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Fetched<T> {
    /// Never fetched.
    #[default]
    NotFetched,
    /// Fetched, value present.
    Some(T),
    /// Fetched, nothing available.
    None,
}

impl<T> Fetched<T> {
    /// True when no fetch has been attempted.
    pub fn is_not_fetched(&self) -> bool {
        matches!(self, Self::NotFetched)
    }

    /// Returns the fetched value, if any.
    pub fn as_option(&self) -> Option<&T> {
        match self {
            Self::Some(v) => Some(v),
            Self::NotFetched | Self::None => None,
        }
    }
}

impl<T> From<Option<T>> for Fetched<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::Some(v),
            None => Self::None,
        }
    }
}

impl<T: Serialize> Serialize for Fetched<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Some(v) => serializer.serialize_some(v),
            Self::NotFetched | Self::None => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Fetched<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jid_helpers_strip_device_suffix() {
        assert_eq!(jid_user("123:4@s.whatsapp.net"), "123");
        assert_eq!(jid_user("123@g.us"), "123");
        assert_eq!(normalize_jid("123:4@s.whatsapp.net"), "123@s.whatsapp.net");
        assert_eq!(normalize_jid("bare"), "bare");
    }

    #[test]
    fn status_ordinals_are_ordered() {
        assert!(MessageStatus::ServerAck < MessageStatus::Read);
        assert_eq!(MessageStatus::try_from(4), Ok(MessageStatus::Read));
        assert!(MessageStatus::try_from(9).is_err());
    }
}
