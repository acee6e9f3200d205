//! Runtime notice stream payloads.

use crate::{event::EventKind, types::Jid};

/// Notices emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreNotice {
    /// An event was applied.
    Applied {
        /// Applied event kind.
        kind: EventKind,
    },
    /// An event was rejected and left no trace in the store.
    Skipped {
        /// Rejected event kind.
        kind: EventKind,
    },
    /// A contact's profile image was invalidated and will be refetched on
    /// the next read.
    PictureChanged {
        /// Contact identifier.
        jid: Jid,
    },
    /// A snapshot reached the sink.
    SnapshotWritten {
        /// Conversations in the snapshot.
        chats: usize,
        /// Messages in the snapshot.
        messages: usize,
    },
}
