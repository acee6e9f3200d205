//! Event-sourced in-memory mirror of messaging conversation state.
//!
//! A protocol layer emits mutation events (history sync, message arrival,
//! receipts, presence, group and label changes); [`core::store::ChatStore`]
//! reduces them into ordered, queryable collections and can snapshot itself
//! for crash recovery.
//!
//! # Examples
//!
//! In-memory usage with [`core::store::ChatStore`]:
//! ```
//! use chatmirror::{
//!     core::{pagination::Cursor, store::ChatStore},
//!     event::{ChatEvent, MessageUpsertType},
//!     model::{Message, MessageKey},
//! };
//!
//! let mut store = ChatStore::new();
//! let messages = ["m1", "m2", "m3"]
//!     .into_iter()
//!     .map(|id| Message { key: MessageKey::new("c1@s.whatsapp.net", id), ..Message::default() })
//!     .collect();
//! store.apply(ChatEvent::MessagesUpsert { messages, kind: MessageUpsertType::Notify });
//!
//! assert_eq!(store.chat_count(), 1);
//! let cursor = Cursor::Before(MessageKey::new("c1@s.whatsapp.net", "m3"));
//! let page = store.load_messages("c1@s.whatsapp.net", 1, Some(&cursor));
//! assert_eq!(page[0].key.id, "m2");
//! ```
//!
//! Runtime usage with a SQLite snapshot sink:
//! ```no_run
//! use chatmirror::{
//!     persist::{SnapshotSink, sqlite::SqliteSnapshotSink},
//!     runtime::handle::{RuntimeConfig, spawn_chat_store},
//! };
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteSnapshotSink::open("chats.db").expect("open sqlite");
//! let store = sink.load_store().expect("load snapshot");
//! let handle = spawn_chat_store(store, None, Some(Box::new(sink)), RuntimeConfig::default());
//! handle
//!     .ingest("chats.upsert", json!([{ "id": "c1@s.whatsapp.net", "conversationTimestamp": 10 }]))
//!     .await
//!     .expect("ingest");
//! let chats = handle.chats().await.expect("chats");
//! assert_eq!(chats.len(), 1);
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```

/// In-memory store, collections and event reducer.
pub mod core;
/// Inbound events and named-payload decoding.
pub mod event;
/// Collaborator lookups for cache misses.
pub mod lookup;
/// Conversation domain records and patches.
pub mod model;
/// Snapshot persistence.
pub mod persist;
/// Single-writer runtime handle and notices.
pub mod runtime;
/// Shared identifiers and enums.
pub mod types;
