use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast;

use chatmirror::{
    core::{pagination::Cursor, snapshot::StoreSnapshotV1, store::ChatStore},
    event::{ChatEvent, EventKind, MessageUpsertType},
    lookup::{LookupError, RemoteLookup},
    model::{Contact, ContactUpdate, GroupMetadata, ImageChange, Message, MessageKey},
    persist::{PersistResult, SnapshotSink},
    runtime::{
        events::StoreNotice,
        handle::{RuntimeConfig, RuntimeError, spawn_chat_store},
    },
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn msg(jid: &str, id: &str) -> Message {
    Message {
        key: MessageKey::new(jid, id),
        ..Message::default()
    }
}

#[derive(Default)]
struct CountingLookup {
    pictures: AtomicUsize,
    groups: AtomicUsize,
    broadcasts: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl RemoteLookup for CountingLookup {
    async fn fetch_profile_picture_url(&self, jid: &str) -> Result<Option<String>, LookupError> {
        self.pictures.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        if self.fail {
            return Err(LookupError::Timeout);
        }
        Ok(Some(format!("https://img/{jid}")))
    }

    async fn fetch_group_metadata(&self, jid: &str) -> Result<Option<GroupMetadata>, LookupError> {
        self.groups.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        if self.fail {
            return Err(LookupError::Transport("offline".into()));
        }
        Ok(Some(GroupMetadata {
            id: jid.to_string(),
            subject: "team".into(),
            ..GroupMetadata::default()
        }))
    }

    async fn fetch_broadcast_list_info(
        &self,
        jid: &str,
    ) -> Result<Option<GroupMetadata>, LookupError> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        Ok(Some(GroupMetadata {
            id: jid.to_string(),
            subject: "list".into(),
            ..GroupMetadata::default()
        }))
    }
}

#[derive(Clone, Default)]
struct MemorySink {
    written: Arc<Mutex<Vec<StoreSnapshotV1>>>,
}

impl SnapshotSink for MemorySink {
    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1) -> PersistResult<()> {
        self.written.lock().expect("lock").push(snapshot.clone());
        Ok(())
    }

    fn load_latest(&self) -> PersistResult<Option<StoreSnapshotV1>> {
        Ok(self.written.lock().expect("lock").last().cloned())
    }
}

#[tokio::test]
async fn apply_paginate_and_notices_in_order() {
    init_tracing();
    let handle = spawn_chat_store(ChatStore::new(), None, None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    let messages = ["m1", "m2", "m3", "m4"].iter().map(|id| msg("c1", id)).collect();
    let applied = handle
        .apply(ChatEvent::MessagesUpsert {
            messages,
            kind: MessageUpsertType::Notify,
        })
        .await
        .expect("apply");
    assert!(applied.applied);

    let skipped = handle
        .apply(ChatEvent::ChatsUpsert(vec![Default::default()]))
        .await
        .expect("apply");
    assert!(!skipped.applied);

    let page = handle.load_messages("c1", 2, None).await.expect("page");
    let ids: Vec<_> = page.iter().map(|m| m.key.id.as_str()).collect();
    assert_eq!(ids, ["m3", "m4"]);

    let older = handle
        .load_messages("c1", 2, Some(Cursor::Before(MessageKey::new("c1", "m3"))))
        .await
        .expect("older");
    let ids: Vec<_> = older.iter().map(|m| m.key.id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2"]);

    assert_eq!(handle.chats().await.expect("chats").len(), 1);
    assert_eq!(
        handle
            .most_recent_message("c1")
            .await
            .expect("recent")
            .map(|m| m.key.id),
        Some("m4".to_string())
    );

    assert_eq!(
        sub.recv().await.expect("notice"),
        StoreNotice::Applied {
            kind: EventKind::MessagesUpsert
        }
    );
    assert_eq!(
        sub.recv().await.expect("notice"),
        StoreNotice::Skipped {
            kind: EventKind::ChatsUpsert
        }
    );

    handle.shutdown().await.expect("shutdown");
    assert!(matches!(
        handle.chats().await,
        Err(RuntimeError::ChannelClosed)
    ));
}

#[tokio::test]
async fn concurrent_picture_reads_share_one_lookup() {
    init_tracing();
    let lookup = Arc::new(CountingLookup::default());
    let handle = spawn_chat_store(
        ChatStore::new(),
        Some(lookup.clone()),
        None,
        RuntimeConfig::default(),
    );
    handle
        .apply(ChatEvent::ContactsUpsert(vec![Contact {
            id: "a".into(),
            ..Contact::default()
        }]))
        .await
        .expect("apply");

    let (first, second) = tokio::join!(
        handle.fetch_profile_picture_url("a"),
        handle.fetch_profile_picture_url("a")
    );
    assert_eq!(first.expect("first"), Some("https://img/a".to_string()));
    assert_eq!(second.expect("second"), Some("https://img/a".to_string()));
    assert_eq!(lookup.pictures.load(Ordering::SeqCst), 1);

    let cached = handle.fetch_profile_picture_url("a").await.expect("cached");
    assert_eq!(cached, Some("https://img/a".to_string()));
    assert_eq!(lookup.pictures.load(Ordering::SeqCst), 1);

    let mut sub = handle.subscribe();
    handle
        .apply(ChatEvent::ContactsUpdate(vec![ContactUpdate {
            id: "a".into(),
            img_url: Some(ImageChange::Changed),
            ..ContactUpdate::default()
        }]))
        .await
        .expect("apply");
    assert_eq!(
        sub.recv().await.expect("notice"),
        StoreNotice::Applied {
            kind: EventKind::ContactsUpdate
        }
    );
    assert_eq!(
        sub.recv().await.expect("notice"),
        StoreNotice::PictureChanged { jid: "a".into() }
    );

    handle.fetch_profile_picture_url("a").await.expect("refetch");
    assert_eq!(lookup.pictures.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_lookups_are_cached_and_not_retried() {
    init_tracing();
    let lookup = Arc::new(CountingLookup {
        fail: true,
        ..CountingLookup::default()
    });
    let handle = spawn_chat_store(
        ChatStore::new(),
        Some(lookup.clone()),
        None,
        RuntimeConfig::default(),
    );

    for _ in 0..3 {
        assert_eq!(handle.fetch_profile_picture_url("x").await.expect("picture"), None);
        assert_eq!(handle.fetch_group_metadata("g1").await.expect("group"), None);
    }
    assert_eq!(lookup.pictures.load(Ordering::SeqCst), 1);
    assert_eq!(lookup.groups.load(Ordering::SeqCst), 1);

    let contacts = handle.contacts().await.expect("contacts");
    assert_eq!(contacts.len(), 1);
}

#[tokio::test]
async fn group_and_broadcast_share_the_metadata_cache() {
    let lookup = Arc::new(CountingLookup::default());
    let handle = spawn_chat_store(
        ChatStore::new(),
        Some(lookup.clone()),
        None,
        RuntimeConfig::default(),
    );

    let (a, b) = tokio::join!(
        handle.fetch_group_metadata("g1"),
        handle.fetch_group_metadata("g1")
    );
    assert_eq!(a.expect("a").map(|m| m.subject), Some("team".to_string()));
    assert_eq!(b.expect("b").map(|m| m.subject), Some("team".to_string()));
    assert_eq!(lookup.groups.load(Ordering::SeqCst), 1);

    let list = handle.fetch_broadcast_list_info("b1").await.expect("list");
    assert_eq!(list.map(|m| m.subject), Some("list".to_string()));
    let again = handle.fetch_group_metadata("b1").await.expect("cached");
    assert_eq!(again.map(|m| m.subject), Some("list".to_string()));
    assert_eq!(lookup.broadcasts.load(Ordering::SeqCst), 1);
    assert_eq!(lookup.groups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn without_lookup_misses_resolve_to_none() {
    let handle = spawn_chat_store(ChatStore::new(), None, None, RuntimeConfig::default());
    assert_eq!(handle.fetch_profile_picture_url("a").await.expect("picture"), None);
    assert_eq!(handle.fetch_broadcast_list_info("b").await.expect("list"), None);
}

#[tokio::test]
async fn bound_stream_is_applied_in_order() {
    let handle = spawn_chat_store(ChatStore::new(), None, None, RuntimeConfig::default());
    let (tx, rx) = broadcast::channel(16);
    let task = handle.bind(rx);

    for id in ["m1", "m2", "m3"] {
        tx.send(ChatEvent::MessagesUpsert {
            messages: vec![msg("c1", id)],
            kind: MessageUpsertType::Append,
        })
        .expect("send");
    }
    drop(tx);
    task.await.expect("bind task");

    let ids: Vec<String> = handle
        .load_messages("c1", 10, None)
        .await
        .expect("page")
        .into_iter()
        .map(|m| m.key.id)
        .collect();
    assert_eq!(ids, ["m1", "m2", "m3"]);
}

#[tokio::test]
async fn ingest_decodes_named_events() {
    let handle = spawn_chat_store(ChatStore::new(), None, None, RuntimeConfig::default());
    let applied = handle
        .ingest(
            "chats.upsert",
            json!([{ "id": "c1", "conversationTimestamp": 10, "unreadCount": 2 }]),
        )
        .await
        .expect("ingest");
    assert_eq!(applied.kind, EventKind::ChatsUpsert);

    handle
        .ingest("chats.update", json!([{ "id": "c1", "unreadCount": 3 }]))
        .await
        .expect("ingest");
    let chats = handle.chats().await.expect("chats");
    assert_eq!(chats[0].unread(), 5);

    assert!(matches!(
        handle.ingest("no.such.event", json!({})).await,
        Err(RuntimeError::Decode(_))
    ));
}

#[tokio::test]
async fn checkpoints_reach_the_sink() {
    init_tracing();
    let sink = MemorySink::default();
    let written = Arc::clone(&sink.written);
    let cfg = RuntimeConfig {
        snapshot_every_events: 2,
        snapshot_on_shutdown: true,
        ..RuntimeConfig::default()
    };
    let handle = spawn_chat_store(ChatStore::new(), None, Some(Box::new(sink)), cfg);
    let mut sub = handle.subscribe();

    for id in ["m1", "m2"] {
        handle
            .apply(ChatEvent::MessagesUpsert {
                messages: vec![msg("c1", id)],
                kind: MessageUpsertType::Notify,
            })
            .await
            .expect("apply");
    }

    let mut saw_snapshot = false;
    for _ in 0..4 {
        let notice = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("notice in time")
            .expect("notice");
        if let StoreNotice::SnapshotWritten { chats, messages } = notice {
            assert_eq!((chats, messages), (1, 2));
            saw_snapshot = true;
            break;
        }
    }
    assert!(saw_snapshot);

    handle.checkpoint().await.expect("checkpoint");
    handle.shutdown().await.expect("shutdown");

    let written = written.lock().expect("lock");
    assert_eq!(written.len(), 3);
    assert_eq!(written.last().map(|s| s.message_count()), Some(2));
}
