use tempfile::TempDir;

use chatmirror::{
    core::{
        snapshot::{SNAPSHOT_FORMAT_VERSION, StoreSnapshotV1},
        store::ChatStore,
    },
    event::{AssociationChange, ChatEvent, LabelsAssociation, MessageUpsertType},
    model::{Chat, Contact, Label, LabelAssociation, LabelTarget, Message, MessageKey},
    persist::{
        PersistError, SnapshotSink, decode_snapshot, file::FileSnapshotSink,
        sqlite::SqliteSnapshotSink,
    },
    types::Fetched,
};

fn populated_store() -> ChatStore {
    let mut store = ChatStore::new();
    store.apply(ChatEvent::ChatsUpsert(vec![
        Chat {
            id: "c1".into(),
            conversation_timestamp: 10,
            unread_count: Some(2),
            ..Chat::default()
        },
        Chat {
            id: "c2".into(),
            conversation_timestamp: 5,
            pinned: Some(true),
            ..Chat::default()
        },
    ]));
    store.apply(ChatEvent::ContactsUpsert(vec![
        Contact {
            id: "a".into(),
            name: Some("Ana".into()),
            img_url: Fetched::None,
            ..Contact::default()
        },
        Contact {
            id: "b".into(),
            ..Contact::default()
        },
    ]));
    let messages = ["m1", "m2", "m3"]
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
    store.apply(ChatEvent::LabelsEdit(Label {
        id: "l1".into(),
        name: "Work".into(),
        ..Label::default()
    }));
    store.apply(ChatEvent::LabelsAssociation(LabelsAssociation {
        association: LabelAssociation {
            target: LabelTarget::Message {
                chat_id: "c1".into(),
                message_id: "m2".into(),
            },
            label_id: "l1".into(),
        },
        change: AssociationChange::Add,
    }));
    store
}

fn assert_equivalent(a: &ChatStore, b: &ChatStore) {
    let chat_ids = |s: &ChatStore| s.chats().map(|c| c.id.clone()).collect::<Vec<_>>();
    assert_eq!(chat_ids(a), chat_ids(b));
    assert_eq!(a.chats_cloned(), b.chats_cloned());

    let message_ids = |s: &ChatStore| {
        s.messages("c1")
            .map(|seq| seq.iter().map(|m| m.key.id.clone()).collect::<Vec<_>>())
            .unwrap_or_default()
    };
    assert_eq!(message_ids(a), message_ids(b));

    let mut contacts_a: Vec<_> = a.contacts().cloned().collect();
    let mut contacts_b: Vec<_> = b.contacts().cloned().collect();
    contacts_a.sort_by(|x, y| x.id.cmp(&y.id));
    contacts_b.sort_by(|x, y| x.id.cmp(&y.id));
    assert_eq!(contacts_a, contacts_b);

    assert_eq!(
        a.label_associations().collect::<Vec<_>>(),
        b.label_associations().collect::<Vec<_>>()
    );
    assert_eq!(a.label("l1"), b.label("l1"));
}

#[test]
fn snapshot_into_fresh_store_is_equivalent() {
    let store = populated_store();
    let restored = ChatStore::from_snapshot(store.to_snapshot());
    assert_equivalent(&store, &restored);
    assert_eq!(restored.profile_picture("a"), Some(&Fetched::None));
    assert_eq!(restored.profile_picture("b"), Some(&Fetched::NotFetched));
}

#[test]
fn file_sink_round_trips_through_json() {
    let tmp = TempDir::new().expect("tmp");
    let path = tmp.path().join("nested").join("store.json");

    let store = populated_store();
    assert!(store.write_to_path(&path));

    let mut restored = ChatStore::new();
    assert!(restored.read_from_path(&path));
    assert_equivalent(&store, &restored);

    let sink = FileSnapshotSink::new(&path);
    let latest = sink.load_latest().expect("load").expect("present");
    assert_eq!(latest.messages.get("c1").map(Vec::len), Some(3));
}

#[test]
fn file_failures_are_swallowed_and_leave_store_untouched() {
    let tmp = TempDir::new().expect("tmp");

    let mut store = populated_store();
    assert!(!store.read_from_path(tmp.path().join("missing.json")));

    let garbage = tmp.path().join("garbage.json");
    std::fs::write(&garbage, b"{not json").expect("write garbage");
    assert!(!store.read_from_path(&garbage));
    assert_eq!(store.chat_count(), 2);

    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"file").expect("write blocker");
    assert!(!store.write_to_path(blocker.join("store.json")));
    assert_eq!(store.chat_count(), 2);
}

#[test]
fn unknown_format_version_is_rejected() {
    let payload = serde_json::json!({
        "format_version": SNAPSHOT_FORMAT_VERSION + 1,
        "snapshot": StoreSnapshotV1::default(),
    });
    let bytes = serde_json::to_vec(&payload).expect("encode");
    match decode_snapshot(&bytes) {
        Err(PersistError::UnsupportedVersion(v)) => assert_eq!(v, SNAPSHOT_FORMAT_VERSION + 1),
        other => panic!("unexpected decode result: {other:?}"),
    }
}

#[test]
fn sqlite_sink_keeps_newest_snapshots() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("snapshots.db");

    let mut store = populated_store();
    {
        let mut sink = SqliteSnapshotSink::open(&db_path)
            .expect("open sqlite")
            .with_retention(2);
        for i in 0..3u64 {
            store.apply(ChatEvent::ChatsUpsert(vec![Chat {
                id: format!("extra{i}"),
                conversation_timestamp: 100 + i,
                ..Chat::default()
            }]));
            sink.write_snapshot(&store.to_snapshot()).expect("write");
        }
        assert_eq!(sink.snapshot_count().expect("count"), 2);
        assert_eq!(sink.prune(0).expect("prune"), 1);
        assert_eq!(sink.snapshot_count().expect("count"), 1);
        sink.flush().expect("flush");
    }

    let sink = SqliteSnapshotSink::open(&db_path).expect("reopen");
    let restored = sink.load_store().expect("load store");
    assert_equivalent(&store, &restored);
    assert_eq!(restored.chat_count(), 5);
}

#[test]
fn empty_sqlite_sink_loads_empty_store() {
    let sink = SqliteSnapshotSink::open_in_memory().expect("open");
    assert!(sink.load_latest().expect("load").is_none());
    assert_eq!(sink.load_store().expect("store").chat_count(), 0);
}
