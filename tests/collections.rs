use chatmirror::{
    core::{
        repo::FlatRepository,
        sorted::SortedKeyedCollection,
        store::{ChatOrderKey, chat_order_key},
    },
    model::{Chat, Contact},
};

fn chat(id: &str, ts: u64, pinned: bool, archived: bool) -> Chat {
    Chat {
        id: id.to_string(),
        conversation_timestamp: ts,
        pinned: Some(pinned),
        archived: Some(archived),
        ..Chat::default()
    }
}

fn order(c: &SortedKeyedCollection<Chat, ChatOrderKey>) -> Vec<&str> {
    c.iter().map(|chat| chat.id.as_str()).collect()
}

#[test]
fn chats_sort_pinned_then_unarchived_then_newest() {
    let mut chats = SortedKeyedCollection::new(chat_order_key);
    chats.upsert([
        chat("old", 1, false, false),
        chat("archived", 50, false, true),
        chat("new", 9, false, false),
        chat("pinned", 0, true, false),
    ]);
    assert_eq!(order(&chats), ["pinned", "new", "old", "archived"]);

    assert!(chats.update("old", |c| c.conversation_timestamp = 99));
    assert_eq!(order(&chats), ["pinned", "old", "new", "archived"]);

    assert!(chats.update("archived", |c| c.archived = Some(false)));
    assert_eq!(order(&chats), ["pinned", "old", "archived", "new"]);

    chats.upsert([chat("pinned", 0, false, false)]);
    assert_eq!(order(&chats).last(), Some(&"pinned"));
    assert_eq!(chats.len(), 4);
}

#[test]
fn repository_merges_fields_on_upsert() {
    let mut repo = FlatRepository::new();
    assert!(repo.upsert(Contact {
        id: "a".into(),
        name: Some("Ana".into()),
        ..Contact::default()
    }));
    assert!(!repo.upsert(Contact {
        id: "a".into(),
        notify: Some("ana".into()),
        ..Contact::default()
    }));

    let stored = repo.get("a").cloned().unwrap_or_default();
    assert_eq!(stored.name.as_deref(), Some("Ana"));
    assert_eq!(stored.notify.as_deref(), Some("ana"));

    repo.upsert(Contact {
        id: "b".into(),
        ..Contact::default()
    });
    let removed = repo.retain(|c| c.id == "b");
    assert_eq!(removed, ["a"]);
    assert_eq!(repo.len(), 1);
    assert!(repo.delete("b").is_some());
    assert!(repo.is_empty());
}
