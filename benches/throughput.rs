use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use chatmirror::{
    core::{pagination::Cursor, store::ChatStore},
    event::{ChatEvent, MessageUpdate, MessageUpsertType},
    model::{ChatUpdate, Message, MessageKey, MessagePatch},
    types::MessageStatus,
};

fn message(jid: &str, i: u64) -> Message {
    Message {
        key: MessageKey::new(jid, format!("m{i}")),
        message_timestamp: i,
        ..Message::default()
    }
}

fn bench_notify_ingest(c: &mut Criterion) {
    c.bench_function("notify_ingest_50k", |b| {
        b.iter(|| {
            let mut store = ChatStore::new();
            for i in 0..50_000u64 {
                let jid = format!("c{}", i % 200);
                store.apply(ChatEvent::MessagesUpsert {
                    messages: vec![message(&jid, i)],
                    kind: MessageUpsertType::Notify,
                });
            }
        });
    });
}

fn bench_status_and_unread_updates(c: &mut Criterion) {
    c.bench_function("updates_10k", |b| {
        b.iter(|| {
            let mut store = ChatStore::new();
            for i in 0..10_000u64 {
                store.apply(ChatEvent::MessagesUpsert {
                    messages: vec![message("c1", i)],
                    kind: MessageUpsertType::Notify,
                });
            }
            for i in 0..10_000u64 {
                store.apply(ChatEvent::MessagesUpdate(vec![MessageUpdate {
                    key: MessageKey::new("c1", format!("m{i}")),
                    update: MessagePatch {
                        status: Some(MessageStatus::Read),
                        ..MessagePatch::default()
                    },
                }]));
                store.apply(ChatEvent::ChatsUpdate(vec![ChatUpdate {
                    id: "c1".into(),
                    unread_count: Some(1),
                    conversation_timestamp: Some(i),
                    ..ChatUpdate::default()
                }]));
            }
        });
    });
}

fn bench_pagination(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_messages");
    let mut store = ChatStore::new();
    let messages = (0..100_000u64).map(|i| message("c1", i)).collect();
    store.apply(ChatEvent::MessagesUpsert {
        messages,
        kind: MessageUpsertType::Append,
    });
    let cursor = Cursor::Before(MessageKey::new("c1", "m50000"));

    for count in [20usize, 200, 2000] {
        group.bench_with_input(BenchmarkId::new("before", count), &count, |b, &count| {
            b.iter(|| store.load_messages("c1", count, Some(&cursor)));
        });
        group.bench_with_input(BenchmarkId::new("latest", count), &count, |b, &count| {
            b.iter(|| store.load_messages("c1", count, None));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_notify_ingest,
    bench_status_and_unread_updates,
    bench_pagination
);
criterion_main!(benches);
