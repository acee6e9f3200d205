use std::sync::Arc;

use hashbrown::HashMap;
use serde_json::Value;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    core::{
        pagination::Cursor,
        reducer::Applied,
        snapshot::StoreSnapshotV1,
        store::{ChatStore, GroupLookup},
    },
    event::{ChatEvent, DecodeError},
    lookup::{LookupError, RemoteLookup},
    model::{
        Chat, ChatPresence, ConnectionState, Contact, GroupMetadata, Label, LabelAssociation,
        Message, UserReceipt,
    },
    persist::{PersistError, SnapshotSink},
    types::{Fetched, Jid},
};

use super::events::StoreNotice;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("chat store runtime is not running")]
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub command_queue_bound: usize,
    pub notice_capacity: usize,
    /// Applied events between automatic checkpoints; 0 disables them.
    pub snapshot_every_events: usize,
    pub persist_queue_bound: usize,
    pub snapshot_on_shutdown: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_queue_bound: 256,
            notice_capacity: 1024,
            snapshot_every_events: 5000,
            persist_queue_bound: 8,
            snapshot_on_shutdown: true,
        }
    }
}

/// Cloneable handle to the single-writer store task.
#[derive(Clone)]
pub struct ChatStoreHandle {
    cmd_tx: mpsc::Sender<Command>,
    notices_tx: broadcast::Sender<StoreNotice>,
}

type ReadFn = Box<dyn FnOnce(&ChatStore) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupSource {
    Group,
    Broadcast,
}

enum Command {
    Apply {
        event: ChatEvent,
        resp: Option<oneshot::Sender<Applied>>,
    },
    Read(ReadFn),
    ProfilePicture {
        jid: Jid,
        resp: oneshot::Sender<Option<String>>,
    },
    PictureResolved {
        jid: Jid,
        result: Result<Option<String>, LookupError>,
    },
    GroupMetadata {
        jid: Jid,
        source: GroupSource,
        resp: oneshot::Sender<Option<GroupMetadata>>,
    },
    GroupResolved {
        jid: Jid,
        result: Result<Option<GroupMetadata>, LookupError>,
    },
    Checkpoint {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Write {
        snapshot: StoreSnapshotV1,
        resp: Option<oneshot::Sender<Result<(), PersistError>>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Starts the store task.
///
/// Events are applied strictly in the order their commands arrive. Lookups
/// run on their own tasks and report back through the same queue, so the
/// store itself never waits on the network.
pub fn spawn_chat_store(
    store: ChatStore,
    lookup: Option<Arc<dyn RemoteLookup>>,
    sink: Option<Box<dyn SnapshotSink>>,
    config: RuntimeConfig,
) -> ChatStoreHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (notices_tx, _) = broadcast::channel::<StoreNotice>(config.notice_capacity.max(1));

    let persist_tx = sink.map(|sink| {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        spawn_persistence_worker(sink, persist_rx, notices_tx.clone());
        persist_tx
    });

    let mut runtime = Runtime {
        store,
        lookup,
        persist_tx,
        notices_tx: notices_tx.clone(),
        loopback: cmd_tx.downgrade(),
        picture_waiters: HashMap::new(),
        group_waiters: HashMap::new(),
        config,
        events_since_snapshot: 0,
    };

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if runtime.handle_command(cmd).await {
                break;
            }
        }
        debug!("chat store runtime stopped");
    });

    ChatStoreHandle { cmd_tx, notices_tx }
}

impl ChatStoreHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<StoreNotice> {
        self.notices_tx.subscribe()
    }

    async fn send(&self, cmd: Command) -> Result<(), RuntimeError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Applies `event` and waits for the outcome.
    pub async fn apply(&self, event: ChatEvent) -> Result<Applied, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Apply {
            event,
            resp: Some(tx),
        })
        .await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Queues `event` without waiting for it to be applied.
    pub async fn submit(&self, event: ChatEvent) -> Result<(), RuntimeError> {
        self.send(Command::Apply { event, resp: None }).await
    }

    /// Decodes an upstream `(name, payload)` pair and applies it.
    pub async fn ingest(&self, name: &str, payload: Value) -> Result<Applied, RuntimeError> {
        let event = ChatEvent::from_named(name, payload)
            .inspect_err(|err| warn!(name, error = %err, "undecodable event skipped"))?;
        self.apply(event).await
    }

    /// Forwards every event of `events` into the store in arrival order.
    ///
    /// The task ends when the stream closes or the store stops.
    pub fn bind(&self, mut events: broadcast::Receiver<ChatEvent>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if handle.submit(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream lagged; events lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Runs `f` against the current store state.
    pub async fn read<R, F>(&self, f: F) -> Result<R, RuntimeError>
    where
        R: Send + 'static,
        F: FnOnce(&ChatStore) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Read(Box::new(move |store| {
            let _ = tx.send(f(store));
        })))
        .await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    pub async fn load_messages(
        &self,
        jid: impl Into<Jid>,
        count: usize,
        cursor: Option<Cursor>,
    ) -> Result<Vec<Message>, RuntimeError> {
        let jid = jid.into();
        self.read(move |store| store.load_messages(&jid, count, cursor.as_ref()))
            .await
    }

    pub async fn load_message(
        &self,
        jid: impl Into<Jid>,
        id: impl Into<String>,
    ) -> Result<Option<Message>, RuntimeError> {
        let (jid, id) = (jid.into(), id.into());
        self.read(move |store| store.load_message(&jid, &id).cloned())
            .await
    }

    pub async fn most_recent_message(
        &self,
        jid: impl Into<Jid>,
    ) -> Result<Option<Message>, RuntimeError> {
        let jid = jid.into();
        self.read(move |store| store.most_recent_message(&jid).cloned())
            .await
    }

    pub async fn fetch_message_receipts(
        &self,
        jid: impl Into<Jid>,
        id: impl Into<String>,
    ) -> Result<Option<Vec<UserReceipt>>, RuntimeError> {
        let (jid, id) = (jid.into(), id.into());
        self.read(move |store| store.message_receipts(&jid, &id).map(<[_]>::to_vec))
            .await
    }

    /// Conversations in display order.
    pub async fn chats(&self) -> Result<Vec<Chat>, RuntimeError> {
        self.read(|store| store.chats_cloned()).await
    }

    pub async fn contacts(&self) -> Result<Vec<Contact>, RuntimeError> {
        self.read(|store| store.contacts().cloned().collect()).await
    }

    pub async fn labels(&self) -> Result<Vec<Label>, RuntimeError> {
        self.read(|store| store.labels().cloned().collect()).await
    }

    pub async fn label_associations(&self) -> Result<Vec<LabelAssociation>, RuntimeError> {
        self.read(|store| store.label_associations().cloned().collect())
            .await
    }

    pub async fn presence(&self, jid: impl Into<Jid>) -> Result<Option<ChatPresence>, RuntimeError> {
        let jid = jid.into();
        self.read(move |store| store.presence(&jid).cloned()).await
    }

    pub async fn connection_state(&self) -> Result<ConnectionState, RuntimeError> {
        self.read(|store| store.connection_state().clone()).await
    }

    /// Profile image URL, fetched on the first read and cached afterwards.
    ///
    /// Concurrent reads of the same contact share one lookup.
    pub async fn fetch_profile_picture_url(
        &self,
        jid: impl Into<Jid>,
    ) -> Result<Option<String>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ProfilePicture {
            jid: jid.into(),
            resp: tx,
        })
        .await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Group metadata, fetched on a miss and cached afterwards.
    pub async fn fetch_group_metadata(
        &self,
        jid: impl Into<Jid>,
    ) -> Result<Option<GroupMetadata>, RuntimeError> {
        self.group_metadata(jid.into(), GroupSource::Group).await
    }

    /// Broadcast list info, sharing the group metadata cache.
    pub async fn fetch_broadcast_list_info(
        &self,
        jid: impl Into<Jid>,
    ) -> Result<Option<GroupMetadata>, RuntimeError> {
        self.group_metadata(jid.into(), GroupSource::Broadcast).await
    }

    async fn group_metadata(
        &self,
        jid: Jid,
        source: GroupSource,
    ) -> Result<Option<GroupMetadata>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GroupMetadata {
            jid,
            source,
            resp: tx,
        })
        .await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    pub async fn snapshot(&self) -> Result<StoreSnapshotV1, RuntimeError> {
        self.read(|store| store.to_snapshot()).await
    }

    /// Writes a snapshot through the sink and waits for it. A store without a
    /// sink succeeds trivially.
    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Checkpoint { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }
}

struct Runtime {
    store: ChatStore,
    lookup: Option<Arc<dyn RemoteLookup>>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    notices_tx: broadcast::Sender<StoreNotice>,
    loopback: mpsc::WeakSender<Command>,
    picture_waiters: HashMap<Jid, Vec<oneshot::Sender<Option<String>>>>,
    group_waiters: HashMap<Jid, Vec<oneshot::Sender<Option<GroupMetadata>>>>,
    config: RuntimeConfig,
    events_since_snapshot: usize,
}

impl Runtime {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Apply { event, resp } => {
                let applied = self.apply(event);
                if let Some(resp) = resp {
                    let _ = resp.send(applied);
                }
            }
            Command::Read(f) => f(&self.store),
            Command::ProfilePicture { jid, resp } => self.profile_picture(jid, resp),
            Command::PictureResolved { jid, result } => self.picture_resolved(jid, result),
            Command::GroupMetadata { jid, source, resp } => self.group_metadata(jid, source, resp),
            Command::GroupResolved { jid, result } => self.group_resolved(jid, result),
            Command::Checkpoint { resp } => {
                let _ = resp.send(self.checkpoint().await);
            }
            Command::Shutdown { resp } => {
                let _ = resp.send(self.shutdown().await);
                return true;
            }
        }
        false
    }

    fn apply(&mut self, event: ChatEvent) -> Applied {
        let applied = self.store.apply(event);
        let kind = applied.kind;
        let notice = if applied.applied {
            StoreNotice::Applied { kind }
        } else {
            StoreNotice::Skipped { kind }
        };
        let _ = self.notices_tx.send(notice);
        for jid in &applied.refresh_pictures {
            let _ = self
                .notices_tx
                .send(StoreNotice::PictureChanged { jid: jid.clone() });
        }

        if applied.applied {
            self.events_since_snapshot += 1;
            self.maybe_auto_checkpoint();
        }
        applied
    }

    fn maybe_auto_checkpoint(&mut self) {
        let every = self.config.snapshot_every_events;
        if every == 0 || self.events_since_snapshot < every {
            return;
        }
        let Some(tx) = &self.persist_tx else {
            return;
        };
        if tx.capacity() == 0 {
            debug!("persistence busy; auto checkpoint deferred");
            return;
        }

        let msg = PersistMsg::Write {
            snapshot: self.store.to_snapshot(),
            resp: None,
        };
        match tx.try_send(msg) {
            Ok(()) => self.events_since_snapshot = 0,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("persistence busy; auto checkpoint deferred");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("persistence worker gone; auto checkpoint dropped");
            }
        }
    }

    fn profile_picture(&mut self, jid: Jid, resp: oneshot::Sender<Option<String>>) {
        match self.store.profile_picture(&jid) {
            Some(Fetched::Some(url)) => {
                let _ = resp.send(Some(url.clone()));
                return;
            }
            Some(Fetched::None) => {
                let _ = resp.send(None);
                return;
            }
            Some(Fetched::NotFetched) | None => {}
        }

        let Some(lookup) = self.lookup.clone() else {
            let _ = resp.send(None);
            return;
        };
        if let Some(waiters) = self.picture_waiters.get_mut(&jid) {
            waiters.push(resp);
            return;
        }
        let Some(loopback) = self.loopback.upgrade() else {
            let _ = resp.send(None);
            return;
        };

        self.picture_waiters.insert(jid.clone(), vec![resp]);
        tokio::spawn(async move {
            let result = lookup.fetch_profile_picture_url(&jid).await;
            let _ = loopback.send(Command::PictureResolved { jid, result }).await;
        });
    }

    fn picture_resolved(&mut self, jid: Jid, result: Result<Option<String>, LookupError>) {
        let url = match result {
            Ok(url) => url,
            Err(err) => {
                warn!(%jid, error = %err, "profile picture lookup failed");
                None
            }
        };
        self.store
            .record_profile_picture(&jid, Fetched::from(url.clone()));

        for waiter in self.picture_waiters.remove(&jid).unwrap_or_default() {
            let _ = waiter.send(url.clone());
        }
    }

    fn group_metadata(
        &mut self,
        jid: Jid,
        source: GroupSource,
        resp: oneshot::Sender<Option<GroupMetadata>>,
    ) {
        match self.store.group_lookup(&jid) {
            GroupLookup::Cached(meta) => {
                let _ = resp.send(Some(meta.clone()));
                return;
            }
            GroupLookup::Unavailable => {
                let _ = resp.send(None);
                return;
            }
            GroupLookup::Unknown => {}
        }

        let Some(lookup) = self.lookup.clone() else {
            let _ = resp.send(None);
            return;
        };
        if let Some(waiters) = self.group_waiters.get_mut(&jid) {
            waiters.push(resp);
            return;
        }
        let Some(loopback) = self.loopback.upgrade() else {
            let _ = resp.send(None);
            return;
        };

        self.group_waiters.insert(jid.clone(), vec![resp]);
        tokio::spawn(async move {
            let result = match source {
                GroupSource::Group => lookup.fetch_group_metadata(&jid).await,
                GroupSource::Broadcast => lookup.fetch_broadcast_list_info(&jid).await,
            };
            let _ = loopback.send(Command::GroupResolved { jid, result }).await;
        });
    }

    fn group_resolved(&mut self, jid: Jid, result: Result<Option<GroupMetadata>, LookupError>) {
        let meta = match result {
            Ok(Some(mut meta)) => {
                if meta.id.is_empty() {
                    meta.id = jid.clone();
                }
                let id = meta.id.clone();
                self.store.cache_group_metadata(meta);
                self.store.group_metadata(&id).cloned()
            }
            Ok(None) => {
                debug!(%jid, "group metadata not found");
                self.store.mark_group_unavailable(&jid);
                None
            }
            Err(err) => {
                warn!(%jid, error = %err, "group metadata lookup failed");
                self.store.mark_group_unavailable(&jid);
                None
            }
        };

        for waiter in self.group_waiters.remove(&jid).unwrap_or_default() {
            let _ = waiter.send(meta.clone());
        }
    }

    async fn checkpoint(&mut self) -> Result<(), RuntimeError> {
        let Some(tx) = &self.persist_tx else {
            return Ok(());
        };

        let (cp_tx, cp_rx) = oneshot::channel();
        tx.send(PersistMsg::Write {
            snapshot: self.store.to_snapshot(),
            resp: Some(cp_tx),
        })
        .await
        .map_err(|_| RuntimeError::ChannelClosed)?;
        cp_rx.await.map_err(|_| RuntimeError::ChannelClosed)??;

        self.events_since_snapshot = 0;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), RuntimeError> {
        let result = if self.config.snapshot_on_shutdown {
            self.checkpoint().await
        } else {
            Ok(())
        };

        if let Some(tx) = self.persist_tx.take() {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                return Err(RuntimeError::ChannelClosed);
            }
            done_rx.await.map_err(|_| RuntimeError::ChannelClosed)?;
        }
        result
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn SnapshotSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    notices_tx: broadcast::Sender<StoreNotice>,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                PersistMsg::Write { snapshot, resp } => {
                    let chats = snapshot.chats.len();
                    let messages = snapshot.message_count();

                    let sink_ref = Arc::clone(&sink);
                    let result = match tokio::task::spawn_blocking(move || {
                        let mut sink = sink_ref.blocking_lock();
                        sink.write_snapshot(&snapshot)
                    })
                    .await
                    {
                        Ok(inner) => inner,
                        Err(e) => Err(PersistError::Worker(format!("join error: {e}"))),
                    };

                    match &result {
                        Ok(()) => {
                            debug!(chats, messages, "checkpoint written");
                            let _ = notices_tx.send(StoreNotice::SnapshotWritten { chats, messages });
                        }
                        Err(err) => warn!(error = %err, "checkpoint failed"),
                    }
                    if let Some(resp) = resp {
                        let _ = resp.send(result);
                    }
                }
                PersistMsg::Shutdown { resp } => {
                    let _ = resp.send(());
                    break;
                }
            }
        }
    });
}
