use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use pkg_constants::state::{EVENT_BROADCAST_CAPACITY, EVENT_LOG_CAPACITY};

use crate::client::StateStore;
use crate::watch::{ChangeSignal, EventLog};

/// The shared key-value medium as seen by one peer.
///
/// Every peer talks to the medium through its own handle; the handle's
/// `origin` tags its writes so that change notifications reach every peer
/// except the writer.
#[async_trait]
pub trait Medium: Send + Sync {
    /// Origin tag attached to this handle's writes.
    fn origin(&self) -> &str;

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Unconditional overwrite.
    async fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;

    /// Delete a key; no-op if absent.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Read and delete a key in one step. Of several concurrent callers at
    /// most one sees the value.
    async fn take(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Subscribe to changes of `key` made through other handles.
    fn subscribe(&self, key: &str) -> ChangeSignal;
}

/// Host-side medium: a SlateDB store plus the event log of its mutations.
///
/// Mutations are serialized so each event carries the exact old/new pair.
#[derive(Clone)]
pub struct SharedStore {
    store: StateStore,
    events: EventLog,
    write_lock: Arc<Mutex<()>>,
}

impl SharedStore {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            events: EventLog::new(EVENT_LOG_CAPACITY, EVENT_BROADCAST_CAPACITY),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// A shared store over an in-memory SlateDB instance.
    pub async fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(StateStore::in_memory().await?))
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Hand out a medium handle for the peer instance tagged `origin`.
    pub fn attach(&self, origin: impl Into<String>) -> LocalMedium {
        LocalMedium {
            shared: self.clone(),
            origin: origin.into(),
        }
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.store.get(key).await
    }

    pub async fn put(&self, origin: &str, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let old = self.store.get(key).await?;
        self.store.put(key, value).await?;
        let event = self
            .events
            .emit(key, old, Some(value.to_vec()), origin)
            .await;
        debug!("put {} by {} (seq={})", key, origin, event.seq);
        Ok(())
    }

    pub async fn delete(&self, origin: &str, key: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.remove_locked(origin, key).await.map(|_| ())
    }

    pub async fn take(&self, origin: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let _guard = self.write_lock.lock().await;
        self.remove_locked(origin, key).await
    }

    /// Caller must hold `write_lock`.
    async fn remove_locked(&self, origin: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(old) = self.store.get(key).await? else {
            return Ok(None);
        };
        self.store.delete(key).await?;
        let event = self.events.emit(key, Some(old.clone()), None, origin).await;
        debug!("delete {} by {} (seq={})", key, origin, event.seq);
        Ok(Some(old))
    }

    /// Gracefully close the underlying store.
    pub async fn close(self) -> anyhow::Result<()> {
        self.store.close().await
    }
}

/// In-process medium handle bound to one origin.
#[derive(Clone)]
pub struct LocalMedium {
    shared: SharedStore,
    origin: String,
}

#[async_trait]
impl Medium for LocalMedium {
    fn origin(&self) -> &str {
        &self.origin
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.shared.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.shared.put(&self.origin, key, value).await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.shared.delete(&self.origin, key).await
    }

    async fn take(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.shared.take(&self.origin, key).await
    }

    fn subscribe(&self, key: &str) -> ChangeSignal {
        ChangeSignal::new(self.shared.events.subscribe(), &self.origin, key)
    }
}
