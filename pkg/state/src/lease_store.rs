use std::sync::Arc;

use pkg_constants::state::PRIMARY_LEASE_KEY;
use pkg_types::lease::LeaseRecord;

use crate::medium::Medium;
use crate::watch::ChangeSignal;

/// The primary lease record on the shared medium.
///
/// `write` is a blind overwrite: the medium offers no compare-and-swap, so
/// two peers racing for an empty slot can both succeed. `ElectionEngine`
/// resolves that after the fact.
#[derive(Clone)]
pub struct LeaseStore {
    medium: Arc<dyn Medium>,
}

impl LeaseStore {
    pub fn new(medium: Arc<dyn Medium>) -> Self {
        Self { medium }
    }

    pub fn key(&self) -> &'static str {
        PRIMARY_LEASE_KEY
    }

    /// Current record. Absent and unparseable both read as `None`; only a
    /// failing medium is an error.
    pub async fn read(&self) -> anyhow::Result<Option<LeaseRecord>> {
        Ok(self
            .medium
            .get(PRIMARY_LEASE_KEY)
            .await?
            .and_then(|data| LeaseRecord::decode(&data)))
    }

    pub async fn write(&self, record: &LeaseRecord) -> anyhow::Result<()> {
        self.medium.set(PRIMARY_LEASE_KEY, &record.encode()?).await
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        self.medium.delete(PRIMARY_LEASE_KEY).await
    }

    /// Changes to the lease made by other peers.
    pub fn subscribe(&self) -> ChangeSignal {
        self.medium.subscribe(PRIMARY_LEASE_KEY)
    }
}
