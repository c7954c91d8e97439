use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use pkg_constants::state::{LEASE_RENEW_INTERVAL_DIVISOR, LEASE_TTL_MS};
use pkg_types::lease::{LeaseRecord, now_millis};
use pkg_types::peer::ElectionState;

use crate::handoff::{HandoffChannel, ensure_not_live_holder};
use crate::identity::PeerIdentity;
use crate::lease_store::LeaseStore;
use crate::medium::Medium;
use crate::watch::{ChangeEvent, ChangeSignal};

/// Lease timing for one peer.
#[derive(Debug, Clone, Copy)]
pub struct ElectionConfig {
    pub lease_ttl: Duration,
    pub renew_interval: Duration,
}

impl ElectionConfig {
    /// Renew every `ttl / LEASE_RENEW_INTERVAL_DIVISOR`.
    pub fn with_ttl(lease_ttl: Duration) -> Self {
        Self {
            lease_ttl,
            renew_interval: lease_ttl / LEASE_RENEW_INTERVAL_DIVISOR as u32,
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self::with_ttl(Duration::from_millis(LEASE_TTL_MS))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Claim,
    Keep,
    Yield,
}

/// Claim decision for a peer that does not currently hold the lease.
fn judge(view: Option<&LeaseRecord>, peer_id: &str, now_ms: i64, ttl: Duration) -> Verdict {
    match view {
        None => Verdict::Claim,
        Some(r) if r.is_held_by(peer_id) => Verdict::Keep,
        Some(r) if r.is_stale(now_ms, ttl) => Verdict::Claim,
        Some(_) => Verdict::Yield,
    }
}

/// Primary election over a shared medium without compare-and-swap.
///
/// Exactly one peer should hold an unexpired lease at a time. Two peers that
/// claim an empty slot in the same instant both write; the last write wins
/// and the loser steps down on its next heartbeat or notification, so
/// exclusion is eventual within one renew interval.
///
/// Triggers are `mount`, `heartbeat`, `on_change` and `unmount`. `start` runs
/// them from a single task, one at a time.
pub struct ElectionEngine {
    peer_id: String,
    leases: LeaseStore,
    handoff: HandoffChannel,
    config: ElectionConfig,
    state: ElectionState,
    /// Medium was unreachable at mount: primary without coordination.
    standalone: bool,
    /// Unmounted or handed off; every trigger is a no-op.
    retired: bool,
    last_renewed_at: Option<i64>,
    primary_tx: watch::Sender<bool>,
    primary_rx: watch::Receiver<bool>,
}

impl ElectionEngine {
    /// Resolve this peer's identity (consuming a pending handoff) and build
    /// the engine.
    pub async fn new(medium: Arc<dyn Medium>, config: ElectionConfig) -> Self {
        let handoff = HandoffChannel::new(medium.clone());
        let peer_id = PeerIdentity::new(handoff).resolve().await;
        Self::with_peer_id(medium, peer_id, config)
    }

    pub fn with_peer_id(medium: Arc<dyn Medium>, peer_id: String, config: ElectionConfig) -> Self {
        let (primary_tx, primary_rx) = watch::channel(false);
        Self {
            peer_id,
            leases: LeaseStore::new(medium.clone()),
            handoff: HandoffChannel::new(medium),
            config,
            state: ElectionState::Unclaimed,
            standalone: false,
            retired: false,
            last_renewed_at: None,
            primary_tx,
            primary_rx,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn is_primary(&self) -> bool {
        self.state == ElectionState::Primary
    }

    pub fn is_standalone(&self) -> bool {
        self.standalone
    }

    pub fn config(&self) -> ElectionConfig {
        self.config
    }

    /// Get a receiver to observe primary changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.primary_rx.clone()
    }

    fn set_state(&mut self, next: ElectionState) {
        if self.state == next {
            return;
        }
        match (self.state, next) {
            (_, ElectionState::Primary) => {
                info!("Peer {} is now PRIMARY", self.peer_id)
            }
            (ElectionState::Primary, ElectionState::Secondary) => {
                warn!(
                    "Peer {} lost primary, another peer holds the lease",
                    self.peer_id
                )
            }
            (_, ElectionState::Secondary) => info!("Peer {} is secondary", self.peer_id),
            (_, ElectionState::Unclaimed) => info!("Peer {} left the election", self.peer_id),
        }
        self.state = next;
        let _ = self.primary_tx.send(next == ElectionState::Primary);
    }

    /// Next renewal timestamp; strictly greater than the previous one.
    fn next_stamp(&self) -> i64 {
        let now = now_millis();
        match self.last_renewed_at {
            Some(last) if now <= last => last + 1,
            _ => now,
        }
    }

    async fn write_own_record(&mut self) -> anyhow::Result<()> {
        let record = LeaseRecord::new(self.peer_id.clone(), self.next_stamp());
        self.leases.write(&record).await?;
        self.last_renewed_at = Some(record.renewed_at);
        Ok(())
    }

    /// A fresh foreign record at least as recent as our own last renewal.
    fn superseded_by(&self, record: &LeaseRecord) -> bool {
        !record.is_held_by(&self.peer_id)
            && !record.is_stale(now_millis(), self.config.lease_ttl)
            && record.renewed_at >= self.last_renewed_at.unwrap_or(i64::MIN)
    }

    /// Decide as a non-holder: claim an absent or stale lease, keep our own,
    /// yield to a fresh foreign one.
    async fn evaluate(&mut self, view: Option<&LeaseRecord>) {
        match judge(view, &self.peer_id, now_millis(), self.config.lease_ttl) {
            Verdict::Claim => {
                if let Some(stale) = view {
                    info!(
                        "Lease held by {} is stale ({}ms old), claiming for {}",
                        stale.holder_id,
                        stale.age_ms(now_millis()),
                        self.peer_id
                    );
                } else {
                    info!("No lease found, claiming for {}", self.peer_id);
                }
                match self.write_own_record().await {
                    Ok(()) => self.set_state(ElectionState::Primary),
                    Err(e) => {
                        warn!("Failed to write lease claim for {}: {}", self.peer_id, e);
                        self.set_state(ElectionState::Secondary);
                    }
                }
            }
            Verdict::Keep => {
                self.last_renewed_at = view.map(|r| r.renewed_at);
                self.set_state(ElectionState::Primary);
            }
            Verdict::Yield => self.set_state(ElectionState::Secondary),
        }
    }

    async fn renew(&mut self) {
        match self.write_own_record().await {
            Ok(()) => debug!("Lease renewed by {}", self.peer_id),
            Err(e) => warn!("Lease renewal failed for {}: {}", self.peer_id, e),
        }
    }

    /// First claim attempt. Falls back to standalone primary if the medium
    /// cannot be read at all.
    pub async fn mount(&mut self) -> ElectionState {
        if self.retired || self.state != ElectionState::Unclaimed {
            return self.state;
        }
        match self.leases.read().await {
            Ok(view) => self.evaluate(view.as_ref()).await,
            Err(e) => {
                warn!(
                    "Shared medium unavailable ({}), peer {} runs standalone as primary",
                    e, self.peer_id
                );
                self.standalone = true;
                self.set_state(ElectionState::Primary);
            }
        }
        self.state
    }

    /// Periodic tick. A primary checks for a conflicting claim and renews;
    /// a secondary re-checks without writing unless the lease is free.
    pub async fn heartbeat(&mut self) {
        if self.retired || self.standalone {
            return;
        }
        match self.state {
            ElectionState::Unclaimed => {}
            ElectionState::Secondary => match self.leases.read().await {
                Ok(view) => self.evaluate(view.as_ref()).await,
                Err(e) => debug!("Lease check failed for {}: {}", self.peer_id, e),
            },
            ElectionState::Primary => {
                match self.leases.read().await {
                    Ok(Some(record)) if self.superseded_by(&record) => {
                        info!(
                            "Lease taken over by {}, {} steps down",
                            record.holder_id, self.peer_id
                        );
                        self.set_state(ElectionState::Secondary);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Lease read before renewal failed: {}", e),
                }
                self.renew().await;
            }
        }
    }

    /// React to a lease change made by another peer, using the delivered
    /// value instead of a fresh read.
    pub async fn on_change(&mut self, event: &ChangeEvent) {
        if self.retired || self.standalone || event.key != self.leases.key() {
            return;
        }
        let view = event.new_value.as_deref().and_then(LeaseRecord::decode);
        match self.state {
            ElectionState::Unclaimed => {}
            ElectionState::Secondary => self.evaluate(view.as_ref()).await,
            ElectionState::Primary => match view {
                Some(record) if record.is_held_by(&self.peer_id) => {}
                Some(record) if self.superseded_by(&record) => {
                    info!(
                        "Conflicting claim by {}, {} steps down",
                        record.holder_id, self.peer_id
                    );
                    self.set_state(ElectionState::Secondary);
                }
                Some(record) if !record.is_stale(now_millis(), self.config.lease_ttl) => {
                    debug!(
                        "Claim by {} predates our renewal, {} reasserts",
                        record.holder_id, self.peer_id
                    );
                    self.renew().await;
                }
                _ => {
                    info!("Lease cleared under primary {}, rewriting", self.peer_id);
                    self.renew().await;
                }
            },
        }
    }

    /// Leave the election. A primary clears the lease if it still names
    /// itself, so the next peer need not wait out the TTL.
    pub async fn unmount(&mut self) {
        if self.retired {
            return;
        }
        self.retired = true;
        if self.state == ElectionState::Primary && !self.standalone {
            match self.leases.read().await {
                Ok(Some(record)) if record.is_held_by(&self.peer_id) => {
                    match self.leases.clear().await {
                        Ok(()) => info!("Peer {} released the lease", self.peer_id),
                        Err(e) => warn!("Failed to release lease for {}: {}", self.peer_id, e),
                    }
                }
                Ok(Some(record)) => info!(
                    "Lease already held by {}, {} leaves it",
                    record.holder_id, self.peer_id
                ),
                Ok(None) => {}
                Err(e) => warn!("Lease read on release failed: {}", e),
            }
        }
        self.set_state(ElectionState::Unclaimed);
    }

    /// Publish `target_id` for the next starting peer to adopt.
    ///
    /// Handing off our own id retires this engine: the lease stays in place
    /// for the inheritor and this peer stops taking part. A foreign id that
    /// still holds a fresh lease is refused.
    pub async fn request_handoff(&mut self, target_id: &str) -> anyhow::Result<()> {
        if target_id != self.peer_id {
            let view = self.leases.read().await?;
            ensure_not_live_holder(view.as_ref(), target_id, now_millis(), self.config.lease_ttl)?;
        }
        self.handoff.publish(target_id).await?;
        if target_id == self.peer_id {
            info!(
                "Peer {} handed its identity off, retiring without release",
                self.peer_id
            );
            self.set_state(ElectionState::Unclaimed);
            self.retired = true;
        }
        Ok(())
    }

    /// Mount, then run the peer loop in a background task.
    pub async fn start(mut self) -> ElectionHandle {
        // Subscribe first so no change between mount and the loop is missed.
        let signal = self.leases.subscribe();
        self.mount().await;

        let peer_id = self.peer_id.clone();
        let primary_rx = self.subscribe();
        let (commands, rx) = mpsc::channel(8);
        let task = tokio::spawn(self.run(signal, rx));

        ElectionHandle {
            peer_id,
            primary_rx,
            commands,
            task,
        }
    }

    async fn run(mut self, signal: ChangeSignal, mut commands: mpsc::Receiver<Command>) {
        info!(
            "ElectionEngine started (peer_id={}, ttl={}ms, renew={}ms)",
            self.peer_id,
            self.config.lease_ttl.as_millis(),
            self.config.renew_interval.as_millis()
        );

        let mut signal = Some(signal);
        let mut interval = tokio::time::interval(self.config.renew_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; mount already covered it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.heartbeat().await,
                change = next_change(&mut signal) => match change {
                    Some(event) => self.on_change(&event).await,
                    None => {
                        warn!(
                            "Change notifications closed for {}, relying on heartbeat",
                            self.peer_id
                        );
                        signal = None;
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Handoff { target_id, reply }) => {
                        let _ = reply.send(self.request_handoff(&target_id).await);
                    }
                    Some(Command::Stop) | None => break,
                },
            }
        }

        drop(signal);
        self.unmount().await;
        info!("ElectionEngine stopped (peer_id={})", self.peer_id);
    }
}

async fn next_change(signal: &mut Option<ChangeSignal>) -> Option<ChangeEvent> {
    match signal {
        Some(signal) => signal.recv().await,
        None => std::future::pending().await,
    }
}

enum Command {
    Handoff {
        target_id: String,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    Stop,
}

/// Handle to a running election loop.
pub struct ElectionHandle {
    peer_id: String,
    primary_rx: watch::Receiver<bool>,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl ElectionHandle {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn is_primary(&self) -> bool {
        *self.primary_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.primary_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn request_handoff(&self, target_id: &str) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Handoff {
                target_id: target_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("election loop for {} is not running", self.peer_id))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("election loop for {} stopped", self.peer_id))?
    }

    /// Graceful shutdown: unmount (releasing the lease) and wait for the loop.
    pub async fn stop(self) -> anyhow::Result<()> {
        // A closed channel means the loop is already on its way out.
        let _ = self.commands.send(Command::Stop).await;
        self.task
            .await
            .map_err(|e| anyhow::anyhow!("election task for {} failed: {}", self.peer_id, e))
    }

    /// Kill the loop without any cleanup; the lease is left to expire.
    pub fn abort(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::{LocalMedium, SharedStore};
    use async_trait::async_trait;
    use pkg_constants::state::{HANDOFF_KEY, PRIMARY_LEASE_KEY};
    use std::sync::atomic::{AtomicBool, Ordering};

    const LONG_TTL: Duration = Duration::from_secs(30);

    fn engine(shared: &SharedStore, origin: &str, peer_id: &str, ttl: Duration) -> ElectionEngine {
        ElectionEngine::with_peer_id(
            Arc::new(shared.attach(origin)),
            peer_id.to_string(),
            ElectionConfig::with_ttl(ttl),
        )
    }

    async fn lease(shared: &SharedStore) -> Option<LeaseRecord> {
        shared
            .get(PRIMARY_LEASE_KEY)
            .await
            .unwrap()
            .and_then(|d| LeaseRecord::decode(&d))
    }

    async fn put_lease(shared: &SharedStore, origin: &str, record: &LeaseRecord) {
        shared
            .put(origin, PRIMARY_LEASE_KEY, &record.encode().unwrap())
            .await
            .unwrap();
    }

    async fn wait_primary(rx: &mut watch::Receiver<bool>, want: bool) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|p| *p == want))
            .await
            .expect("timed out waiting for role change")
            .unwrap();
    }

    /// Medium wrapper whose reads or writes can be switched to fail.
    struct FlakyMedium {
        inner: LocalMedium,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl FlakyMedium {
        fn new(inner: LocalMedium) -> Self {
            Self {
                inner,
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
            }
        }

        fn check(&self, flag: &AtomicBool) -> anyhow::Result<()> {
            if flag.load(Ordering::SeqCst) {
                anyhow::bail!("medium unavailable");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Medium for FlakyMedium {
        fn origin(&self) -> &str {
            self.inner.origin()
        }

        async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            self.check(&self.fail_reads)?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
            self.check(&self.fail_writes)?;
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.check(&self.fail_writes)?;
            self.inner.delete(key).await
        }

        async fn take(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            self.check(&self.fail_writes)?;
            self.inner.take(key).await
        }

        fn subscribe(&self, key: &str) -> ChangeSignal {
            self.inner.subscribe(key)
        }
    }

    #[test]
    fn default_config_renews_at_a_third_of_ttl() {
        let cfg = ElectionConfig::default();
        assert_eq!(cfg.lease_ttl, Duration::from_secs(30));
        assert_eq!(cfg.renew_interval, Duration::from_secs(10));
    }

    #[test]
    fn judge_rules() {
        let ttl = LONG_TTL;
        let now = 1_000_000;
        assert_eq!(judge(None, "a", now, ttl), Verdict::Claim);
        let own = LeaseRecord::new("a", now - 100_000);
        assert_eq!(judge(Some(&own), "a", now, ttl), Verdict::Keep);
        let stale = LeaseRecord::new("b", now - 30_000);
        assert_eq!(judge(Some(&stale), "a", now, ttl), Verdict::Claim);
        let fresh = LeaseRecord::new("b", now - 29_999);
        assert_eq!(judge(Some(&fresh), "a", now, ttl), Verdict::Yield);
    }

    #[tokio::test]
    async fn claims_empty_store() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);

        assert_eq!(a.mount().await, ElectionState::Primary);
        assert!(a.is_primary());
        assert!(*a.subscribe().borrow());
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-a");
    }

    #[tokio::test]
    async fn fresh_foreign_lease_blocks_claim_without_write() {
        let shared = SharedStore::in_memory().await.unwrap();
        put_lease(&shared, "tab-x", &LeaseRecord::renewed_now("peer-x")).await;
        let seq = shared.events().current_seq().await;

        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        assert_eq!(a.mount().await, ElectionState::Secondary);
        assert!(!*a.subscribe().borrow());
        assert_eq!(shared.events().current_seq().await, seq);
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-x");

        // a secondary tick reads but never writes
        a.heartbeat().await;
        assert_eq!(a.state(), ElectionState::Secondary);
        assert_eq!(shared.events().current_seq().await, seq);
    }

    #[tokio::test]
    async fn reclaims_stale_lease() {
        let shared = SharedStore::in_memory().await.unwrap();
        let renewed_at = now_millis() - (LONG_TTL.as_millis() as i64 + 1);
        put_lease(&shared, "tab-x", &LeaseRecord::new("peer-x", renewed_at)).await;

        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        assert_eq!(a.mount().await, ElectionState::Primary);
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-a");
    }

    #[tokio::test]
    async fn reclaims_own_lease_after_remount() {
        let shared = SharedStore::in_memory().await.unwrap();
        put_lease(&shared, "tab-old", &LeaseRecord::renewed_now("peer-a")).await;
        let seq = shared.events().current_seq().await;

        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        assert_eq!(a.mount().await, ElectionState::Primary);
        assert_eq!(shared.events().current_seq().await, seq);
    }

    #[tokio::test]
    async fn corrupt_lease_is_claimed() {
        let shared = SharedStore::in_memory().await.unwrap();
        shared
            .put("tab-x", PRIMARY_LEASE_KEY, b"\x00\x01 not a lease")
            .await
            .unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        assert_eq!(a.mount().await, ElectionState::Primary);
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-a");
    }

    #[tokio::test]
    async fn heartbeat_strictly_advances_lease() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        a.mount().await;

        let mut last = lease(&shared).await.unwrap().renewed_at;
        for _ in 0..3 {
            a.heartbeat().await;
            let now = lease(&shared).await.unwrap();
            assert_eq!(now.holder_id, "peer-a");
            assert!(now.renewed_at > last, "{} should exceed {}", now.renewed_at, last);
            last = now.renewed_at;
        }
    }

    #[tokio::test]
    async fn graceful_release_clears_own_lease() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        a.mount().await;
        a.unmount().await;

        assert_eq!(a.state(), ElectionState::Unclaimed);
        assert!(lease(&shared).await.is_none());

        // terminal: a second mount does nothing
        assert_eq!(a.mount().await, ElectionState::Unclaimed);
        assert!(lease(&shared).await.is_none());
    }

    #[tokio::test]
    async fn release_leaves_foreign_lease_alone() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        a.mount().await;
        put_lease(&shared, "tab-b", &LeaseRecord::renewed_now("peer-b")).await;

        a.unmount().await;
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-b");
    }

    #[tokio::test]
    async fn secondary_unmount_touches_nothing() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        let mut b = engine(&shared, "tab-b", "peer-b", LONG_TTL);
        a.mount().await;
        b.mount().await;
        let seq = shared.events().current_seq().await;

        b.unmount().await;
        assert_eq!(shared.events().current_seq().await, seq);
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-a");
    }

    #[tokio::test]
    async fn two_peers_in_succession() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        let mut b = engine(&shared, "tab-b", "peer-b", LONG_TTL);

        assert_eq!(a.mount().await, ElectionState::Primary);
        assert_eq!(b.mount().await, ElectionState::Secondary);
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-a");
    }

    #[tokio::test]
    async fn secondary_promotes_on_release_notification() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        let mut b = engine(&shared, "tab-b", "peer-b", LONG_TTL);
        a.mount().await;
        b.mount().await;
        assert_eq!(b.state(), ElectionState::Secondary);
        let mut signal_b = b.leases.subscribe();

        a.unmount().await;
        let event = signal_b.recv().await.unwrap();
        assert!(event.new_value.is_none());
        b.on_change(&event).await;

        assert_eq!(b.state(), ElectionState::Primary);
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-b");
    }

    #[tokio::test]
    async fn fresh_foreign_notification_keeps_secondary() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        let mut b = engine(&shared, "tab-b", "peer-b", LONG_TTL);
        let mut signal_b = b.leases.subscribe();
        a.mount().await;
        b.mount().await;

        // the mount claim itself, then a renewal
        a.heartbeat().await;
        while let Some(event) = signal_b.try_recv() {
            b.on_change(&event).await;
        }
        assert_eq!(b.state(), ElectionState::Secondary);
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-a");
    }

    #[tokio::test]
    async fn racing_claim_resolved_on_next_heartbeat() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        a.mount().await;

        // peer-b saw the slot empty at the same time and wrote last
        let racing = LeaseRecord::new("peer-b", a.last_renewed_at.unwrap() + 1);
        put_lease(&shared, "tab-b", &racing).await;

        a.heartbeat().await;
        assert_eq!(a.state(), ElectionState::Secondary);
        assert_eq!(lease(&shared).await.unwrap(), racing);
    }

    #[tokio::test]
    async fn racing_claim_resolved_by_notification() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        let mut signal_a = a.leases.subscribe();
        a.mount().await;

        let racing = LeaseRecord::new("peer-b", a.last_renewed_at.unwrap() + 5);
        put_lease(&shared, "tab-b", &racing).await;
        let event = signal_a.recv().await.unwrap();
        a.on_change(&event).await;

        assert_eq!(a.state(), ElectionState::Secondary);
        // the foreign record is not deleted
        assert_eq!(lease(&shared).await.unwrap(), racing);
    }

    #[tokio::test]
    async fn older_foreign_claim_is_overridden() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        let mut signal_a = a.leases.subscribe();
        a.mount().await;

        let older = LeaseRecord::new("peer-b", a.last_renewed_at.unwrap() - 10);
        put_lease(&shared, "tab-b", &older).await;
        let event = signal_a.recv().await.unwrap();
        a.on_change(&event).await;

        assert_eq!(a.state(), ElectionState::Primary);
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-a");
    }

    #[tokio::test]
    async fn primary_rewrites_cleared_lease() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        let mut signal_a = a.leases.subscribe();
        a.mount().await;

        shared.delete("tab-x", PRIMARY_LEASE_KEY).await.unwrap();
        let event = signal_a.recv().await.unwrap();
        a.on_change(&event).await;

        assert!(a.is_primary());
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-a");
    }

    #[tokio::test]
    async fn crashed_primary_blocks_until_ttl() {
        let ttl = Duration::from_millis(1_000);
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", ttl);
        a.mount().await;
        // crash: no unmount
        drop(a);

        let mut early = engine(&shared, "tab-b", "peer-b", ttl);
        assert_eq!(early.mount().await, ElectionState::Secondary);

        tokio::time::sleep(ttl + Duration::from_millis(100)).await;
        let mut late = engine(&shared, "tab-c", "peer-c", ttl);
        assert_eq!(late.mount().await, ElectionState::Primary);
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-c");
    }

    #[tokio::test]
    async fn running_secondary_reclaims_after_crash_without_notification() {
        let ttl = Duration::from_millis(1_000);
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", ttl);
        let mut b = engine(&shared, "tab-b", "peer-b", ttl);
        a.mount().await;
        b.mount().await;
        drop(a);

        b.heartbeat().await;
        assert_eq!(b.state(), ElectionState::Secondary);

        tokio::time::sleep(ttl + Duration::from_millis(100)).await;
        b.heartbeat().await;
        assert_eq!(b.state(), ElectionState::Primary);
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-b");
    }

    #[tokio::test]
    async fn unavailable_medium_runs_standalone() {
        let shared = SharedStore::in_memory().await.unwrap();
        let medium = FlakyMedium::new(shared.attach("tab-a"));
        medium.fail_reads.store(true, Ordering::SeqCst);
        medium.fail_writes.store(true, Ordering::SeqCst);

        let mut a = ElectionEngine::with_peer_id(
            Arc::new(medium),
            "peer-a".to_string(),
            ElectionConfig::with_ttl(LONG_TTL),
        );
        assert_eq!(a.mount().await, ElectionState::Primary);
        assert!(a.is_standalone());

        a.heartbeat().await;
        assert!(a.is_primary());
        a.unmount().await;
        assert_eq!(a.state(), ElectionState::Unclaimed);
    }

    #[tokio::test]
    async fn renewal_failure_keeps_primary() {
        let shared = SharedStore::in_memory().await.unwrap();
        let medium = Arc::new(FlakyMedium::new(shared.attach("tab-a")));
        let mut a = ElectionEngine::with_peer_id(
            medium.clone(),
            "peer-a".to_string(),
            ElectionConfig::with_ttl(LONG_TTL),
        );
        a.mount().await;
        let before = lease(&shared).await.unwrap();

        medium.fail_writes.store(true, Ordering::SeqCst);
        a.heartbeat().await;
        assert!(a.is_primary());
        assert_eq!(lease(&shared).await.unwrap(), before);

        medium.fail_writes.store(false, Ordering::SeqCst);
        a.heartbeat().await;
        assert!(lease(&shared).await.unwrap().renewed_at > before.renewed_at);
    }

    #[tokio::test]
    async fn failed_claim_leaves_peer_secondary() {
        let shared = SharedStore::in_memory().await.unwrap();
        let medium = Arc::new(FlakyMedium::new(shared.attach("tab-a")));
        medium.fail_writes.store(true, Ordering::SeqCst);
        let mut a = ElectionEngine::with_peer_id(
            medium.clone(),
            "peer-a".to_string(),
            ElectionConfig::with_ttl(LONG_TTL),
        );
        assert_eq!(a.mount().await, ElectionState::Secondary);

        medium.fail_writes.store(false, Ordering::SeqCst);
        a.heartbeat().await;
        assert_eq!(a.state(), ElectionState::Primary);
    }

    #[tokio::test]
    async fn own_identity_handoff_passes_primary_to_new_peer() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut old = engine(&shared, "tab-old", "peer-a", LONG_TTL);
        old.mount().await;

        old.request_handoff("peer-a").await.unwrap();
        assert_eq!(old.state(), ElectionState::Unclaimed);
        // retired: neither ticks nor unmount touch the lease
        old.heartbeat().await;
        old.unmount().await;
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-a");

        let mut new = ElectionEngine::new(
            Arc::new(shared.attach("tab-new")),
            ElectionConfig::with_ttl(LONG_TTL),
        )
        .await;
        assert_eq!(new.peer_id(), "peer-a");
        assert_eq!(new.mount().await, ElectionState::Primary);
        assert!(shared.get(HANDOFF_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn foreign_handoff_does_not_retire() {
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", LONG_TTL);
        a.mount().await;
        a.request_handoff("peer-z").await.unwrap();
        assert!(a.is_primary());
        assert!(a.request_handoff("not valid").await.is_err());
    }

    #[tokio::test]
    async fn handoff_to_live_primary_is_refused() {
        let ttl = Duration::from_millis(1_000);
        let shared = SharedStore::in_memory().await.unwrap();
        let mut a = engine(&shared, "tab-a", "peer-a", ttl);
        let mut b = engine(&shared, "tab-b", "peer-b", ttl);
        a.mount().await;
        b.mount().await;

        assert!(b.request_handoff("peer-a").await.is_err());
        assert!(shared.get(HANDOFF_KEY).await.unwrap().is_none());
        assert_eq!(b.state(), ElectionState::Secondary);

        // once peer-a's lease has expired its id is free to inherit
        tokio::time::sleep(ttl + Duration::from_millis(100)).await;
        b.request_handoff("peer-a").await.unwrap();
        assert!(shared.get(HANDOFF_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn started_peers_hand_over_on_stop() {
        let shared = SharedStore::in_memory().await.unwrap();
        let a = engine(&shared, "tab-a", "peer-a", LONG_TTL).start().await;
        let b = engine(&shared, "tab-b", "peer-b", LONG_TTL).start().await;
        assert!(a.is_primary());
        assert!(!b.is_primary());

        let mut b_rx = b.subscribe();
        a.stop().await.unwrap();
        // notification driven: far sooner than the 30s TTL
        wait_primary(&mut b_rx, true).await;
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-b");

        b.stop().await.unwrap();
        assert!(lease(&shared).await.is_none());
    }

    #[tokio::test]
    async fn aborted_peer_is_replaced_after_ttl() {
        let ttl = Duration::from_millis(1_000);
        let shared = SharedStore::in_memory().await.unwrap();
        let a = engine(&shared, "tab-a", "peer-a", ttl).start().await;
        let b = engine(&shared, "tab-b", "peer-b", ttl).start().await;
        assert!(a.is_primary());

        a.abort();
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-a");

        let mut b_rx = b.subscribe();
        wait_primary(&mut b_rx, true).await;
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-b");
        b.stop().await.unwrap();
    }

    #[tokio::test]
    async fn handle_handoff_retires_loop() {
        let shared = SharedStore::in_memory().await.unwrap();
        let a = engine(&shared, "tab-a", "peer-a", LONG_TTL).start().await;
        let mut a_rx = a.subscribe();

        a.request_handoff("peer-a").await.unwrap();
        wait_primary(&mut a_rx, false).await;
        a.stop().await.unwrap();
        assert_eq!(lease(&shared).await.unwrap().holder_id, "peer-a");

        let b = ElectionEngine::new(
            Arc::new(shared.attach("tab-b")),
            ElectionConfig::with_ttl(LONG_TTL),
        )
        .await
        .start()
        .await;
        assert_eq!(b.peer_id(), "peer-a");
        assert!(b.is_primary());
        b.stop().await.unwrap();
    }
}
