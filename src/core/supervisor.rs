use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::core::hub::BroadcastHub;
use crate::core::machine::{
    AuctionMachine, CloseOutcome, CommitError, CommitJob, CommitResult,
};
use crate::domain::{
    AuctionEvent, AuctionId, AuctionSpec, AuctionStatus, AuctionStore, BidRecord, BidderId,
    StatusView,
};
use crate::utils::errors::AuctionError;
use crate::utils::helpers::current_unix_ms;

/// Timing knobs for the supervisor's background sweep.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// How often expired auctions are closed and failed status writes
    /// retried.
    pub sweep_interval: Duration,
    /// How long a closed auction stays in memory once it has no observers.
    pub eviction_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            sweep_interval: Duration::from_millis(500),
            eviction_grace: Duration::from_secs(60),
        }
    }
}

struct AuctionHandle {
    machine: Arc<AuctionMachine>,
    _commit_task: JoinHandle<()>,
}

/// Owns the registry of live `AuctionMachine` instances, lazily
/// materializing one from its persisted snapshot on first reference and
/// evicting it once closed, recorded, past the grace period, and
/// unobserved. Also runs the recurring sweep that force-closes auctions
/// whose deadline has passed — the only automatic transition path.
pub struct AuctionSupervisor {
    machines: RwLock<HashMap<AuctionId, AuctionHandle>>,
    store: Arc<dyn AuctionStore>,
    hub: Arc<BroadcastHub>,
    config: SupervisorConfig,
}

impl AuctionSupervisor {
    pub fn new(
        store: Arc<dyn AuctionStore>,
        hub: Arc<BroadcastHub>,
        config: SupervisorConfig,
    ) -> Self {
        AuctionSupervisor {
            machines: RwLock::new(HashMap::new()),
            store,
            hub,
            config,
        }
    }

    /// Persists a new `pending` auction and returns its id. The machine is
    /// materialized lazily, on the auction's first use.
    pub async fn create_auction(&self, spec: AuctionSpec) -> Result<AuctionId, AuctionError> {
        let auction_id = self
            .store
            .create_auction(&spec, current_unix_ms())
            .await?;
        info!(auction_id, vehicle_id = spec.vehicle_id, "auction created");
        Ok(auction_id)
    }

    /// Activates a pending auction. The caller gets the fresh status view
    /// once the transition is durably recorded.
    pub async fn start_auction(&self, auction_id: AuctionId) -> Result<StatusView, AuctionError> {
        let machine = self.machine(auction_id).await?;
        let now = current_unix_ms();
        let commit = machine.start(now).await?;
        Self::await_commit(commit).await?;
        info!(auction_id, "auction started");
        Ok(machine.status(current_unix_ms()).await)
    }

    /// Closes an auction and reports the winner, if the reserve was met.
    /// Idempotent: ending an already-closed auction re-reports its outcome
    /// without a second winner determination or broadcast.
    pub async fn end_auction(
        &self,
        auction_id: AuctionId,
    ) -> Result<Option<BidderId>, AuctionError> {
        let machine = self.machine(auction_id).await?;
        match machine.close(current_unix_ms()).await {
            CloseOutcome::Closed { winner_id, commit } => {
                Self::await_commit(commit).await?;
                info!(auction_id, ?winner_id, "auction closed");
                Ok(winner_id)
            }
            CloseOutcome::AlreadyClosed { winner_id } => Ok(winner_id),
        }
    }

    /// Non-mutating status read.
    pub async fn status(&self, auction_id: AuctionId) -> Result<StatusView, AuctionError> {
        let machine = self.machine(auction_id).await?;
        Ok(machine.status(current_unix_ms()).await)
    }

    /// Recorded bid history, oldest first.
    pub async fn bid_history(
        &self,
        auction_id: AuctionId,
    ) -> Result<Vec<BidRecord>, AuctionError> {
        // Resolve the machine first so an unknown id surfaces as NotFound.
        self.machine(auction_id).await?;
        Ok(self.store.list_bids(auction_id).await?)
    }

    /// Returns the live machine for an auction, materializing it from the
    /// store on first reference.
    pub(crate) async fn machine(
        &self,
        auction_id: AuctionId,
    ) -> Result<Arc<AuctionMachine>, AuctionError> {
        if let Some(handle) = self.machines.read().await.get(&auction_id) {
            return Ok(Arc::clone(&handle.machine));
        }

        let snapshot = self
            .store
            .load_auction(auction_id)
            .await?
            .ok_or(AuctionError::NotFound(auction_id))?;

        let mut machines = self.machines.write().await;
        // Another task may have materialized the machine while we loaded.
        if let Some(handle) = machines.get(&auction_id) {
            return Ok(Arc::clone(&handle.machine));
        }

        let (machine, commits) = AuctionMachine::from_snapshot(snapshot);
        let machine = Arc::new(machine);
        let commit_task = tokio::spawn(run_commit_queue(
            auction_id,
            Arc::downgrade(&machine),
            commits,
            Arc::clone(&self.store),
            Arc::clone(&self.hub),
        ));
        debug!(auction_id, "auction machine materialized");
        machines.insert(
            auction_id,
            AuctionHandle {
                machine: Arc::clone(&machine),
                _commit_task: commit_task,
            },
        );
        Ok(machine)
    }

    /// Spawns the recurring sweep in the background.
    pub fn start_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(supervisor.config.sweep_interval);
            loop {
                ticker.tick().await;
                supervisor.sweep(current_unix_ms()).await;
            }
        })
    }

    /// One sweep pass: close expired auctions, retry unrecorded status
    /// writes, and evict closed auctions nobody is watching anymore. A
    /// failure on one auction never halts the pass for the others.
    pub async fn sweep(&self, now_ms: u64) {
        let machines: Vec<(AuctionId, Arc<AuctionMachine>)> = {
            let guard = self.machines.read().await;
            guard
                .iter()
                .map(|(id, handle)| (*id, Arc::clone(&handle.machine)))
                .collect()
        };

        let mut evictable = Vec::new();
        for (auction_id, machine) in machines {
            let state = machine.sweep_state().await;
            match state.status {
                AuctionStatus::Active if state.ends_at_ms.is_some_and(|ends| now_ms >= ends) => {
                    if let CloseOutcome::Closed { winner_id, .. } = machine.close(now_ms).await {
                        info!(auction_id, ?winner_id, "auction expired and closed");
                    }
                }
                AuctionStatus::Closed if !state.dirty => {
                    let grace_ms = self.config.eviction_grace.as_millis() as u64;
                    let quiesced = state
                        .closed_at_ms
                        .is_none_or(|closed| now_ms >= closed + grace_ms);
                    if quiesced && self.hub.observer_count(auction_id).await == 0 {
                        evictable.push(auction_id);
                    }
                }
                _ => {}
            }
            // A transition whose durable write failed earlier is retried on
            // every tick until the store accepts it.
            if state.dirty {
                machine.resync_status().await;
            }
        }

        if !evictable.is_empty() {
            let mut guard = self.machines.write().await;
            for auction_id in evictable {
                guard.remove(&auction_id);
                self.hub.remove(auction_id).await;
                debug!(auction_id, "auction machine evicted");
            }
        }
    }

    async fn await_commit(
        commit: tokio::sync::oneshot::Receiver<CommitResult>,
    ) -> Result<(), AuctionError> {
        match commit.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(CommitError::Store(err))) => Err(AuctionError::StoreWrite(err)),
            Ok(Err(CommitError::Evicted)) | Err(_) => Err(AuctionError::Unavailable),
        }
    }
}

/// Drains one auction's commit queue in acceptance order: persist, then
/// publish. This is the single writer for the auction's event topic, which
/// is what gives observers a delivery order consistent with acceptance.
async fn run_commit_queue(
    auction_id: AuctionId,
    machine: Weak<AuctionMachine>,
    mut commits: mpsc::UnboundedReceiver<CommitJob>,
    store: Arc<dyn AuctionStore>,
    hub: Arc<BroadcastHub>,
) {
    while let Some(job) = commits.recv().await {
        let Some(machine) = machine.upgrade() else {
            fail_job(job, CommitError::Evicted);
            continue;
        };
        match job {
            CommitJob::RecordBid {
                bidder_id,
                amount,
                accepted_at_ms,
                previous,
                reply,
            } => {
                match store
                    .record_bid(auction_id, bidder_id, amount, accepted_at_ms)
                    .await
                {
                    Ok(()) => {
                        hub.publish(auction_id, AuctionEvent::BidAccepted { amount, bidder_id })
                            .await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(err) => {
                        // An accepted-but-unpersisted bid is a consistency
                        // near-miss; the in-memory leader must not outrun
                        // the durable record.
                        error!(
                            auction_id,
                            bidder_id,
                            amount,
                            error = %err,
                            "bid persistence failed, rolling back in-memory highest bid"
                        );
                        let reverted = machine.revert_bid(amount, bidder_id, previous).await;
                        if !reverted {
                            warn!(
                                auction_id,
                                amount, "failed bid already superseded, rollback skipped"
                            );
                        }
                        let _ = reply.send(Err(CommitError::Store(err)));
                    }
                }
            }
            CommitJob::SyncStatus { reply } => {
                let Some(sync) = machine.status_to_sync().await else {
                    // Already recorded by an earlier job in this queue.
                    if let Some(reply) = reply {
                        let _ = reply.send(Ok(()));
                    }
                    continue;
                };
                match store
                    .update_status(auction_id, sync.status, sync.winner_id, sync.ends_at_ms)
                    .await
                {
                    Ok(()) => {
                        machine.confirm_status_recorded(sync.status).await;
                        let now = current_unix_ms();
                        let ends_in_seconds = (sync.status == AuctionStatus::Active)
                            .then(|| sync.ends_at_ms.map(|ends| ends.saturating_sub(now) / 1000))
                            .flatten();
                        hub.publish(
                            auction_id,
                            AuctionEvent::Status {
                                status: sync.status,
                                ends_in_seconds,
                                winner_id: sync.winner_id,
                            },
                        )
                        .await;
                        let _ = reply.map(|reply| reply.send(Ok(())));
                    }
                    Err(err) => {
                        warn!(
                            auction_id,
                            status = %sync.status,
                            error = %err,
                            "status write failed, will retry on the next sweep"
                        );
                        let _ = reply.map(|reply| reply.send(Err(CommitError::Store(err))));
                    }
                }
            }
        }
    }
}

fn fail_job(job: CommitJob, err: CommitError) {
    match job {
        CommitJob::RecordBid { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        CommitJob::SyncStatus { reply } => {
            if let Some(reply) = reply {
                let _ = reply.send(Err(err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::db::memory::MemoryAuctionStore;
    use crate::domain::{AuctionSnapshot, BidRecord};
    use crate::utils::errors::StoreError;

    /// Store wrapper that fails a configured number of status writes.
    struct FailingStatusStore {
        inner: MemoryAuctionStore,
        failures_left: AtomicU32,
    }

    impl FailingStatusStore {
        fn failing(times: u32) -> Self {
            FailingStatusStore {
                inner: MemoryAuctionStore::new(),
                failures_left: AtomicU32::new(times),
            }
        }
    }

    #[async_trait]
    impl AuctionStore for FailingStatusStore {
        async fn create_auction(
            &self,
            spec: &AuctionSpec,
            created_at_ms: u64,
        ) -> Result<AuctionId, StoreError> {
            self.inner.create_auction(spec, created_at_ms).await
        }

        async fn load_auction(
            &self,
            id: AuctionId,
        ) -> Result<Option<AuctionSnapshot>, StoreError> {
            self.inner.load_auction(id).await
        }

        async fn record_bid(
            &self,
            id: AuctionId,
            bidder_id: BidderId,
            amount: u64,
            accepted_at_ms: u64,
        ) -> Result<(), StoreError> {
            self.inner.record_bid(id, bidder_id, amount, accepted_at_ms).await
        }

        async fn update_status(
            &self,
            id: AuctionId,
            status: AuctionStatus,
            winner_id: Option<BidderId>,
            ends_at_ms: Option<u64>,
        ) -> Result<(), StoreError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok()
            {
                return Err(StoreError::Database("status table unavailable".into()));
            }
            self.inner.update_status(id, status, winner_id, ends_at_ms).await
        }

        async fn list_bids(&self, id: AuctionId) -> Result<Vec<BidRecord>, StoreError> {
            self.inner.list_bids(id).await
        }
    }

    fn spec(duration: Duration) -> AuctionSpec {
        AuctionSpec {
            vehicle_id: 42,
            starting_bid: 1000,
            reserve_price: 1500,
            duration,
        }
    }

    fn supervisor_with(
        store: Arc<dyn AuctionStore>,
        config: SupervisorConfig,
    ) -> (Arc<AuctionSupervisor>, Arc<BroadcastHub>) {
        let hub = Arc::new(BroadcastHub::new());
        let supervisor = Arc::new(AuctionSupervisor::new(store, Arc::clone(&hub), config));
        (supervisor, hub)
    }

    #[tokio::test]
    async fn unknown_auction_is_not_found() {
        let (supervisor, _hub) = supervisor_with(
            Arc::new(MemoryAuctionStore::new()),
            SupervisorConfig::default(),
        );
        assert!(matches!(
            supervisor.status(999).await,
            Err(AuctionError::NotFound(999))
        ));
    }

    #[tokio::test]
    async fn sweep_closes_expired_auctions_only() {
        let store = Arc::new(MemoryAuctionStore::new());
        let (supervisor, _hub) =
            supervisor_with(Arc::clone(&store) as _, SupervisorConfig::default());

        let expiring = supervisor
            .create_auction(spec(Duration::from_millis(100)))
            .await
            .unwrap();
        let running = supervisor
            .create_auction(spec(Duration::from_secs(600)))
            .await
            .unwrap();
        supervisor.start_auction(expiring).await.unwrap();
        supervisor.start_auction(running).await.unwrap();

        supervisor.sweep(current_unix_ms() + 200).await;

        assert_eq!(
            supervisor.status(expiring).await.unwrap().status,
            AuctionStatus::Closed
        );
        assert_eq!(
            supervisor.status(running).await.unwrap().status,
            AuctionStatus::Active
        );
    }

    #[tokio::test]
    async fn failed_close_write_is_retried_by_the_sweep() {
        let store = Arc::new(FailingStatusStore::failing(0));
        let (supervisor, hub) =
            supervisor_with(Arc::clone(&store) as _, SupervisorConfig::default());

        let id = supervisor
            .create_auction(spec(Duration::from_secs(600)))
            .await
            .unwrap();
        supervisor.start_auction(id).await.unwrap();
        let mut observer = hub.register(id, None).await;

        // The close applies in memory but its durable write fails.
        store.failures_left.store(1, Ordering::SeqCst);
        assert!(matches!(
            supervisor.end_auction(id).await,
            Err(AuctionError::StoreWrite(_))
        ));
        assert_eq!(
            supervisor.status(id).await.unwrap().status,
            AuctionStatus::Closed
        );
        assert_eq!(
            store.inner.load_auction(id).await.unwrap().unwrap().status,
            AuctionStatus::Active
        );

        // The next sweep pass lands the write and publishes the one and
        // only closed event.
        supervisor.sweep(current_unix_ms()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            store.inner.load_auction(id).await.unwrap().unwrap().status,
            AuctionStatus::Closed
        );

        let event = observer.recv().await.unwrap();
        assert!(matches!(
            event,
            AuctionEvent::Status {
                status: AuctionStatus::Closed,
                ..
            }
        ));
        // Further sweeps publish nothing new.
        supervisor.sweep(current_unix_ms()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.observer_count(id).await, 1);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), observer.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn closed_auctions_are_evicted_and_rematerialize_from_the_store() {
        let store = Arc::new(MemoryAuctionStore::new());
        let (supervisor, _hub) = supervisor_with(
            Arc::clone(&store) as _,
            SupervisorConfig {
                sweep_interval: Duration::from_millis(50),
                eviction_grace: Duration::ZERO,
            },
        );

        let id = supervisor
            .create_auction(spec(Duration::from_secs(600)))
            .await
            .unwrap();
        supervisor.start_auction(id).await.unwrap();
        let winner = supervisor.end_auction(id).await.unwrap();
        assert_eq!(winner, None);

        supervisor.sweep(current_unix_ms() + 1).await;
        assert!(supervisor.machines.read().await.is_empty());

        // A later status read reloads the persisted outcome.
        let view = supervisor.status(id).await.unwrap();
        assert_eq!(view.status, AuctionStatus::Closed);
        assert_eq!(view.winner_id, None);
    }

    #[tokio::test]
    async fn observed_auctions_are_not_evicted() {
        let store = Arc::new(MemoryAuctionStore::new());
        let (supervisor, hub) = supervisor_with(
            Arc::clone(&store) as _,
            SupervisorConfig {
                sweep_interval: Duration::from_millis(50),
                eviction_grace: Duration::ZERO,
            },
        );

        let id = supervisor
            .create_auction(spec(Duration::from_secs(600)))
            .await
            .unwrap();
        supervisor.start_auction(id).await.unwrap();
        supervisor.end_auction(id).await.unwrap();

        let observer = hub.register(id, None).await;
        supervisor.sweep(current_unix_ms() + 1).await;
        assert!(!supervisor.machines.read().await.is_empty());

        hub.unregister(id, observer.conn_id).await;
        supervisor.sweep(current_unix_ms() + 2).await;
        assert!(supervisor.machines.read().await.is_empty());
    }
}
