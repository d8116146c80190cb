use tokio::sync::{mpsc, oneshot, Mutex};

use crate::domain::{
    AuctionId, AuctionSnapshot, AuctionStatus, BidderId, RejectReason, StatusView,
};
use crate::utils::errors::{AuctionError, StoreError};

/// Outcome of a commit job once the store write has been attempted.
pub(crate) type CommitResult = Result<(), CommitError>;

#[derive(Debug)]
pub(crate) enum CommitError {
    Store(StoreError),
    /// The machine's commit task is gone (eviction or shutdown).
    Evicted,
}

/// A unit of durable work enqueued by a machine operation while its lock is
/// held. Queue order therefore equals acceptance order, and the per-auction
/// commit task persists and publishes in exactly that order.
pub(crate) enum CommitJob {
    RecordBid {
        bidder_id: BidderId,
        amount: u64,
        accepted_at_ms: u64,
        previous: Option<(u64, BidderId)>,
        reply: oneshot::Sender<CommitResult>,
    },
    SyncStatus {
        reply: Option<oneshot::Sender<CommitResult>>,
    },
}

/// Result of a bid submission, decided under the machine lock.
pub(crate) enum SubmitOutcome {
    Accepted {
        amount: u64,
        commit: oneshot::Receiver<CommitResult>,
    },
    Rejected(RejectReason),
}

/// Result of a close request. Closing an already-closed auction is a no-op
/// that reports the existing winner and enqueues nothing.
pub(crate) enum CloseOutcome {
    Closed {
        winner_id: Option<BidderId>,
        commit: oneshot::Receiver<CommitResult>,
    },
    AlreadyClosed {
        winner_id: Option<BidderId>,
    },
}

/// The durable-status view the commit task works from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatusSync {
    pub status: AuctionStatus,
    pub winner_id: Option<BidderId>,
    pub ends_at_ms: Option<u64>,
}

/// Sweep-facing view of a machine's lifecycle state.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SweepState {
    pub status: AuctionStatus,
    pub ends_at_ms: Option<u64>,
    pub closed_at_ms: Option<u64>,
    pub dirty: bool,
}

struct Inner {
    vehicle_id: i64,
    starting_bid: u64,
    reserve_price: u64,
    duration_ms: u64,
    status: AuctionStatus,
    highest_bid: Option<u64>,
    highest_bidder_id: Option<BidderId>,
    winner_id: Option<BidderId>,
    ends_at_ms: Option<u64>,
    closed_at_ms: Option<u64>,
    /// True while the in-memory status is ahead of the persisted record.
    dirty: bool,
    commits: mpsc::UnboundedSender<CommitJob>,
}

/// The sole authority over one auction's status and highest-bid fields.
/// Every operation runs under a single exclusive lock scoped to this
/// instance; nothing awaits I/O while holding it.
pub struct AuctionMachine {
    id: AuctionId,
    inner: Mutex<Inner>,
}

impl AuctionMachine {
    /// Builds a machine from its persisted snapshot, returning the receiving
    /// end of its commit queue for the supervisor to drain.
    pub(crate) fn from_snapshot(
        snapshot: AuctionSnapshot,
    ) -> (Self, mpsc::UnboundedReceiver<CommitJob>) {
        let (commits, rx) = mpsc::unbounded_channel();
        let machine = AuctionMachine {
            id: snapshot.id,
            inner: Mutex::new(Inner {
                vehicle_id: snapshot.vehicle_id,
                starting_bid: snapshot.starting_bid,
                reserve_price: snapshot.reserve_price,
                duration_ms: snapshot.duration.as_millis() as u64,
                status: snapshot.status,
                highest_bid: snapshot.highest_bid,
                highest_bidder_id: snapshot.highest_bidder_id,
                winner_id: snapshot.winner_id,
                ends_at_ms: snapshot.ends_at_ms,
                closed_at_ms: None,
                dirty: false,
                commits,
            }),
        };
        (machine, rx)
    }

    pub fn id(&self) -> AuctionId {
        self.id
    }

    /// Activates a pending auction and fixes its absolute end time.
    pub(crate) async fn start(
        &self,
        now_ms: u64,
    ) -> Result<oneshot::Receiver<CommitResult>, AuctionError> {
        let mut inner = self.inner.lock().await;
        if inner.status != AuctionStatus::Pending {
            return Err(AuctionError::InvalidTransition {
                command: "start",
                status: inner.status,
            });
        }
        inner.status = AuctionStatus::Active;
        inner.ends_at_ms = Some(now_ms + inner.duration_ms);
        inner.dirty = true;
        Ok(inner.enqueue_status_sync())
    }

    /// Evaluates one bid. Acceptance updates the highest bid/bidder and
    /// enqueues the durable commit in the same critical section.
    pub(crate) async fn submit_bid(
        &self,
        bidder_id: BidderId,
        amount: u64,
        now_ms: u64,
    ) -> SubmitOutcome {
        let mut inner = self.inner.lock().await;

        if inner.status != AuctionStatus::Active {
            return SubmitOutcome::Rejected(RejectReason::NotActive);
        }
        // Past the deadline the auction no longer takes bids, even if the
        // sweep has not yet closed it; the close itself stays with the
        // sweep so exactly one status transition is produced.
        if inner.ends_at_ms.is_some_and(|ends| now_ms >= ends) {
            return SubmitOutcome::Rejected(RejectReason::NotActive);
        }

        let acceptable = match inner.highest_bid {
            Some(current) => amount > current,
            None => amount >= inner.starting_bid,
        };
        if !acceptable {
            return SubmitOutcome::Rejected(RejectReason::TooLow {
                current: inner.highest_bid,
            });
        }

        let previous = inner
            .highest_bid
            .zip(inner.highest_bidder_id);
        inner.highest_bid = Some(amount);
        inner.highest_bidder_id = Some(bidder_id);

        let (reply, commit) = oneshot::channel();
        inner.enqueue(CommitJob::RecordBid {
            bidder_id,
            amount,
            accepted_at_ms: now_ms,
            previous,
            reply,
        });
        SubmitOutcome::Accepted { amount, commit }
    }

    /// Closes the auction and determines the winner. Valid from `pending`
    /// or `active`; both the explicit end command and the expiry sweep land
    /// here, so a double close is safe and yields one definitive outcome.
    pub(crate) async fn close(&self, effective_ms: u64) -> CloseOutcome {
        let mut inner = self.inner.lock().await;
        if inner.status == AuctionStatus::Closed {
            return CloseOutcome::AlreadyClosed {
                winner_id: inner.winner_id,
            };
        }
        inner.status = AuctionStatus::Closed;
        inner.closed_at_ms = Some(effective_ms);
        inner.winner_id = inner.determine_winner();
        inner.dirty = true;
        CloseOutcome::Closed {
            winner_id: inner.winner_id,
            commit: inner.enqueue_status_sync(),
        }
    }

    /// Non-mutating snapshot read.
    pub async fn status(&self, now_ms: u64) -> StatusView {
        let inner = self.inner.lock().await;
        StatusView {
            auction_id: self.id,
            vehicle_id: inner.vehicle_id,
            status: inner.status,
            highest_bid: inner.highest_bid,
            highest_bidder_id: inner.highest_bidder_id,
            winner_id: inner.winner_id,
            ends_in_seconds: inner.ends_in_seconds(now_ms),
        }
    }

    /// Rolls back a bid whose store write failed, unless a newer accepted
    /// bid already superseded it. If the auction closed in the meantime the
    /// winner is recomputed from the restored state. Returns whether the
    /// rollback was applied.
    pub(crate) async fn revert_bid(
        &self,
        amount: u64,
        bidder_id: BidderId,
        previous: Option<(u64, BidderId)>,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        let still_leading = inner.highest_bid == Some(amount)
            && inner.highest_bidder_id == Some(bidder_id);
        if !still_leading {
            return false;
        }
        match previous {
            Some((prev_amount, prev_bidder)) => {
                inner.highest_bid = Some(prev_amount);
                inner.highest_bidder_id = Some(prev_bidder);
            }
            None => {
                inner.highest_bid = None;
                inner.highest_bidder_id = None;
            }
        }
        if inner.status == AuctionStatus::Closed {
            inner.winner_id = inner.determine_winner();
        }
        true
    }

    /// The status the commit task should persist, or `None` when the
    /// persisted record is already current.
    pub(crate) async fn status_to_sync(&self) -> Option<StatusSync> {
        let inner = self.inner.lock().await;
        inner.dirty.then_some(StatusSync {
            status: inner.status,
            winner_id: inner.winner_id,
            ends_at_ms: inner.ends_at_ms,
        })
    }

    /// Marks the given status as durably recorded. A transition that raced
    /// in after the snapshot keeps the machine dirty.
    pub(crate) async fn confirm_status_recorded(&self, status: AuctionStatus) {
        let mut inner = self.inner.lock().await;
        if inner.status == status {
            inner.dirty = false;
        }
    }

    /// Re-enqueues a status sync if the last durable write failed. Called
    /// from the sweep; the per-auction commit task dedupes via `dirty`.
    pub(crate) async fn resync_status(&self) {
        let mut inner = self.inner.lock().await;
        if inner.dirty {
            let _ = inner.enqueue_status_sync();
        }
    }

    pub(crate) async fn sweep_state(&self) -> SweepState {
        let inner = self.inner.lock().await;
        SweepState {
            status: inner.status,
            ends_at_ms: inner.ends_at_ms,
            closed_at_ms: inner.closed_at_ms,
            dirty: inner.dirty,
        }
    }
}

impl Inner {
    fn determine_winner(&self) -> Option<BidderId> {
        match self.highest_bid {
            Some(amount) if amount >= self.reserve_price => self.highest_bidder_id,
            _ => None,
        }
    }

    fn ends_in_seconds(&self, now_ms: u64) -> Option<u64> {
        if self.status != AuctionStatus::Active {
            return None;
        }
        self.ends_at_ms
            .map(|ends| ends.saturating_sub(now_ms) / 1000)
    }

    fn enqueue(&mut self, job: CommitJob) {
        if let Err(mpsc::error::SendError(job)) = self.commits.send(job) {
            // Commit task is gone; fail the job so callers see Unavailable.
            match job {
                CommitJob::RecordBid {
                    amount,
                    previous,
                    reply,
                    ..
                } => {
                    match previous {
                        Some((prev_amount, prev_bidder)) => {
                            if self.highest_bid == Some(amount) {
                                self.highest_bid = Some(prev_amount);
                                self.highest_bidder_id = Some(prev_bidder);
                            }
                        }
                        None => {
                            if self.highest_bid == Some(amount) {
                                self.highest_bid = None;
                                self.highest_bidder_id = None;
                            }
                        }
                    }
                    let _ = reply.send(Err(CommitError::Evicted));
                }
                CommitJob::SyncStatus { reply } => {
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(CommitError::Evicted));
                    }
                }
            }
        }
    }

    fn enqueue_status_sync(&mut self) -> oneshot::Receiver<CommitResult> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(CommitJob::SyncStatus { reply: Some(reply) });
        rx
    }
}
