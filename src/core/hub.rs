use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::auth::Caller;
use crate::domain::{AuctionEvent, AuctionId};

/// Identifier of one observer connection, unique for the hub's lifetime.
pub type ConnId = u64;

/// How many events one auction's channel buffers before an observer that
/// stopped reading counts as fallen behind and is dropped.
const DEFAULT_EVENT_BUFFER: usize = 256;

struct Topic {
    sender: broadcast::Sender<AuctionEvent>,
    observers: HashSet<ConnId>,
}

/// One live observer of one auction. Dropped (and unregistered) on
/// disconnect, protocol error, or fall-behind.
pub struct ObserverConnection {
    pub auction_id: AuctionId,
    pub conn_id: ConnId,
    pub caller: Option<Caller>,
    receiver: broadcast::Receiver<AuctionEvent>,
}

impl ObserverConnection {
    /// Waits for the next event. `Lagged` means this connection could not
    /// keep up with the publisher and must be dropped; `Closed` means the
    /// auction's topic was removed.
    pub async fn recv(&mut self) -> Result<AuctionEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

/// Tracks the set of live observer connections per auction and fans
/// accepted-bid and status events out to them. Each auction has its own
/// broadcast channel written only by that auction's commit task, so events
/// reach every connection in publication order and publishing for one
/// auction never serializes against another. Sending never blocks: a slow
/// observer overruns its buffer and is dropped by its forwarding task.
pub struct BroadcastHub {
    topics: RwLock<HashMap<AuctionId, Topic>>,
    next_conn_id: AtomicU64,
    event_buffer: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_event_buffer(DEFAULT_EVENT_BUFFER)
    }

    pub fn with_event_buffer(event_buffer: usize) -> Self {
        BroadcastHub {
            topics: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            event_buffer,
        }
    }

    /// Registers a new observer for an auction, lazily creating the
    /// auction's topic. The observer only sees events published after this
    /// call.
    pub async fn register(
        &self,
        auction_id: AuctionId,
        caller: Option<Caller>,
    ) -> ObserverConnection {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.topics.write().await;
        let topic = topics.entry(auction_id).or_insert_with(|| Topic {
            sender: broadcast::channel(self.event_buffer).0,
            observers: HashSet::new(),
        });
        topic.observers.insert(conn_id);
        debug!(auction_id, conn_id, "observer registered");
        ObserverConnection {
            auction_id,
            conn_id,
            caller,
            receiver: topic.sender.subscribe(),
        }
    }

    /// Removes an observer, dropping the topic once nobody is left. Safe
    /// to call more than once and after the topic itself is gone.
    pub async fn unregister(&self, auction_id: AuctionId, conn_id: ConnId) {
        let mut topics = self.topics.write().await;
        if let Some(topic) = topics.get_mut(&auction_id) {
            if topic.observers.remove(&conn_id) {
                debug!(auction_id, conn_id, "observer unregistered");
            }
            if topic.observers.is_empty() {
                topics.remove(&auction_id);
            }
        }
    }

    /// Publishes one event to every current observer of the auction.
    /// Best-effort: with no topic or no observers the event is dropped.
    pub async fn publish(&self, auction_id: AuctionId, event: AuctionEvent) {
        let topics = self.topics.read().await;
        if let Some(topic) = topics.get(&auction_id) {
            let _ = topic.sender.send(event);
        }
    }

    pub async fn observer_count(&self, auction_id: AuctionId) -> usize {
        let topics = self.topics.read().await;
        topics
            .get(&auction_id)
            .map_or(0, |topic| topic.observers.len())
    }

    /// Drops the auction's topic entirely; any receiver still attached sees
    /// `Closed`. Called when the supervisor evicts the auction.
    pub async fn remove(&self, auction_id: AuctionId) {
        let mut topics = self.topics.write().await;
        topics.remove(&auction_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuctionStatus;

    fn bid_event(amount: u64) -> AuctionEvent {
        AuctionEvent::BidAccepted {
            amount,
            bidder_id: 7,
        }
    }

    #[tokio::test]
    async fn events_arrive_in_publication_order_for_every_observer() {
        let hub = BroadcastHub::new();
        let mut first = hub.register(1, None).await;
        let mut second = hub.register(1, None).await;

        for amount in 1..=50u64 {
            hub.publish(1, bid_event(amount)).await;
        }

        for conn in [&mut first, &mut second] {
            for amount in 1..=50u64 {
                assert_eq!(conn.recv().await.unwrap(), bid_event(amount));
            }
        }
    }

    #[tokio::test]
    async fn auctions_do_not_leak_events_into_each_other() {
        let hub = BroadcastHub::new();
        let mut watching_one = hub.register(1, None).await;
        let _watching_two = hub.register(2, None).await;

        hub.publish(2, bid_event(999)).await;
        hub.publish(
            1,
            AuctionEvent::Status {
                status: AuctionStatus::Active,
                ends_in_seconds: Some(60),
                winner_id: None,
            },
        )
        .await;

        let event = watching_one.recv().await.unwrap();
        assert!(matches!(event, AuctionEvent::Status { .. }));
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_leaves_others_untouched() {
        let hub = BroadcastHub::new();
        let leaving = hub.register(1, None).await;
        let mut staying = hub.register(1, None).await;
        assert_eq!(hub.observer_count(1).await, 2);

        hub.unregister(1, leaving.conn_id).await;
        hub.unregister(1, leaving.conn_id).await;
        assert_eq!(hub.observer_count(1).await, 1);

        hub.publish(1, bid_event(1200)).await;
        assert_eq!(staying.recv().await.unwrap(), bid_event(1200));
    }

    #[tokio::test]
    async fn slow_observer_overruns_its_buffer_and_sees_lagged() {
        let hub = BroadcastHub::with_event_buffer(4);
        let mut slow = hub.register(1, None).await;

        for amount in 1..=10u64 {
            hub.publish(1, bid_event(amount)).await;
        }

        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[tokio::test]
    async fn removing_a_topic_closes_remaining_receivers() {
        let hub = BroadcastHub::new();
        let mut conn = hub.register(1, None).await;
        hub.remove(1).await;
        assert!(matches!(
            conn.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(hub.observer_count(1).await, 0);
    }
}
