pub mod auth;
pub mod core;
pub mod db;
pub mod domain;
pub mod rpc;
pub mod utils;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::auth::{Caller, Role};
    use crate::core::{AuctionSupervisor, BidArbiter, BidDecision, BroadcastHub, SupervisorConfig};
    use crate::db::MemoryAuctionStore;
    use crate::domain::{AuctionSpec, AuctionStatus};

    /// A high-level test covering one auction's full life: create, start,
    /// compete, expire, settle.
    #[tokio::test]
    async fn test_auction_flow() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(MemoryAuctionStore::new());
        let hub = Arc::new(BroadcastHub::new());
        let supervisor = Arc::new(AuctionSupervisor::new(
            store,
            Arc::clone(&hub),
            SupervisorConfig {
                sweep_interval: Duration::from_millis(50),
                eviction_grace: Duration::from_secs(60),
            },
        ));
        let arbiter = BidArbiter::new(Arc::clone(&supervisor));
        let _sweeper = supervisor.start_sweeper();

        let auction_id = supervisor
            .create_auction(AuctionSpec {
                vehicle_id: 7,
                starting_bid: 500,
                reserve_price: 800,
                duration: Duration::from_millis(400),
            })
            .await?;

        let view = supervisor.start_auction(auction_id).await?;
        assert_eq!(view.status, AuctionStatus::Active);

        let bidder = Caller {
            user_id: 21,
            role: Role::Bidder,
        };
        let decision = arbiter.place_bid(auction_id, &bidder, 900).await?;
        assert_eq!(
            decision,
            BidDecision::Accepted {
                amount: 900,
                bidder_id: 21
            }
        );

        // The sweep closes the auction once its duration elapses.
        tokio::time::sleep(Duration::from_millis(700)).await;

        let view = supervisor.status(auction_id).await?;
        assert_eq!(view.status, AuctionStatus::Closed);
        assert_eq!(view.winner_id, Some(21), "900 meets the 800 reserve");

        Ok(())
    }
}
