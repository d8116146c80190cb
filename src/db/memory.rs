use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    AuctionId, AuctionSnapshot, AuctionSpec, AuctionStatus, AuctionStore, BidRecord, BidderId,
};
use crate::utils::errors::StoreError;

/// An in-memory `AuctionStore`, for tests and local runs without a
/// database file.
#[derive(Default)]
pub struct MemoryAuctionStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: AuctionId,
    auctions: HashMap<AuctionId, AuctionSnapshot>,
    bids: Vec<BidRecord>,
}

impl MemoryAuctionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuctionStore for MemoryAuctionStore {
    async fn create_auction(
        &self,
        spec: &AuctionSpec,
        created_at_ms: u64,
    ) -> Result<AuctionId, StoreError> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state
            .auctions
            .insert(id, AuctionSnapshot::new(id, spec, created_at_ms));
        Ok(id)
    }

    async fn load_auction(&self, id: AuctionId) -> Result<Option<AuctionSnapshot>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.auctions.get(&id).cloned())
    }

    async fn record_bid(
        &self,
        id: AuctionId,
        bidder_id: BidderId,
        amount: u64,
        accepted_at_ms: u64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let auction = state
            .auctions
            .get_mut(&id)
            .ok_or_else(|| StoreError::Database(format!("no auction {id}")))?;
        auction.highest_bid = Some(amount);
        auction.highest_bidder_id = Some(bidder_id);
        state.bids.push(BidRecord {
            auction_id: id,
            bidder_id,
            amount,
            accepted_at_ms,
        });
        Ok(())
    }

    async fn update_status(
        &self,
        id: AuctionId,
        status: AuctionStatus,
        winner_id: Option<BidderId>,
        ends_at_ms: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let auction = state
            .auctions
            .get_mut(&id)
            .ok_or_else(|| StoreError::Database(format!("no auction {id}")))?;
        auction.status = status;
        auction.winner_id = winner_id;
        auction.ends_at_ms = ends_at_ms;
        Ok(())
    }

    async fn list_bids(&self, id: AuctionId) -> Result<Vec<BidRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .bids
            .iter()
            .filter(|bid| bid.auction_id == id)
            .cloned()
            .collect())
    }
}
