use std::time::Duration;

use async_trait::async_trait;
use sqlx::FromRow;

use crate::db::pool::DbPool;
use crate::domain::{
    AuctionId, AuctionSnapshot, AuctionSpec, AuctionStatus, AuctionStore, BidRecord, BidderId,
};
use crate::utils::errors::StoreError;

pub struct SqliteAuctionStore {
    db_pool: DbPool,
}

impl SqliteAuctionStore {
    pub fn new(db_pool: DbPool) -> Self {
        SqliteAuctionStore { db_pool }
    }
}

#[derive(FromRow)]
struct AuctionRow {
    id: i64,
    vehicle_id: i64,
    starting_bid: i64,
    reserve_price: i64,
    duration_ms: i64,
    status: String,
    highest_bid: Option<i64>,
    highest_bidder_id: Option<i64>,
    winner_id: Option<i64>,
    created_at: i64,
    ends_at: Option<i64>,
}

impl AuctionRow {
    fn into_snapshot(self) -> Result<AuctionSnapshot, StoreError> {
        Ok(AuctionSnapshot {
            id: self.id,
            vehicle_id: self.vehicle_id,
            starting_bid: self.starting_bid as u64,
            reserve_price: self.reserve_price as u64,
            duration: Duration::from_millis(self.duration_ms as u64),
            status: AuctionStatus::parse(&self.status)?,
            highest_bid: self.highest_bid.map(|amount| amount as u64),
            highest_bidder_id: self.highest_bidder_id,
            winner_id: self.winner_id,
            created_at_ms: self.created_at as u64,
            ends_at_ms: self.ends_at.map(|ends| ends as u64),
        })
    }
}

#[derive(FromRow)]
struct BidRow {
    auction_id: i64,
    bidder_id: i64,
    amount: i64,
    accepted_at: i64,
}

#[async_trait]
impl AuctionStore for SqliteAuctionStore {
    async fn create_auction(
        &self,
        spec: &AuctionSpec,
        created_at_ms: u64,
    ) -> Result<AuctionId, StoreError> {
        let query = r#"
            INSERT INTO auctions (vehicle_id, starting_bid, reserve_price, duration_ms, status, created_at)
            VALUES (?, ?, ?, ?, 'pending', ?)
        "#;

        let result = sqlx::query(query)
            .bind(spec.vehicle_id)
            .bind(spec.starting_bid as i64)
            .bind(spec.reserve_price as i64)
            .bind(spec.duration.as_millis() as i64)
            .bind(created_at_ms as i64)
            .execute(&self.db_pool.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    async fn load_auction(&self, id: AuctionId) -> Result<Option<AuctionSnapshot>, StoreError> {
        let query = r#"
            SELECT id, vehicle_id, starting_bid, reserve_price, duration_ms,
                   status, highest_bid, highest_bidder_id, winner_id, created_at, ends_at
            FROM auctions
            WHERE id = ?
        "#;

        let row = sqlx::query_as::<_, AuctionRow>(query)
            .bind(id)
            .fetch_optional(&self.db_pool.pool)
            .await?;

        row.map(AuctionRow::into_snapshot).transpose()
    }

    async fn record_bid(
        &self,
        id: AuctionId,
        bidder_id: BidderId,
        amount: u64,
        accepted_at_ms: u64,
    ) -> Result<(), StoreError> {
        // The bid row and the auction's highest-bid columns move together.
        let mut tx = self.db_pool.pool.begin().await?;

        sqlx::query("INSERT INTO bids (auction_id, bidder_id, amount, accepted_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(bidder_id)
            .bind(amount as i64)
            .bind(accepted_at_ms as i64)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE auctions SET highest_bid = ?, highest_bidder_id = ? WHERE id = ?")
            .bind(amount as i64)
            .bind(bidder_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: AuctionId,
        status: AuctionStatus,
        winner_id: Option<BidderId>,
        ends_at_ms: Option<u64>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE auctions SET status = ?, winner_id = ?, ends_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(winner_id)
            .bind(ends_at_ms.map(|ends| ends as i64))
            .bind(id)
            .execute(&self.db_pool.pool)
            .await?;
        Ok(())
    }

    async fn list_bids(&self, id: AuctionId) -> Result<Vec<BidRecord>, StoreError> {
        let rows = sqlx::query_as::<_, BidRow>(
            "SELECT auction_id, bidder_id, amount, accepted_at FROM bids WHERE auction_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.db_pool.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| BidRecord {
                auction_id: row.auction_id,
                bidder_id: row.bidder_id,
                amount: row.amount as u64,
                accepted_at_ms: row.accepted_at as u64,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> SqliteAuctionStore {
        let db_pool = DbPool::in_memory().await.expect("in-memory pool");
        SqliteAuctionStore::new(db_pool)
    }

    fn spec() -> AuctionSpec {
        AuctionSpec {
            vehicle_id: 42,
            starting_bid: 1000,
            reserve_price: 1500,
            duration: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn create_and_load_round_trip() {
        let store = setup_store().await;

        let id = store.create_auction(&spec(), 1_000).await.unwrap();
        let snapshot = store.load_auction(id).await.unwrap().unwrap();

        assert_eq!(snapshot.id, id);
        assert_eq!(snapshot.vehicle_id, 42);
        assert_eq!(snapshot.starting_bid, 1000);
        assert_eq!(snapshot.reserve_price, 1500);
        assert_eq!(snapshot.duration, Duration::from_secs(60));
        assert_eq!(snapshot.status, AuctionStatus::Pending);
        assert_eq!(snapshot.highest_bid, None);
        assert_eq!(snapshot.ends_at_ms, None);
    }

    #[tokio::test]
    async fn unknown_auction_loads_as_none() {
        let store = setup_store().await;
        assert!(store.load_auction(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recording_bids_advances_the_persisted_leader() {
        let store = setup_store().await;
        let id = store.create_auction(&spec(), 1_000).await.unwrap();

        store.record_bid(id, 7, 1200, 2_000).await.unwrap();
        store.record_bid(id, 8, 1600, 3_000).await.unwrap();

        let snapshot = store.load_auction(id).await.unwrap().unwrap();
        assert_eq!(snapshot.highest_bid, Some(1600));
        assert_eq!(snapshot.highest_bidder_id, Some(8));

        let bids = store.list_bids(id).await.unwrap();
        assert_eq!(bids.len(), 2);
        assert_eq!(
            bids[0],
            BidRecord {
                auction_id: id,
                bidder_id: 7,
                amount: 1200,
                accepted_at_ms: 2_000,
            }
        );
        assert_eq!(bids[1].amount, 1600);
    }

    #[tokio::test]
    async fn status_updates_persist_winner_and_deadline() {
        let store = setup_store().await;
        let id = store.create_auction(&spec(), 1_000).await.unwrap();

        store
            .update_status(id, AuctionStatus::Active, None, Some(61_000))
            .await
            .unwrap();
        let snapshot = store.load_auction(id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, AuctionStatus::Active);
        assert_eq!(snapshot.ends_at_ms, Some(61_000));

        store
            .update_status(id, AuctionStatus::Closed, Some(8), Some(61_000))
            .await
            .unwrap();
        let snapshot = store.load_auction(id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, AuctionStatus::Closed);
        assert_eq!(snapshot.winner_id, Some(8));
    }
}
