use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::errors::StoreError;

// ------------------------------------------------------------------------
// Type aliases
// ------------------------------------------------------------------------

/// Opaque auction identifier assigned by the store.
pub type AuctionId = i64;
/// Identifier of an authenticated user, as resolved by the identity provider.
pub type BidderId = i64;

// ------------------------------------------------------------------------
// Auction lifecycle
// ------------------------------------------------------------------------

/// Lifecycle status of an auction. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Pending,
    Active,
    Closed,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Pending => "pending",
            AuctionStatus::Active => "active",
            AuctionStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(AuctionStatus::Pending),
            "active" => Ok(AuctionStatus::Active),
            "closed" => Ok(AuctionStatus::Closed),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for creating a new auction.
#[derive(Debug, Clone)]
pub struct AuctionSpec {
    pub vehicle_id: i64,
    pub starting_bid: u64,
    pub reserve_price: u64,
    pub duration: Duration,
}

/// Persisted state of one auction, as loaded from or written to the store.
#[derive(Debug, Clone)]
pub struct AuctionSnapshot {
    pub id: AuctionId,
    pub vehicle_id: i64,
    pub starting_bid: u64,
    pub reserve_price: u64,
    pub duration: Duration,
    pub status: AuctionStatus,
    pub highest_bid: Option<u64>,
    pub highest_bidder_id: Option<BidderId>,
    pub winner_id: Option<BidderId>,
    pub created_at_ms: u64,
    pub ends_at_ms: Option<u64>,
}

impl AuctionSnapshot {
    /// A fresh `pending` snapshot for a newly created auction.
    pub fn new(id: AuctionId, spec: &AuctionSpec, created_at_ms: u64) -> Self {
        AuctionSnapshot {
            id,
            vehicle_id: spec.vehicle_id,
            starting_bid: spec.starting_bid,
            reserve_price: spec.reserve_price,
            duration: spec.duration,
            status: AuctionStatus::Pending,
            highest_bid: None,
            highest_bidder_id: None,
            winner_id: None,
            created_at_ms,
            ends_at_ms: None,
        }
    }
}

/// An accepted bid, as durably recorded against an auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRecord {
    pub auction_id: AuctionId,
    pub bidder_id: BidderId,
    pub amount: u64,
    pub accepted_at_ms: u64,
}

/// Why a bid submission was turned down. Rejections are reported to the
/// submitter only and never broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not strictly above the current highest bid (or below the starting
    /// bid when no bid exists yet). Carries the current highest, if any.
    TooLow { current: Option<u64> },
    /// The auction is not accepting bids: not started, already closed, or
    /// past its scheduled end time.
    NotActive,
}

/// A non-mutating view of one auction's live state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub auction_id: AuctionId,
    pub vehicle_id: i64,
    pub status: AuctionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_bid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_bidder_id: Option<BidderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<BidderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_in_seconds: Option<u64>,
}

// ------------------------------------------------------------------------
// Broadcast events
// ------------------------------------------------------------------------

/// An event fanned out to every observer of one auction. Events are
/// published in the order they were produced for that auction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuctionEvent {
    #[serde(rename_all = "camelCase")]
    BidAccepted { amount: u64, bidder_id: BidderId },
    #[serde(rename_all = "camelCase")]
    Status {
        status: AuctionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        ends_in_seconds: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        winner_id: Option<BidderId>,
    },
}

// ------------------------------------------------------------------------
// Repository trait
// ------------------------------------------------------------------------

/// Durable state for auctions and bids. The engine treats store failures as
/// reported; it never retries internally beyond the single bid rollback and
/// the sweep's status-write retry.
#[async_trait]
pub trait AuctionStore: Send + Sync {
    /// Persists a new `pending` auction and returns its assigned id.
    async fn create_auction(
        &self,
        spec: &AuctionSpec,
        created_at_ms: u64,
    ) -> Result<AuctionId, StoreError>;

    /// Loads the persisted snapshot, or `None` for an unknown id.
    async fn load_auction(&self, id: AuctionId) -> Result<Option<AuctionSnapshot>, StoreError>;

    /// Records an accepted bid and advances the auction's persisted highest
    /// bid to match, atomically.
    async fn record_bid(
        &self,
        id: AuctionId,
        bidder_id: BidderId,
        amount: u64,
        accepted_at_ms: u64,
    ) -> Result<(), StoreError>;

    /// Writes the auction's status, winner, and scheduled end time.
    async fn update_status(
        &self,
        id: AuctionId,
        status: AuctionStatus,
        winner_id: Option<BidderId>,
        ends_at_ms: Option<u64>,
    ) -> Result<(), StoreError>;

    /// All recorded bids for one auction, oldest first.
    async fn list_bids(&self, id: AuctionId) -> Result<Vec<BidRecord>, StoreError>;
}
