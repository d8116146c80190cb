use thiserror::Error;

use crate::domain::{AuctionId, AuctionStatus};

/// A set of possible errors that can occur in the auction workflow.
#[derive(Error, Debug)]
pub enum AuctionError {
    #[error("auction {0} not found")]
    NotFound(AuctionId),

    #[error("cannot {command} an auction while it is {status}")]
    InvalidTransition {
        command: &'static str,
        status: AuctionStatus,
    },

    #[error("only bidder accounts may place bids")]
    BidderRoleRequired,

    #[error("bid accepted but could not be recorded: {0}")]
    StoreWrite(#[source] StoreError),

    #[error("auction engine is shutting down")]
    Unavailable,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures reported by an `AuctionStore` implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("unknown auction status {0:?} in stored record")]
    UnknownStatus(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(err.to_string())
    }
}
