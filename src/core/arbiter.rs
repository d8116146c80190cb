use std::sync::Arc;

use tracing::{debug, instrument};

use crate::auth::{Caller, Role};
use crate::core::machine::{CommitError, SubmitOutcome};
use crate::core::supervisor::AuctionSupervisor;
use crate::domain::{AuctionId, BidderId, RejectReason};
use crate::utils::errors::AuctionError;
use crate::utils::helpers::current_unix_ms;

/// What the submitting caller is told about their bid. Rejections are never
/// broadcast; accepted bids are fanned out by the auction's commit task
/// once durably recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidDecision {
    Accepted { amount: u64, bidder_id: BidderId },
    Rejected(RejectReason),
}

/// The only entry point for bid submission. Checks the caller's role,
/// serializes the bid against the auction's machine, and couples acceptance
/// to durable recording: the bidder hears "accepted" only after the store
/// write succeeded, and a failed write rolls the in-memory leader back.
pub struct BidArbiter {
    supervisor: Arc<AuctionSupervisor>,
}

impl BidArbiter {
    pub fn new(supervisor: Arc<AuctionSupervisor>) -> Self {
        BidArbiter { supervisor }
    }

    #[instrument(skip(self, caller), fields(bidder_id = caller.user_id))]
    pub async fn place_bid(
        &self,
        auction_id: AuctionId,
        caller: &Caller,
        amount: u64,
    ) -> Result<BidDecision, AuctionError> {
        if caller.role != Role::Bidder {
            return Err(AuctionError::BidderRoleRequired);
        }

        let machine = self.supervisor.machine(auction_id).await?;
        match machine
            .submit_bid(caller.user_id, amount, current_unix_ms())
            .await
        {
            SubmitOutcome::Accepted { amount, commit } => match commit.await {
                Ok(Ok(())) => {
                    debug!(auction_id, amount, "bid accepted and recorded");
                    Ok(BidDecision::Accepted {
                        amount,
                        bidder_id: caller.user_id,
                    })
                }
                Ok(Err(CommitError::Store(err))) => Err(AuctionError::StoreWrite(err)),
                Ok(Err(CommitError::Evicted)) | Err(_) => Err(AuctionError::Unavailable),
            },
            SubmitOutcome::Rejected(reason) => {
                debug!(auction_id, amount, ?reason, "bid rejected");
                Ok(BidDecision::Rejected(reason))
            }
        }
    }
}
