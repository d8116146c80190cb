use std::sync::Arc;
use std::time::Duration;

use jsonrpsee::core::RegisterMethodError;
use jsonrpsee::server::{SubscriptionMessage, SubscriptionSink};
use jsonrpsee::RpcModule;
use jsonrpsee_types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::auth::{require_role, Caller, IdentityProvider, Role};
use crate::core::{AuctionSupervisor, BidArbiter, BidDecision, BroadcastHub};
use crate::domain::{AuctionEvent, AuctionId, AuctionSpec, BidderId, RejectReason};

/// Everything the wire methods need, shared across connections.
pub struct GatewayContext {
    pub supervisor: Arc<AuctionSupervisor>,
    pub arbiter: Arc<BidArbiter>,
    pub hub: Arc<BroadcastHub>,
    pub auth: Arc<dyn IdentityProvider>,
}

impl GatewayContext {
    async fn authenticate(&self, token: &str) -> Result<Caller, ErrorObjectOwned> {
        self.auth.authenticate(token).await.map_err(Into::into)
    }

    async fn require(&self, token: &str, role: Role) -> Result<Caller, ErrorObjectOwned> {
        let caller = self.authenticate(token).await?;
        require_role(&caller, role)?;
        Ok(caller)
    }
}

// ------------------------------------------------------------------------
// Wire types
// ------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    token: String,
    vehicle_id: i64,
    starting_bid: u64,
    reserve_price: u64,
    duration_minutes: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LifecycleParams {
    token: String,
    auction_id: AuctionId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusParams {
    auction_id: AuctionId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BidParams {
    token: String,
    auction_id: AuctionId,
    amount: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeParams {
    auction_id: AuctionId,
    token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReply {
    pub auction_id: AuctionId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndReply {
    pub winner_id: Option<BidderId>,
}

/// Response to a bid submission. Mirrors the event shape so a client can
/// treat its own acknowledgement like any other auction event; rejections
/// go only to the submitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BidReply {
    #[serde(rename_all = "camelCase")]
    BidAccepted { amount: u64, bidder_id: BidderId },
    #[serde(rename_all = "camelCase")]
    BidRejected {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_highest: Option<u64>,
    },
}

impl From<RejectReason> for BidReply {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::TooLow { current } => BidReply::BidRejected {
                reason: "too_low".to_string(),
                current_highest: current,
            },
            RejectReason::NotActive => BidReply::BidRejected {
                reason: "not_active".to_string(),
                current_highest: None,
            },
        }
    }
}

// ------------------------------------------------------------------------
// Module registration
// ------------------------------------------------------------------------

/// Registers the auction wire contract on an RPC module: lifecycle
/// commands, the status/history reads, bid submission, and the per-auction
/// event subscription.
pub fn build_rpc_module(
    ctx: GatewayContext,
) -> Result<RpcModule<GatewayContext>, RegisterMethodError> {
    let mut module = RpcModule::new(ctx);

    module.register_async_method("auction_create", |params, ctx, _| async move {
        let p: CreateParams = params.parse()?;
        ctx.require(&p.token, Role::Dealer).await?;
        let auction_id = ctx
            .supervisor
            .create_auction(AuctionSpec {
                vehicle_id: p.vehicle_id,
                starting_bid: p.starting_bid,
                reserve_price: p.reserve_price,
                duration: Duration::from_secs(p.duration_minutes * 60),
            })
            .await
            .map_err(ErrorObjectOwned::from)?;
        Ok::<_, ErrorObjectOwned>(CreateReply { auction_id })
    })?;

    module.register_async_method("auction_start", |params, ctx, _| async move {
        let p: LifecycleParams = params.parse()?;
        ctx.require(&p.token, Role::Dealer).await?;
        ctx.supervisor
            .start_auction(p.auction_id)
            .await
            .map_err(ErrorObjectOwned::from)
    })?;

    module.register_async_method("auction_end", |params, ctx, _| async move {
        let p: LifecycleParams = params.parse()?;
        ctx.require(&p.token, Role::Dealer).await?;
        let winner_id = ctx
            .supervisor
            .end_auction(p.auction_id)
            .await
            .map_err(ErrorObjectOwned::from)?;
        Ok::<_, ErrorObjectOwned>(EndReply { winner_id })
    })?;

    module.register_async_method("auction_status", |params, ctx, _| async move {
        let p: StatusParams = params.parse()?;
        ctx.supervisor
            .status(p.auction_id)
            .await
            .map_err(ErrorObjectOwned::from)
    })?;

    module.register_async_method("auction_bids", |params, ctx, _| async move {
        let p: StatusParams = params.parse()?;
        ctx.supervisor
            .bid_history(p.auction_id)
            .await
            .map_err(ErrorObjectOwned::from)
    })?;

    module.register_async_method("auction_bid", |params, ctx, _| async move {
        let p: BidParams = params.parse()?;
        let caller = ctx.authenticate(&p.token).await?;
        match ctx.arbiter.place_bid(p.auction_id, &caller, p.amount).await {
            Ok(BidDecision::Accepted { amount, bidder_id }) => {
                Ok(BidReply::BidAccepted { amount, bidder_id })
            }
            Ok(BidDecision::Rejected(reason)) => Ok(BidReply::from(reason)),
            Err(err) => Err(ErrorObjectOwned::from(err)),
        }
    })?;

    module.register_subscription(
        "auction_subscribe",
        "auction_event",
        "auction_unsubscribe",
        |params, pending, ctx, _| async move {
            let p: SubscribeParams = match params.parse() {
                Ok(p) => p,
                Err(err) => {
                    pending.reject(err).await;
                    return;
                }
            };

            let caller = match &p.token {
                Some(token) => match ctx.auth.authenticate(token).await {
                    Ok(caller) => Some(caller),
                    Err(err) => {
                        pending.reject(ErrorObjectOwned::from(err)).await;
                        return;
                    }
                },
                None => None,
            };

            // Register before reading the status: anything published after
            // this point is buffered for the connection, and the snapshot
            // below covers everything before it, so the subscriber starts
            // from a view with no gap.
            let mut conn = ctx.hub.register(p.auction_id, caller).await;
            let status = match ctx.supervisor.status(p.auction_id).await {
                Ok(status) => status,
                Err(err) => {
                    ctx.hub.unregister(p.auction_id, conn.conn_id).await;
                    pending.reject(ErrorObjectOwned::from(err)).await;
                    return;
                }
            };
            let sink = match pending.accept().await {
                Ok(sink) => sink,
                Err(_) => {
                    ctx.hub.unregister(p.auction_id, conn.conn_id).await;
                    return;
                }
            };

            let opening = AuctionEvent::Status {
                status: status.status,
                ends_in_seconds: status.ends_in_seconds,
                winner_id: status.winner_id,
            };
            if send_event(&sink, &opening).await.is_err() {
                ctx.hub.unregister(p.auction_id, conn.conn_id).await;
                return;
            }

            loop {
                tokio::select! {
                    _ = sink.closed() => break,
                    event = conn.recv() => match event {
                        Ok(event) => {
                            if send_event(&sink, &event).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // An observer that cannot keep up is dropped
                            // rather than back-pressuring the publisher.
                            warn!(
                                auction_id = p.auction_id,
                                conn_id = conn.conn_id,
                                skipped,
                                "observer fell behind, dropping connection"
                            );
                            break;
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }

            ctx.hub.unregister(p.auction_id, conn.conn_id).await;
            debug!(
                auction_id = p.auction_id,
                conn_id = conn.conn_id,
                "observer connection closed"
            );
        },
    )?;

    Ok(module)
}

async fn send_event(sink: &SubscriptionSink, event: &AuctionEvent) -> Result<(), ()> {
    let msg = SubscriptionMessage::new(sink.method_name(), sink.subscription_id(), event)
        .map_err(|_| ())?;
    sink.send(msg).await.map_err(|_| ())
}
