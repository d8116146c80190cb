use jsonrpsee_types::ErrorObjectOwned;
use thiserror::Error;

use crate::auth::AuthError;
use crate::rpc::server::ServerKind;
use crate::utils::errors::AuctionError;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{0} server error: {1}")]
    IoError(ServerKind, #[source] std::io::Error),
    #[error("Custom error: {0}")]
    Custom(String),
}

// JSON-RPC error codes exposed by the gateway.
pub const AUCTION_NOT_FOUND_CODE: i32 = -32001;
pub const INVALID_TRANSITION_CODE: i32 = -32002;
pub const UNAUTHORIZED_CODE: i32 = -32010;
pub const FORBIDDEN_CODE: i32 = -32011;
pub const STORE_WRITE_FAILED_CODE: i32 = -32020;
pub const UNAVAILABLE_CODE: i32 = -32021;

impl From<AuctionError> for ErrorObjectOwned {
    fn from(err: AuctionError) -> Self {
        let code = match &err {
            AuctionError::NotFound(_) => AUCTION_NOT_FOUND_CODE,
            AuctionError::InvalidTransition { .. } => INVALID_TRANSITION_CODE,
            AuctionError::BidderRoleRequired => FORBIDDEN_CODE,
            AuctionError::StoreWrite(_) | AuctionError::Store(_) => STORE_WRITE_FAILED_CODE,
            AuctionError::Unavailable => UNAVAILABLE_CODE,
        };
        ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
    }
}

impl From<AuthError> for ErrorObjectOwned {
    fn from(err: AuthError) -> Self {
        let code = match &err {
            AuthError::MissingToken | AuthError::InvalidToken => UNAUTHORIZED_CODE,
            AuthError::Forbidden { .. } => FORBIDDEN_CODE,
        };
        ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
    }
}
