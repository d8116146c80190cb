pub mod errors;
pub mod gateway;
pub mod server;
pub mod utils;

pub use gateway::{build_rpc_module, BidReply, GatewayContext};
pub use server::{RpcServer, RpcServerConfig, RpcServerHandle};
