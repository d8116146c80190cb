pub mod arbiter;
pub mod hub;
pub mod machine;
pub mod supervisor;

pub use arbiter::{BidArbiter, BidDecision};
pub use hub::{BroadcastHub, ObserverConnection};
pub use machine::AuctionMachine;
pub use supervisor::{AuctionSupervisor, SupervisorConfig};
