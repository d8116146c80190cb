pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::MemoryAuctionStore;
pub use pool::DbPool;
pub use repositories::auction::SqliteAuctionStore;
