pub mod list;
pub mod pool;
pub mod probe;

pub use list::load_endpoints;
pub use pool::{PoolConfig, PoolStats, ProxyPool, ProxyRecord, ProxyState};
