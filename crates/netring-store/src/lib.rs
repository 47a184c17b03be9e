pub mod memory;
pub mod redis;
pub mod types;

pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use types::{SharedStore, Store};
