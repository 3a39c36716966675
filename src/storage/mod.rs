mod adapters;
pub mod document;
mod memory;
mod retry;
mod rocksdb;

pub use adapters::{normalize_reply, DetectedApi, FindAndModifyApi, FindOneAndUpdateApi};
pub use memory::MemoryDatabase;
pub use retry::{is_retryable_store_error, yield_then_sleep, RetryConfig};
pub use self::rocksdb::RocksDbDatabase;
