pub mod counter;
pub mod database;
pub mod error;
pub mod sequence;

pub use counter::{
    CounterDocument, CounterFilter, CounterStore, CounterUpdate, CounterValue, IncrementRequest,
    UpsertOptions,
};
pub use database::{
    Capabilities, ConnectionState, Database, FindAndModifyOptions, FindOneAndUpdateOptions,
    ReturnDocument,
};
pub use error::{is_duplicate_key_message, ConfigError, LockResultExt, SequenceError, StoreError};
pub use sequence::SequenceGenerator;
