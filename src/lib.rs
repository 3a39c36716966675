pub mod contracts;
pub mod generator;
pub mod hook;
pub mod metrics;
pub mod storage;
