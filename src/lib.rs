pub mod config;
pub mod mvcc;
pub mod storage;
pub mod types;
pub mod utils;
