pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod persistence;
pub mod storage;
pub mod store;
