pub mod audit;
pub mod factory;
pub mod storage;
