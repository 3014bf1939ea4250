pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod storage_factory;
pub mod sweeper;
