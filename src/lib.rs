pub mod agent;
pub mod attempt_log;
pub mod cache;
pub mod chain;
pub mod config;
pub mod dex;
pub mod executor;
pub mod gas;
pub mod ingestion;
pub mod killswitch;
pub mod metrics;
pub mod models;
pub mod providers;
pub mod scorer;
pub mod session;
pub mod throttle;
pub mod utils;
