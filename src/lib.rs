pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod failure;
pub mod metadata;
pub mod metrics;
pub mod shutdown;
pub mod worker;
