pub mod client;
pub mod logger;
pub mod metrics;
pub mod models;
