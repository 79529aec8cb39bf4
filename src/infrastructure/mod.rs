pub mod config;
pub mod credential_store;
pub mod device_client;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod timings_client;
