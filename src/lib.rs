// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod service;
pub mod sources;
pub mod validation;
pub mod versioning;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::HubConfig;
pub use crate::error::{DataError, DataResult};
pub use crate::hub::DataHub;
