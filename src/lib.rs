// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod matcher;
pub mod metrics;
pub mod offer;
pub mod orchestrator;
pub mod sources;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::breaker::{BreakerState, CircuitBreaker};
pub use crate::cache::ResultCache;
pub use crate::config::AggregatorConfig;
pub use crate::offer::Offer;
pub use crate::orchestrator::{Aggregation, Orchestrator};
pub use crate::sources::{SourceAgent, SourceError, SyntheticGenerator};
pub use crate::telemetry::{DataHealth, Report};
