//! HTTP middleware for the sync service.
//!
//! Layer order, outermost first:
//! 1. Tracing (one span per request)
//! 2. Fixed response headers (`tower-http`)
//! 3. Body limit

pub mod body_limit;
pub mod metrics;
pub mod tracing;

pub use body_limit::{BodyLimitLayer, BodyLimitService};
pub use metrics::SyncMetrics;
pub use self::tracing::{TracingLayer, TracingService};
