//! Usage metrics collection and aggregation.
//!
//! One `UsageMetric` row is recorded per concluded generation call,
//! successful or not. Writes are fire-and-forget so the generation
//! caller is never delayed or failed by them; aggregation scans the
//! recorded rows and reduces in process so every storage backend shares
//! one code path. Manual test traffic never lands here.

mod collector;

pub use collector::{DailyUsage, MetricsCollector, TimeRange, UsageAggregate};
