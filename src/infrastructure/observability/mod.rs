//! Push-based observability
//!
//! Metrics live in a Prometheus registry and are rendered on demand; status snapshots
//! are pushed to stdout as structured JSON. No HTTP server, no incoming requests.

pub mod latency_tracker;
pub mod metrics;
pub mod reporter;

pub use latency_tracker::LatencyGuard;
pub use metrics::Metrics;
pub use reporter::{MetricsReporter, SnapshotSource};
