pub mod service_monitor;

pub use service_monitor::{HealthReport, HealthStatus, ServiceMonitor, SourceHealth, StatusReport};
