// Component wiring
pub mod bootstrap;

// Live cycle, backfill and the shared write path
pub mod ingestion;

// Health and status reporting
pub mod monitoring;

// Source priority and fallback
pub mod routing;

// Dual-cadence job driver
pub mod scheduler;

// Application lifecycle
pub mod system;
