// Domain-specific error types
pub mod errors;

// Trading calendar and clock abstraction
pub mod market_hours;

// Price observation model
pub mod observation;

// Port interfaces (fetchers, cache)
pub mod ports;

// Per-source admission control
pub mod rate_budget;

// Repository traits
pub mod repositories;

// Symbol classification
pub mod symbol;
