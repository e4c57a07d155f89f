pub mod cache;
pub mod core;
pub mod fetchers;
pub mod observability;
pub mod persistence;

pub use cache::InMemoryPriceCache;
pub use persistence::{Database, SqlitePriceStore};
