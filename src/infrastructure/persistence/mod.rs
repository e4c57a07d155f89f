pub mod database;
pub mod price_store;

pub use database::Database;
pub use price_store::SqlitePriceStore;
