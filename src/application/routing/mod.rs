pub mod priority;
pub mod registry;
pub mod source_router;

pub use priority::PriorityTable;
pub use registry::SourceRegistry;
pub use source_router::{FetchOutcome, SourceRouter};
