pub mod backfill;
pub mod orchestrator;
pub mod service;
pub mod write_path;

pub use backfill::{BackfillDecision, BackfillEngine, BackfillReport, BackfillState, BackfillSummary};
pub use orchestrator::{
    CycleScope, CycleStats, IngestionOrchestrator, IngestionStats, SymbolOutcome, TrackedSymbolSet,
};
pub use service::IngestionService;
pub use write_path::PriceWriter;
