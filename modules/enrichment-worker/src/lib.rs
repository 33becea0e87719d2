pub mod credit_gate;
pub mod deps;
pub mod obsolescence;
pub mod oracle;
pub mod orchestrator;
pub mod scanner;
pub mod search_index;
pub mod squash;
pub mod workflows;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use deps::{EnrichmentDeps, WorkerSettings};
pub use orchestrator::{enrich_member, MemberEnrichment, SourceOutcome};
pub use squash::{plan_squash, squash_member, SquashPlan};
