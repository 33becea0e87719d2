use async_trait::async_trait;
use serde_json::Value;

use enrichment_common::{EnrichmentCacheEntry, EnrichmentInput, NormalizedResult, SourceKind};

use crate::error::Result;

pub const DAY_SECONDS: i64 = 60 * 60 * 24;

/// Static per-source tuning.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub cache_obsolete_after_seconds: i64,
    /// Once any cache row exists (even an empty one) the source is never queried again.
    pub never_reenrich: bool,
    pub max_concurrent_requests: usize,
    pub enrich_members_with_activity_more_than: Option<i64>,
    /// SQL predicate over `members`, `mi` (member identities) and `activity`
    /// (`total_count`), pushed into the bulk eligibility query.
    pub enrichable_by_sql: String,
    /// Sources whose cached LinkedIn identities may be used as query keys.
    pub also_find_inputs_in_source_caches: &'static [SourceKind],
}

/// One enrichment vendor.
///
/// `is_enrichable` and `normalize` are local and deterministic; `normalize`
/// must keep working against rows cached long ago.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn settings(&self) -> &SourceSettings;

    /// `caches` is the member's current cache snapshot for all sources.
    fn is_enrichable(&self, input: &EnrichmentInput, caches: &[EnrichmentCacheEntry]) -> bool;

    /// Fetch raw vendor data. `Ok(None)` means the vendor had nothing for this member.
    async fn get_data(
        &self,
        input: &EnrichmentInput,
        caches: &[EnrichmentCacheEntry],
    ) -> Result<Option<Value>>;

    fn normalize(&self, raw: &Value) -> Option<NormalizedResult>;

    /// Probe failures count as "no credits".
    async fn has_remaining_credits(&self) -> bool;
}
