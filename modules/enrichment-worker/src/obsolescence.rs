use chrono::{DateTime, Utc};

use enrichment_common::EnrichmentCacheEntry;
use enrichment_sources::SourceSettings;

/// Whether a source's cache row for a member must be refreshed.
///
/// A missing row is always obsolete. A `never_reenrich` source with any row,
/// including one that recorded "no data", never is.
pub fn is_cache_obsolete(
    settings: &SourceSettings,
    entry: Option<&EnrichmentCacheEntry>,
    now: DateTime<Utc>,
) -> bool {
    let Some(entry) = entry else {
        return true;
    };
    if settings.never_reenrich {
        return false;
    }
    (now - entry.updated_at).num_seconds() > settings.cache_obsolete_after_seconds
}
