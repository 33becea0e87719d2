//! Per-member enrichment: walk the enabled sources, refresh stale caches and
//! decide whether the member needs reconciling.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use enrichment_common::{EnrichableMember, EnrichmentError, Result, SourceKind};
use enrichment_store::cache::strip_null_bytes;

use crate::deps::{EnrichmentDeps, WorkerSettings};
use crate::obsolescence::is_cache_obsolete;
use crate::squash::squash_member;

/// What happened to one (member, source) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOutcome {
    /// The cache is recent enough.
    Fresh,
    NotEnrichable,
    /// Obsolete but the vendor is out of credits.
    Starved,
    Inserted,
    Updated,
    /// Refetched, identical to the cached payload.
    Unchanged,
    /// The vendor rejected the request for good (bad credentials, bad payload).
    Unavailable,
}

impl SourceOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Inserted | Self::Updated)
    }
}

pub async fn load_member(deps: &EnrichmentDeps, member_id: Uuid) -> Result<EnrichableMember> {
    deps.profiles
        .find_member(member_id)
        .await?
        .ok_or(EnrichmentError::MemberNotFound(member_id))
}

/// Refresh one source's cache row for a member if it is obsolete.
///
/// Transient vendor failures are returned as errors for the caller to retry.
pub async fn process_source(
    deps: &EnrichmentDeps,
    member: &EnrichableMember,
    kind: SourceKind,
) -> Result<SourceOutcome> {
    let source = deps
        .sources
        .get(kind)
        .ok_or_else(|| EnrichmentError::Config(format!("source {kind} is not enabled")))?;

    let caches = deps.cache.find_for_all_sources(member.id, true).await?;
    let cached = caches.iter().find(|c| c.source == kind);

    if !is_cache_obsolete(source.settings(), cached, Utc::now()) {
        return Ok(SourceOutcome::Fresh);
    }

    let input = member.enrichment_input();
    let populated: Vec<_> = caches.iter().filter(|c| c.data.is_some()).cloned().collect();
    if !source.is_enrichable(&input, &populated) {
        return Ok(SourceOutcome::NotEnrichable);
    }

    if !deps.credit_gate.has_remaining_credits(source.as_ref()).await? {
        if cached.is_some() {
            deps.cache.touch_last_tried_at(member.id, kind).await?;
        }
        return Ok(SourceOutcome::Starved);
    }

    let data = match source.get_data(&input, &populated).await {
        Ok(data) => data.map(|d| strip_null_bytes(&d)),
        Err(e) if !e.is_retryable() => {
            warn!(member_id = %member.id, source = %kind, error = %e, "Vendor rejected request, skipping source");
            return Ok(SourceOutcome::Unavailable);
        }
        Err(e) => return Err(e.into_enrichment_error(kind)),
    };

    let outcome = match cached {
        None => {
            deps.cache.insert(member.id, kind, data.as_ref()).await?;
            SourceOutcome::Inserted
        }
        Some(entry) if entry.data == data => {
            deps.cache.touch_updated_at(member.id, kind).await?;
            SourceOutcome::Unchanged
        }
        Some(_) => {
            deps.cache.update_data(member.id, kind, data.as_ref()).await?;
            SourceOutcome::Updated
        }
    };

    debug!(member_id = %member.id, source = %kind, ?outcome, has_data = data.is_some(), "Source processed");
    Ok(outcome)
}

/// A member is reconciled when a source changed and it is active enough.
pub fn should_reconcile(
    settings: &WorkerSettings,
    member: &EnrichableMember,
    outcomes: &BTreeMap<SourceKind, SourceOutcome>,
) -> bool {
    outcomes.values().any(SourceOutcome::changed)
        && member.activity_count > settings.min_activity_for_squash
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEnrichment {
    pub member_id: Uuid,
    pub outcomes: BTreeMap<SourceKind, SourceOutcome>,
    pub reconciled: bool,
    pub profile_updated: bool,
}

/// Enrich a member outside the durable runtime, reconciling inline.
pub async fn enrich_member(deps: &EnrichmentDeps, member_id: Uuid) -> Result<MemberEnrichment> {
    let member = load_member(deps, member_id).await?;
    let kinds = deps.sources.kinds();

    let mut outcomes = BTreeMap::new();
    for kind in &kinds {
        let outcome = process_source(deps, &member, *kind).await?;
        outcomes.insert(*kind, outcome);
    }

    let reconciled = should_reconcile(&deps.settings, &member, &outcomes);
    let profile_updated = if reconciled {
        squash_member(deps, member_id, &kinds).await?
    } else {
        deps.profiles.touch_last_tried_at(member_id).await?;
        false
    };

    info!(%member_id, ?outcomes, reconciled, profile_updated, "Member enrichment finished");
    Ok(MemberEnrichment {
        member_id,
        outcomes,
        reconciled,
        profile_updated,
    })
}
