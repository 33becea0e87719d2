//! Population sweep: select a page of eligible members and fan it out in
//! bounded chunks.

use std::future::Future;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use enrichment_common::{EnrichableMember, Result};
use enrichment_sources::SourceRegistry;
use enrichment_store::{EligibilityQuery, SourceQueryInput};

use crate::deps::{EnrichmentDeps, WorkerSettings};

pub fn eligibility_query(registry: &SourceRegistry, settings: &WorkerSettings) -> EligibilityQuery {
    EligibilityQuery {
        limit: settings.page_size,
        retry_after_seconds: settings.retry_tried_members_after.as_secs() as i64,
        sources: registry
            .iter()
            .map(|source| {
                let s = source.settings();
                SourceQueryInput {
                    source: source.kind(),
                    enrichable_by_sql: s.enrichable_by_sql.clone(),
                    cache_obsolete_after_seconds: s.cache_obsolete_after_seconds,
                    never_reenrich: s.never_reenrich,
                }
            })
            .collect(),
    }
}

/// How many members of a page may be enriched at once.
///
/// Bounded by the global ceiling and by every source that will be queried for
/// the least active member of the page: those without an activity floor and
/// those whose floor the page reaches.
pub fn concurrency_ceiling(
    members: &[EnrichableMember],
    registry: &SourceRegistry,
    global: usize,
) -> usize {
    let Some(min_activity) = members.iter().map(|m| m.activity_count).min() else {
        return global.max(1);
    };

    registry
        .iter()
        .map(|source| source.settings())
        .filter(|s| {
            s.enrich_members_with_activity_more_than
                .map_or(true, |floor| floor <= min_activity)
        })
        .map(|s| s.max_concurrent_requests)
        .fold(global, usize::min)
        .max(1)
}

pub async fn find_page(deps: &EnrichmentDeps) -> Result<Vec<EnrichableMember>> {
    let query = eligibility_query(&deps.sources, &deps.settings);
    deps.profiles.find_enrichable_members(&query).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReport {
    pub members: usize,
    pub succeeded: usize,
    pub failed: Vec<Uuid>,
}

/// Run `enrich` over the page, `ceiling` members at a time.
///
/// Chunks run one after the other; members within a chunk run concurrently.
/// A failing member is logged and recorded, never propagated.
pub async fn run_page<F, Fut, T, E>(
    members: &[EnrichableMember],
    ceiling: usize,
    enrich: F,
) -> PageReport
where
    F: Fn(Uuid) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut report = PageReport {
        members: members.len(),
        ..Default::default()
    };

    for chunk in members.chunks(ceiling.max(1)) {
        let results = join_all(chunk.iter().map(|m| enrich(m.id))).await;
        for (member, result) in chunk.iter().zip(results) {
            match result {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    warn!(member_id = %member.id, error = %e, "Member enrichment failed");
                    report.failed.push(member.id);
                }
            }
        }
    }

    info!(
        members = report.members,
        succeeded = report.succeeded,
        failed = report.failed.len(),
        "Enrichment page processed"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use enrichment_common::SourceKind;
    use enrichment_sources::testing::MockSource;

    fn member(activity: i64) -> EnrichableMember {
        EnrichableMember {
            id: Uuid::new_v4(),
            display_name: None,
            location: None,
            website: None,
            identities: vec![],
            activity_count: activity,
        }
    }

    fn registry() -> SourceRegistry {
        SourceRegistry::new()
            .with(Arc::new(MockSource::new(SourceKind::ProgAi).with_settings(|s| {
                s.max_concurrent_requests = 10;
            })))
            .with(Arc::new(MockSource::new(SourceKind::Serp).with_settings(|s| {
                s.max_concurrent_requests = 2;
                s.enrich_members_with_activity_more_than = Some(500);
            })))
            .with(Arc::new(MockSource::new(SourceKind::Clearbit).with_settings(|s| {
                s.max_concurrent_requests = 5;
                s.enrich_members_with_activity_more_than = Some(10);
            })))
    }

    #[test]
    fn ceiling_follows_sources_reached_by_least_active_member() {
        let registry = registry();

        let quiet_page = [member(1000), member(50)];
        assert_eq!(concurrency_ceiling(&quiet_page, &registry, 15), 5);

        let busy_page = [member(1000), member(600)];
        assert_eq!(concurrency_ceiling(&busy_page, &registry, 15), 2);

        assert_eq!(concurrency_ceiling(&quiet_page, &registry, 3), 3);
        assert_eq!(concurrency_ceiling(&[member(1)], &SourceRegistry::new(), 0), 1);
    }

    #[test]
    fn query_carries_each_source() {
        let settings = WorkerSettings::default();
        let query = eligibility_query(&registry(), &settings);
        assert_eq!(query.limit, settings.page_size);
        assert_eq!(query.sources.len(), 3);
        assert_eq!(query.retry_after_seconds, 24 * 3600);
    }

    #[tokio::test]
    async fn chunks_are_bounded_and_failures_isolated() {
        let page: Vec<_> = (0..7).map(|i| member(100 - i)).collect();
        let poisoned = page[3].id;
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let report = run_page(&page, 3, |id| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                if id == poisoned {
                    Err("vendor exploded")
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(report.members, 7);
        assert_eq!(report.succeeded, 6);
        assert_eq!(report.failed, vec![poisoned]);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
