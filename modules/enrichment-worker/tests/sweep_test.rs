//! Population sweep: page selection and bounded fan-out over members.

mod harness;

use std::sync::Arc;

use serde_json::json;

use enrichment_common::SourceKind;
use enrichment_sources::VendorError;
use enrichment_worker::orchestrator::enrich_member;
use enrichment_worker::scanner::{concurrency_ceiling, find_page, run_page};
use enrichment_worker::testing::MockOracle;
use enrichment_worker::WorkerSettings;

use harness::{member, source, Harness};

#[tokio::test]
async fn page_is_enriched_and_failures_stay_isolated() {
    let progai = Arc::new(
        source(SourceKind::ProgAi)
            .with_settings(|s| s.max_concurrent_requests = 2)
            .respond(Some(json!({})))
            .respond(Some(json!({})))
            .respond(Some(json!({}))),
    );
    let settings = WorkerSettings {
        page_size: 10,
        global_max_concurrency: 15,
        ..Default::default()
    };
    let h = Harness::with(&[progai.clone()], MockOracle::new(), settings);
    let ids: Vec<_> = (0..3).map(|i| h.add_member(100 + i)).collect();

    let mut page = find_page(&h.deps).await.unwrap();
    assert_eq!(page.len(), 3);
    assert_eq!(page[0].activity_count, 102, "most active first");

    let ghost = member(1);
    page.push(ghost.clone());

    let ceiling = concurrency_ceiling(&page, &h.deps.sources, h.deps.settings.global_max_concurrency);
    assert_eq!(ceiling, 2);

    let report = run_page(&page, ceiling, |id| enrich_member(&h.deps, id)).await;

    assert_eq!(report.members, 4);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, vec![ghost.id]);
    assert_eq!(progai.calls(), 3);
    for id in ids {
        assert!(h.cache.get(id, SourceKind::ProgAi).is_some());
    }
}

#[tokio::test]
async fn page_size_bounds_the_selection() {
    let settings = WorkerSettings {
        page_size: 2,
        ..Default::default()
    };
    let h = Harness::with(&[Arc::new(source(SourceKind::ProgAi))], MockOracle::new(), settings);
    for activity in [5, 50, 500] {
        h.add_member(activity);
    }

    let page = find_page(&h.deps).await.unwrap();

    let activity: Vec<_> = page.iter().map(|m| m.activity_count).collect();
    assert_eq!(activity, vec![500, 50]);
}

#[tokio::test]
async fn failing_members_do_not_hold_up_later_chunks() {
    let progai = Arc::new(
        source(SourceKind::ProgAi)
            .with_settings(|s| s.max_concurrent_requests = 1)
            .respond(Some(json!({})))
            .fail(VendorError::RateLimited)
            .respond(Some(json!({}))),
    );
    let h = Harness::new(&[progai.clone()]);
    let first = h.add_member(400);
    let unreachable = h.add_member(300);
    let rate_limited = h.add_member(200);
    let last = h.add_member(100);
    h.profiles.fail_lookups_for(unreachable);

    let page = find_page(&h.deps).await.unwrap();
    let ceiling = concurrency_ceiling(&page, &h.deps.sources, h.deps.settings.global_max_concurrency);
    assert_eq!(ceiling, 1);

    let report = run_page(&page, ceiling, |id| enrich_member(&h.deps, id)).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, vec![unreachable, rate_limited]);
    assert_eq!(progai.calls(), 3);
    assert!(h.cache.get(first, SourceKind::ProgAi).is_some());
    assert!(h.cache.get(rate_limited, SourceKind::ProgAi).is_none());
    assert!(h.cache.get(last, SourceKind::ProgAi).is_some());
}
