//! Per-member orchestration against scripted sources and in-memory stores.

mod harness;

use std::sync::Arc;

use serde_json::json;

use enrichment_common::SourceKind;
use enrichment_sources::VendorError;
use enrichment_worker::orchestrator::{enrich_member, SourceOutcome};
use enrichment_worker::testing::MockOracle;
use enrichment_worker::WorkerSettings;

use harness::{payload, source, Harness, DAY};

#[tokio::test]
async fn fresh_cache_is_not_refetched() {
    let progai = Arc::new(source(SourceKind::ProgAi));
    let h = Harness::new(&[progai.clone()]);
    let id = h.add_member(500);
    h.seed_cache(id, SourceKind::ProgAi, Some(json!({})), DAY);

    let result = enrich_member(&h.deps, id).await.unwrap();

    assert_eq!(result.outcomes[&SourceKind::ProgAi], SourceOutcome::Fresh);
    assert_eq!(progai.calls(), 0);
    assert!(!result.reconciled);
    assert_eq!(h.profiles.tried_count(id), 1);
}

#[tokio::test]
async fn only_the_stale_source_is_refetched() {
    let stale = Arc::new(
        source(SourceKind::ProgAi)
            .respond(Some(payload(SourceKind::ProgAi, &[("bio", json!("new bio"))]))),
    );
    let fresh = Arc::new(source(SourceKind::Clearbit));
    let h = Harness::new(&[stale.clone(), fresh.clone()]);
    let id = h.add_member(500);
    h.seed_cache(id, SourceKind::ProgAi, Some(json!({})), 200 * DAY);
    h.seed_cache(id, SourceKind::Clearbit, Some(json!({})), 3600);
    let clearbit_before = h.cache.get(id, SourceKind::Clearbit).unwrap();

    let result = enrich_member(&h.deps, id).await.unwrap();

    assert_eq!(stale.calls(), 1);
    assert_eq!(fresh.calls(), 0);
    assert_eq!(result.outcomes[&SourceKind::ProgAi], SourceOutcome::Updated);
    assert_eq!(result.outcomes[&SourceKind::Clearbit], SourceOutcome::Fresh);
    assert_eq!(h.cache.get(id, SourceKind::Clearbit).unwrap(), clearbit_before);
    assert_eq!(
        h.cache.get(id, SourceKind::ProgAi).unwrap().data,
        Some(payload(SourceKind::ProgAi, &[("bio", json!("new bio"))]))
    );
}

#[tokio::test]
async fn never_reenrich_source_with_empty_row_is_left_alone() {
    let crustdata = Arc::new(
        source(SourceKind::Crustdata)
            .with_settings(|s| s.never_reenrich = true)
            .respond(Some(json!({}))),
    );
    let h = Harness::new(&[crustdata.clone()]);
    let id = h.add_member(500);
    h.seed_cache(id, SourceKind::Crustdata, None, 2000 * DAY);

    let result = enrich_member(&h.deps, id).await.unwrap();

    assert_eq!(result.outcomes[&SourceKind::Crustdata], SourceOutcome::Fresh);
    assert_eq!(crustdata.calls(), 0);
}

#[tokio::test]
async fn vendor_without_data_records_an_empty_row() {
    let clearbit = Arc::new(source(SourceKind::Clearbit).respond(None));
    let h = Harness::new(&[clearbit.clone()]);
    let id = h.add_member(500);

    let result = enrich_member(&h.deps, id).await.unwrap();

    assert_eq!(result.outcomes[&SourceKind::Clearbit], SourceOutcome::Inserted);
    let row = h.cache.get(id, SourceKind::Clearbit).unwrap();
    assert_eq!(row.data, None);
}

#[tokio::test]
async fn identical_refetch_only_bumps_updated_at() {
    let data = payload(SourceKind::Serp, &[("websiteUrl", json!("https://alice.dev"))]);
    let serp = Arc::new(source(SourceKind::Serp).respond(Some(data.clone())));
    let h = Harness::new(&[serp.clone()]);
    let id = h.add_member(500);
    h.seed_cache(id, SourceKind::Serp, Some(data), 100 * DAY);
    let before = h.cache.get(id, SourceKind::Serp).unwrap();

    let result = enrich_member(&h.deps, id).await.unwrap();

    assert_eq!(result.outcomes[&SourceKind::Serp], SourceOutcome::Unchanged);
    assert!(!result.reconciled);
    let after = h.cache.get(id, SourceKind::Serp).unwrap();
    assert!(after.updated_at > before.updated_at);
    assert_eq!(after.created_at, before.created_at);
}

#[tokio::test]
async fn null_bytes_are_stripped_before_caching() {
    let progai = Arc::new(
        source(SourceKind::ProgAi)
            .respond(Some(payload(SourceKind::ProgAi, &[("bio", json!("hi\u{0000}there"))]))),
    );
    let h = Harness::new(&[progai]);
    let id = h.add_member(500);

    enrich_member(&h.deps, id).await.unwrap();

    let row = h.cache.get(id, SourceKind::ProgAi).unwrap();
    assert_eq!(
        row.data,
        Some(payload(SourceKind::ProgAi, &[("bio", json!("hithere"))]))
    );
}

#[tokio::test]
async fn out_of_credits_skips_the_vendor_and_marks_the_row_tried() {
    let clearbit = Arc::new(source(SourceKind::Clearbit).with_credits(false));
    let h = Harness::new(&[clearbit.clone()]);
    let id = h.add_member(500);
    h.seed_cache(id, SourceKind::Clearbit, Some(json!({})), 200 * DAY);

    let result = enrich_member(&h.deps, id).await.unwrap();

    assert_eq!(result.outcomes[&SourceKind::Clearbit], SourceOutcome::Starved);
    assert_eq!(clearbit.calls(), 0);
    assert_eq!(clearbit.probes(), 1);
    assert!(h.cache.get(id, SourceKind::Clearbit).unwrap().last_tried_at.is_some());
}

#[tokio::test]
async fn credit_status_is_probed_once_per_ttl() {
    let clearbit = Arc::new(source(SourceKind::Clearbit).with_credits(false));
    let h = Harness::new(&[clearbit.clone()]);
    let first = h.add_member(500);
    let second = h.add_member(500);

    enrich_member(&h.deps, first).await.unwrap();
    enrich_member(&h.deps, second).await.unwrap();

    assert_eq!(clearbit.probes(), 1);
    assert!(h.cache.get(first, SourceKind::Clearbit).is_none());
}

#[tokio::test]
async fn not_enrichable_member_is_skipped() {
    let progai = Arc::new(source(SourceKind::ProgAi).enrichable(false));
    let h = Harness::new(&[progai.clone()]);
    let id = h.add_member(500);

    let result = enrich_member(&h.deps, id).await.unwrap();

    assert_eq!(result.outcomes[&SourceKind::ProgAi], SourceOutcome::NotEnrichable);
    assert_eq!(progai.calls(), 0);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn rejected_request_skips_source_and_continues() {
    let clearbit = Arc::new(
        source(SourceKind::Clearbit).fail(VendorError::Unauthorized { status: 401 }),
    );
    let serp = Arc::new(source(SourceKind::Serp).respond(Some(json!({}))));
    let h = Harness::new(&[clearbit.clone(), serp.clone()]);
    let id = h.add_member(500);

    let result = enrich_member(&h.deps, id).await.unwrap();

    assert_eq!(result.outcomes[&SourceKind::Clearbit], SourceOutcome::Unavailable);
    assert_eq!(result.outcomes[&SourceKind::Serp], SourceOutcome::Inserted);
    assert!(h.cache.get(id, SourceKind::Clearbit).is_none());
}

#[tokio::test]
async fn transient_vendor_failure_is_returned_for_retry() {
    let progai = Arc::new(source(SourceKind::ProgAi).fail(VendorError::RateLimited));
    let h = Harness::new(&[progai]);
    let id = h.add_member(500);

    let err = enrich_member(&h.deps, id).await.unwrap_err();

    assert!(err.is_retryable());
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn unknown_member_is_a_permanent_failure() {
    let h = Harness::new(&[Arc::new(source(SourceKind::ProgAi))]);

    let err = enrich_member(&h.deps, uuid::Uuid::new_v4()).await.unwrap_err();

    assert!(!err.is_retryable());
}

#[tokio::test]
async fn quiet_members_are_enriched_but_not_reconciled() {
    let settings = WorkerSettings {
        min_activity_for_squash: 100,
        ..Default::default()
    };
    let progai = Arc::new(
        source(SourceKind::ProgAi)
            .respond(Some(payload(SourceKind::ProgAi, &[("jobTitle", json!("Engineer"))]))),
    );
    let clearbit = Arc::new(
        source(SourceKind::Clearbit)
            .respond(Some(payload(SourceKind::Clearbit, &[("location", json!("Berlin"))]))),
    );
    let h = Harness::with(&[progai, clearbit], MockOracle::new(), settings);
    let id = h.add_member(50);

    let result = enrich_member(&h.deps, id).await.unwrap();

    assert!(result.outcomes.values().all(SourceOutcome::changed));
    assert!(!result.reconciled);
    assert_eq!(h.profiles.profile(id).unwrap().attributes, json!({}));
    assert!(h.profiles.committed_writes().is_empty());
    assert_eq!(h.profiles.tried_count(id), 1);
}

#[tokio::test]
async fn active_member_with_changes_is_reconciled() {
    let progai = Arc::new(
        source(SourceKind::ProgAi)
            .respond(Some(payload(SourceKind::ProgAi, &[("jobTitle", json!("Engineer"))]))),
    );
    let clearbit = Arc::new(
        source(SourceKind::Clearbit)
            .respond(Some(payload(SourceKind::Clearbit, &[("location", json!("Berlin"))]))),
    );
    let h = Harness::new(&[progai, clearbit]);
    let id = h.add_member(500);

    let result = enrich_member(&h.deps, id).await.unwrap();

    assert!(result.reconciled);
    assert!(result.profile_updated);
    let attributes = h.profiles.profile(id).unwrap().attributes;
    assert_eq!(attributes["jobTitle"]["enrichment"], "Engineer");
    assert_eq!(attributes["location"]["default"], "Berlin");
    assert_eq!(h.profiles.enriched_count(id), 1);
    assert_eq!(h.search.members(), vec![id]);
}
