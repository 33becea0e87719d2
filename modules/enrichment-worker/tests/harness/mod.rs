//! Shared fixtures for worker integration tests.
//!
//! Everything runs against the in-memory stores, scripted sources and a
//! scripted oracle; no network, no database.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use enrichment_common::{
    EnrichableMember, EnrichmentCacheEntry, ExistingMemberData, ExistingWorkExperience,
    MemberIdentity, SourceKind,
};
use enrichment_sources::testing::MockSource;
use enrichment_sources::SourceRegistry;
use enrichment_store::testing::{InMemoryCacheStore, InMemoryProfileStore};
use enrichment_store::InMemoryCreditStatusCache;
use enrichment_worker::credit_gate::CreditGate;
use enrichment_worker::testing::{MockOracle, RecordingSearchIndex};
use enrichment_worker::{EnrichmentDeps, WorkerSettings};

pub const DAY: i64 = 24 * 3600;

pub struct Harness {
    pub cache: Arc<InMemoryCacheStore>,
    pub profiles: Arc<InMemoryProfileStore>,
    pub oracle: Arc<MockOracle>,
    pub search: Arc<RecordingSearchIndex>,
    pub deps: EnrichmentDeps,
}

impl Harness {
    pub fn new(sources: &[Arc<MockSource>]) -> Self {
        Self::with(sources, MockOracle::new(), WorkerSettings::default())
    }

    pub fn with(sources: &[Arc<MockSource>], oracle: MockOracle, settings: WorkerSettings) -> Self {
        let cache = Arc::new(InMemoryCacheStore::new());
        let profiles = Arc::new(InMemoryProfileStore::new());
        let oracle = Arc::new(oracle);
        let search = Arc::new(RecordingSearchIndex::new());

        let mut registry = SourceRegistry::new();
        for source in sources {
            registry.register(source.clone());
        }

        let deps = EnrichmentDeps::builder()
            .cache(cache.clone())
            .profiles(profiles.clone())
            .credit_gate(Arc::new(CreditGate::new(
                Arc::new(InMemoryCreditStatusCache::new()),
                Duration::from_secs(60),
            )))
            .sources(registry)
            .oracle(oracle.clone())
            .search_index(search.clone())
            .settings(settings)
            .build();

        Self {
            cache,
            profiles,
            oracle,
            search,
            deps,
        }
    }

    /// Register a member with a LinkedIn handle and an empty profile.
    pub fn add_member(&self, activity_count: i64) -> Uuid {
        self.add_member_with(activity_count, empty_profile())
    }

    pub fn add_member_with(&self, activity_count: i64, profile: ExistingMemberData) -> Uuid {
        let member = member(activity_count);
        let id = member.id;
        self.profiles.add_member(member, profile);
        id
    }

    /// Put a cache row last updated `age_secs` ago.
    pub fn seed_cache(&self, member_id: Uuid, source: SourceKind, data: Option<Value>, age_secs: i64) {
        let at = Utc::now() - chrono::Duration::seconds(age_secs);
        self.cache.seed(EnrichmentCacheEntry {
            member_id,
            source,
            data,
            created_at: at,
            updated_at: at,
            last_tried_at: None,
        });
    }
}

pub fn member(activity_count: i64) -> EnrichableMember {
    EnrichableMember {
        id: Uuid::new_v4(),
        display_name: Some("Alice Smith".into()),
        location: None,
        website: None,
        identities: vec![MemberIdentity::username("linkedin", "alice", true)],
        activity_count,
    }
}

pub fn empty_profile() -> ExistingMemberData {
    ExistingMemberData {
        display_name: Some("Alice Smith".into()),
        attributes: json!({}),
        reach: BTreeMap::new(),
        identities: vec![MemberIdentity::username("linkedin", "alice", true)],
        organizations: vec![],
        contributions: vec![],
    }
}

pub fn source(kind: SourceKind) -> MockSource {
    MockSource::new(kind)
}

/// A normalized payload reporting `attributes` under the source's platform key.
pub fn payload(kind: SourceKind, attributes: &[(&str, Value)]) -> Value {
    let platform = kind.platform();
    let attributes: serde_json::Map<String, Value> = attributes
        .iter()
        .map(|(name, value)| {
            let mut platforms = serde_json::Map::new();
            platforms.insert(platform.clone(), value.clone());
            (name.to_string(), Value::Object(platforms))
        })
        .collect();
    json!({ "attributes": attributes })
}

pub fn linkedin(handle: &str) -> Value {
    json!({"platform": "linkedin", "type": "username", "value": handle, "verified": false})
}

pub fn work(name: &str, title: &str, start: &str, end: Option<&str>, source: &str) -> Value {
    json!({
        "name": name,
        "title": title,
        "startDate": start,
        "endDate": end,
        "source": source,
    })
}

pub fn existing_work(
    org_id: Uuid,
    org_name: &str,
    title: &str,
    start: (i32, u32, u32),
    end: Option<(i32, u32, u32)>,
    source: &str,
) -> ExistingWorkExperience {
    let date = |(y, m, d): (i32, u32, u32)| chrono::NaiveDate::from_ymd_opt(y, m, d);
    ExistingWorkExperience {
        id: Uuid::new_v4(),
        org_id,
        org_name: org_name.to_string(),
        job_title: Some(title.to_string()),
        date_start: date(start),
        date_end: end.and_then(date),
        source: Some(source.to_string()),
        identities: vec![],
    }
}
