// Scripted source adapter for orchestrator and squash tests.
//
// MockSource treats its raw payloads as already-normalized data: an object is
// a single NormalizedEnrichmentData, an array a list of candidates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use enrichment_common::{
    EnrichmentCacheEntry, EnrichmentInput, NormalizedEnrichmentData, NormalizedResult, SourceKind,
};

use crate::error::{Result, VendorError};
use crate::source::{EnrichmentSource, SourceSettings, DAY_SECONDS};

pub struct MockSource {
    kind: SourceKind,
    settings: SourceSettings,
    enrichable: AtomicBool,
    credits: AtomicBool,
    responses: Mutex<VecDeque<Result<Option<Value>>>>,
    pub get_data_calls: AtomicUsize,
    pub credit_probes: AtomicUsize,
}

impl MockSource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            settings: SourceSettings {
                cache_obsolete_after_seconds: 90 * DAY_SECONDS,
                never_reenrich: false,
                max_concurrent_requests: 3,
                enrich_members_with_activity_more_than: None,
                enrichable_by_sql: "mi.verified".to_string(),
                also_find_inputs_in_source_caches: &[],
            },
            enrichable: AtomicBool::new(true),
            credits: AtomicBool::new(true),
            responses: Mutex::new(VecDeque::new()),
            get_data_calls: AtomicUsize::new(0),
            credit_probes: AtomicUsize::new(0),
        }
    }

    pub fn with_settings(mut self, f: impl FnOnce(&mut SourceSettings)) -> Self {
        f(&mut self.settings);
        self
    }

    pub fn enrichable(self, yes: bool) -> Self {
        self.enrichable.store(yes, Ordering::SeqCst);
        self
    }

    pub fn with_credits(self, yes: bool) -> Self {
        self.credits.store(yes, Ordering::SeqCst);
        self
    }

    /// Queue the next `get_data` result. An empty queue answers `Ok(None)`.
    pub fn respond(self, data: Option<Value>) -> Self {
        self.push(Ok(data));
        self
    }

    pub fn fail(self, err: VendorError) -> Self {
        self.push(Err(err));
        self
    }

    fn push(&self, r: Result<Option<Value>>) {
        self.responses.lock().unwrap().push_back(r);
    }

    pub fn calls(&self) -> usize {
        self.get_data_calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.credit_probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentSource for MockSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn is_enrichable(&self, _input: &EnrichmentInput, _caches: &[EnrichmentCacheEntry]) -> bool {
        self.enrichable.load(Ordering::SeqCst)
    }

    async fn get_data(
        &self,
        _input: &EnrichmentInput,
        _caches: &[EnrichmentCacheEntry],
    ) -> Result<Option<Value>> {
        self.get_data_calls.fetch_add(1, Ordering::SeqCst);
        self.responses.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    fn normalize(&self, raw: &Value) -> Option<NormalizedResult> {
        match raw {
            Value::Array(items) => {
                let profiles: Vec<NormalizedEnrichmentData> = items
                    .iter()
                    .filter_map(|i| serde_json::from_value(i.clone()).ok())
                    .collect();
                Some(NormalizedResult::Candidates(profiles))
            }
            other => serde_json::from_value(other.clone())
                .ok()
                .map(NormalizedResult::Single),
        }
    }

    async fn has_remaining_credits(&self) -> bool {
        self.credit_probes.fetch_add(1, Ordering::SeqCst);
        self.credits.load(Ordering::SeqCst)
    }
}
