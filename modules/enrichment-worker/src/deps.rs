use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use typed_builder::TypedBuilder;

use ai_client::Claude;
use enrichment_common::EnrichmentConfig;
use enrichment_sources::SourceRegistry;
use enrichment_store::{
    CreditStatusCache, EnrichmentCacheStore, PgCreditStatusCache, PgEnrichmentCacheStore,
    PgProfileStore, ProfileStore,
};

use crate::credit_gate::{CreditGate, DEFAULT_CREDIT_STATUS_TTL};
use crate::oracle::{ArbitrationOracle, LlmArbitrationOracle, UnavailableOracle};
use crate::search_index::{HttpSearchIndex, NoopSearchIndex, SearchIndex};

/// Sweep and reconciliation tuning.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub page_size: i64,
    pub global_max_concurrency: usize,
    /// Members at or below this activity count are enriched but never squashed.
    pub min_activity_for_squash: i64,
    pub idle_interval: Duration,
    pub retry_tried_members_after: Duration,
    pub attribute_platform_priority: Vec<String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            global_max_concurrency: 15,
            min_activity_for_squash: 10,
            idle_interval: Duration::from_secs(300),
            retry_tried_members_after: Duration::from_secs(24 * 3600),
            attribute_platform_priority: ["custom", "enrichment", "github", "linkedin"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl From<&EnrichmentConfig> for WorkerSettings {
    fn from(config: &EnrichmentConfig) -> Self {
        Self {
            page_size: config.page_size,
            global_max_concurrency: config.global_max_concurrency.max(1),
            min_activity_for_squash: config.min_activity_for_squash,
            idle_interval: config.idle_interval,
            retry_tried_members_after: config.retry_tried_members_after,
            attribute_platform_priority: config.attribute_platform_priority.clone(),
        }
    }
}

/// Shared dependency container for the orchestrator, sweep and squasher.
#[derive(Clone, TypedBuilder)]
pub struct EnrichmentDeps {
    pub cache: Arc<dyn EnrichmentCacheStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub credit_gate: Arc<CreditGate>,
    pub sources: SourceRegistry,
    #[builder(default = Arc::new(UnavailableOracle))]
    pub oracle: Arc<dyn ArbitrationOracle>,
    #[builder(default = Arc::new(NoopSearchIndex))]
    pub search_index: Arc<dyn SearchIndex>,
    #[builder(default)]
    pub settings: WorkerSettings,
}

impl EnrichmentDeps {
    /// Production wiring: Postgres stores, configured vendors, Claude when a key is set.
    pub fn from_config(pool: PgPool, config: &EnrichmentConfig) -> Self {
        let http = reqwest::Client::new();

        let credit_cache: Arc<dyn CreditStatusCache> =
            Arc::new(PgCreditStatusCache::new(pool.clone()));
        let ttl = if config.credit_status_ttl.is_zero() {
            DEFAULT_CREDIT_STATUS_TTL
        } else {
            config.credit_status_ttl
        };

        let oracle: Arc<dyn ArbitrationOracle> = match &config.anthropic_api_key {
            Some(key) => Arc::new(LlmArbitrationOracle::new(Arc::new(
                Claude::new(key, &config.anthropic_model).with_http_client(http.clone()),
            ))),
            None => {
                tracing::warn!("ANTHROPIC_API_KEY not set, contested fields will not be arbitrated");
                Arc::new(UnavailableOracle)
            }
        };

        let search_index: Arc<dyn SearchIndex> = match &config.search_sync_url {
            Some(url) => Arc::new(HttpSearchIndex::new(http.clone(), url.clone())),
            None => Arc::new(NoopSearchIndex),
        };

        Self::builder()
            .cache(Arc::new(PgEnrichmentCacheStore::new(pool.clone())))
            .profiles(Arc::new(PgProfileStore::new(pool)))
            .credit_gate(Arc::new(CreditGate::new(credit_cache, ttl)))
            .sources(SourceRegistry::from_config(&config.vendors, &config.sources, http))
            .oracle(oracle)
            .search_index(search_index)
            .settings(WorkerSettings::from(config))
            .build()
    }
}
