use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use enrichment_common::{NormalizedResult, SourceKind, VendorConfig};

use crate::clearbit::ClearbitSource;
use crate::crustdata::CrustdataSource;
use crate::linkedin_scraper::LinkedinScraperSource;
use crate::progai::ProgAiSource;
use crate::serp::SerpSource;
use crate::source::EnrichmentSource;

/// The enabled adapters, keyed by source. Iteration follows `SourceKind` order.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<SourceKind, Arc<dyn EnrichmentSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the adapters for `enabled`, sharing one HTTP connection pool.
    pub fn from_config(config: &VendorConfig, enabled: &[SourceKind], http: reqwest::Client) -> Self {
        let mut registry = Self::new();
        for kind in enabled {
            let source: Arc<dyn EnrichmentSource> = match kind {
                SourceKind::ProgAi => Arc::new(ProgAiSource::new(http.clone(), config)),
                SourceKind::Clearbit => Arc::new(ClearbitSource::new(http.clone(), config)),
                SourceKind::Serp => Arc::new(SerpSource::new(http.clone(), config)),
                SourceKind::ProgAiLinkedinScraper => {
                    Arc::new(LinkedinScraperSource::new(http.clone(), config))
                }
                SourceKind::Crustdata => Arc::new(CrustdataSource::new(http.clone(), config)),
            };
            registry.register(source);
        }
        registry
    }

    pub fn register(&mut self, source: Arc<dyn EnrichmentSource>) {
        self.sources.insert(source.kind(), source);
    }

    pub fn with(mut self, source: Arc<dyn EnrichmentSource>) -> Self {
        self.register(source);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn EnrichmentSource>> {
        self.sources.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        self.sources.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn EnrichmentSource>> {
        self.sources.values()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Normalize a cached payload with its source's adapter.
    pub fn normalize(&self, kind: SourceKind, raw: &Value) -> Option<NormalizedResult> {
        self.sources.get(&kind)?.normalize(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_enabled_sources_in_order() {
        let registry = SourceRegistry::from_config(
            &VendorConfig::default(),
            &[SourceKind::Crustdata, SourceKind::ProgAi],
            reqwest::Client::new(),
        );
        assert_eq!(registry.kinds(), vec![SourceKind::ProgAi, SourceKind::Crustdata]);
        assert!(registry.get(SourceKind::Serp).is_none());
        assert_eq!(
            registry.get(SourceKind::Crustdata).map(|s| s.settings().never_reenrich),
            Some(true)
        );
    }
}
