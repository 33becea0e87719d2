//! Short-TTL gate in front of vendor quota probes.
//!
//! The status lives in a [`CreditStatusCache`] shared across workers. Within
//! one process, callers that miss the cache at the same time wait on a
//! per-source lock so only one of them probes the vendor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use enrichment_common::{Result, SourceKind};
use enrichment_sources::EnrichmentSource;
use enrichment_store::CreditStatusCache;

pub const DEFAULT_CREDIT_STATUS_TTL: Duration = Duration::from_secs(60);

pub struct CreditGate {
    cache: Arc<dyn CreditStatusCache>,
    ttl: Duration,
    probes: HashMap<SourceKind, Mutex<()>>,
}

impl CreditGate {
    pub fn new(cache: Arc<dyn CreditStatusCache>, ttl: Duration) -> Self {
        let probes = SourceKind::ALL
            .into_iter()
            .map(|kind| (kind, Mutex::new(())))
            .collect();
        Self { cache, ttl, probes }
    }

    pub async fn has_remaining_credits(&self, source: &dyn EnrichmentSource) -> Result<bool> {
        let kind = source.kind();
        if let Some(cached) = self.cache.get(kind).await? {
            return Ok(cached);
        }

        let _guard = match self.probes.get(&kind) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        // another caller may have probed while we waited
        if let Some(cached) = self.cache.get(kind).await? {
            return Ok(cached);
        }

        let has_credits = source.has_remaining_credits().await;
        self.cache.set(kind, has_credits, self.ttl).await?;

        if has_credits {
            debug!(source = %kind, "Vendor credits available");
        } else {
            info!(source = %kind, ttl_secs = self.ttl.as_secs(), "Vendor out of credits");
        }
        Ok(has_credits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrichment_sources::testing::MockSource;
    use enrichment_store::InMemoryCreditStatusCache;

    fn gate() -> CreditGate {
        CreditGate::new(
            Arc::new(InMemoryCreditStatusCache::new()),
            DEFAULT_CREDIT_STATUS_TTL,
        )
    }

    #[tokio::test]
    async fn probe_result_is_cached() {
        let gate = gate();
        let source = MockSource::new(SourceKind::Serp).with_credits(false);

        assert!(!gate.has_remaining_credits(&source).await.unwrap());
        assert!(!gate.has_remaining_credits(&source).await.unwrap());
        assert_eq!(source.probes(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_collapse_into_one_probe() {
        let gate = Arc::new(gate());
        let source = Arc::new(MockSource::new(SourceKind::Crustdata));

        let calls = (0..8).map(|_| {
            let gate = gate.clone();
            let source = source.clone();
            tokio::spawn(async move { gate.has_remaining_credits(source.as_ref()).await })
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.into_iter().all(|r| r.unwrap().unwrap()));
        assert_eq!(source.probes(), 1);
    }

    #[tokio::test]
    async fn expired_status_is_probed_again() {
        let gate = CreditGate::new(Arc::new(InMemoryCreditStatusCache::new()), Duration::ZERO);
        let source = MockSource::new(SourceKind::ProgAi);

        gate.has_remaining_credits(&source).await.unwrap();
        gate.has_remaining_credits(&source).await.unwrap();
        assert_eq!(source.probes(), 2);
    }
}
