//! Short-lived cache of "does this vendor still have credits".

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use enrichment_common::{Result, SourceKind};

#[async_trait]
pub trait CreditStatusCache: Send + Sync {
    /// `None` when nothing is cached or the entry expired.
    async fn get(&self, source: SourceKind) -> Result<Option<bool>>;

    async fn set(&self, source: SourceKind, has_credits: bool, ttl: Duration) -> Result<()>;
}

/// Shared across worker processes through the database.
pub struct PgCreditStatusCache {
    pool: PgPool,
}

impl PgCreditStatusCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditStatusCache for PgCreditStatusCache {
    async fn get(&self, source: SourceKind) -> Result<Option<bool>> {
        let row = sqlx::query_scalar::<_, bool>(
            "SELECT has_credits FROM enrichment_credit_status \
             WHERE source = $1 AND expires_at > now()",
        )
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set(&self, source: SourceKind, has_credits: bool, ttl: Duration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO enrichment_credit_status (source, has_credits, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (source)
            DO UPDATE SET has_credits = EXCLUDED.has_credits, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(source.as_str())
        .bind(has_credits)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Process-local variant for single-instance deployments and tests.
#[derive(Default)]
pub struct InMemoryCreditStatusCache {
    entries: RwLock<HashMap<SourceKind, (bool, Instant)>>,
}

impl InMemoryCreditStatusCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CreditStatusCache for InMemoryCreditStatusCache {
    async fn get(&self, source: SourceKind) -> Result<Option<bool>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&source)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(has, _)| *has))
    }

    async fn set(&self, source: SourceKind, has_credits: bool, ttl: Duration) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(source, (has_credits, Instant::now() + ttl));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_entries_expire() {
        let cache = InMemoryCreditStatusCache::new();
        assert_eq!(cache.get(SourceKind::Serp).await.unwrap(), None);

        cache.set(SourceKind::Serp, false, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(SourceKind::Serp).await.unwrap(), Some(false));

        cache.set(SourceKind::Serp, true, Duration::ZERO).await.unwrap();
        assert_eq!(cache.get(SourceKind::Serp).await.unwrap(), None);
    }
}
