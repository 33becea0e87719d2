//! Per (member, source) cache of raw vendor payloads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use enrichment_common::{EnrichmentCacheEntry, Result, SourceKind};

#[async_trait]
pub trait EnrichmentCacheStore: Send + Sync {
    /// Rows for the given sources, in source order. Rows caching a miss
    /// (`data IS NULL`) are returned only with `include_empty`.
    async fn find_for_sources(
        &self,
        member_id: Uuid,
        sources: &[SourceKind],
        include_empty: bool,
    ) -> Result<Vec<EnrichmentCacheEntry>>;

    async fn find_for_all_sources(
        &self,
        member_id: Uuid,
        include_empty: bool,
    ) -> Result<Vec<EnrichmentCacheEntry>> {
        self.find_for_sources(member_id, &SourceKind::ALL, include_empty)
            .await
    }

    /// Create the row. Replaying an insert for an existing row overwrites it.
    async fn insert(&self, member_id: Uuid, source: SourceKind, data: Option<&Value>) -> Result<()>;

    async fn update_data(&self, member_id: Uuid, source: SourceKind, data: Option<&Value>)
        -> Result<()>;

    /// Re-confirm an unchanged payload: bumps `updated_at` and `last_tried_at`.
    async fn touch_updated_at(&self, member_id: Uuid, source: SourceKind) -> Result<()>;

    async fn touch_last_tried_at(&self, member_id: Uuid, source: SourceKind) -> Result<()>;
}

/// Postgres rejects `\u0000` inside jsonb strings; vendors occasionally send it.
pub fn strip_null_bytes(value: &Value) -> Value {
    match value {
        Value::String(s) if s.contains('\u{0}') => Value::String(s.replace('\u{0}', "")),
        Value::Array(items) => Value::Array(items.iter().map(strip_null_bytes).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.replace('\u{0}', ""), strip_null_bytes(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    member_id: Uuid,
    source: String,
    data: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_tried_at: Option<DateTime<Utc>>,
}

impl CacheRow {
    fn into_entry(self) -> Option<EnrichmentCacheEntry> {
        let source = match self.source.parse::<SourceKind>() {
            Ok(s) => s,
            Err(e) => {
                warn!(member_id = %self.member_id, error = %e, "Skipping cache row for unknown source");
                return None;
            }
        };
        Some(EnrichmentCacheEntry {
            member_id: self.member_id,
            source,
            data: self.data,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_tried_at: self.last_tried_at,
        })
    }
}

pub struct PgEnrichmentCacheStore {
    pool: PgPool,
}

impl PgEnrichmentCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrichmentCacheStore for PgEnrichmentCacheStore {
    async fn find_for_sources(
        &self,
        member_id: Uuid,
        sources: &[SourceKind],
        include_empty: bool,
    ) -> Result<Vec<EnrichmentCacheEntry>> {
        let names: Vec<String> = sources.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT member_id, source, data, created_at, updated_at, last_tried_at
            FROM member_enrichment_cache
            WHERE member_id = $1
              AND source = ANY($2)
              AND ($3 OR data IS NOT NULL)
            "#,
        )
        .bind(member_id)
        .bind(&names)
        .bind(include_empty)
        .fetch_all(&self.pool)
        .await?;

        let mut entries: Vec<EnrichmentCacheEntry> =
            rows.into_iter().filter_map(CacheRow::into_entry).collect();
        entries.sort_by_key(|e| e.source);
        Ok(entries)
    }

    async fn insert(&self, member_id: Uuid, source: SourceKind, data: Option<&Value>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO member_enrichment_cache (member_id, source, data, created_at, updated_at, last_tried_at)
            VALUES ($1, $2, $3, now(), now(), now())
            ON CONFLICT (member_id, source)
            DO UPDATE SET data = EXCLUDED.data, updated_at = now(), last_tried_at = now()
            "#,
        )
        .bind(member_id)
        .bind(source.as_str())
        .bind(data.map(strip_null_bytes))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_data(
        &self,
        member_id: Uuid,
        source: SourceKind,
        data: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE member_enrichment_cache
            SET data = $3, updated_at = now(), last_tried_at = now()
            WHERE member_id = $1 AND source = $2
            "#,
        )
        .bind(member_id)
        .bind(source.as_str())
        .bind(data.map(strip_null_bytes))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_updated_at(&self, member_id: Uuid, source: SourceKind) -> Result<()> {
        sqlx::query(
            "UPDATE member_enrichment_cache SET updated_at = now(), last_tried_at = now() \
             WHERE member_id = $1 AND source = $2",
        )
        .bind(member_id)
        .bind(source.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_last_tried_at(&self, member_id: Uuid, source: SourceKind) -> Result<()> {
        sqlx::query(
            "UPDATE member_enrichment_cache SET last_tried_at = now() \
             WHERE member_id = $1 AND source = $2",
        )
        .bind(member_id)
        .bind(source.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_bytes_removed_recursively() {
        let raw = json!({"bio": "a\u{0}b", "list": ["x\u{0}", 1], "k\u{0}": null});
        let clean = strip_null_bytes(&raw);
        assert_eq!(clean, json!({"bio": "ab", "list": ["x", 1], "k": null}));
    }
}
