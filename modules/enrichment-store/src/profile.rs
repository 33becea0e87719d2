//! Member profile reads and the transactional write path used by squashing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use enrichment_common::{
    Contribution, EnrichableMember, ExistingMemberData, ExistingWorkExperience, MemberIdentity,
    NormalizedOrganization, OrganizationIdentity, Result, MANUAL_WORK_EXPERIENCE_SOURCE,
};

use crate::eligibility::{EligibilityQuery, MEMBER_SNAPSHOT_COLUMNS};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_enrichable_members(&self, query: &EligibilityQuery) -> Result<Vec<EnrichableMember>>;

    async fn find_member(&self, member_id: Uuid) -> Result<Option<EnrichableMember>>;

    async fn fetch_member_data_for_squashing(
        &self,
        member_id: Uuid,
    ) -> Result<Option<ExistingMemberData>>;

    async fn touch_last_tried_at(&self, member_id: Uuid) -> Result<()>;

    async fn begin(&self) -> Result<Box<dyn ProfileTransaction>>;
}

/// Writes for one squash. Dropping without `commit` rolls everything back.
#[async_trait]
pub trait ProfileTransaction: Send {
    /// Insert identities the member does not have yet.
    async fn insert_identities(&mut self, member_id: Uuid, identities: &[MemberIdentity]) -> Result<()>;

    async fn update_attributes(&mut self, member_id: Uuid, attributes: &Value) -> Result<()>;

    async fn update_reach(&mut self, member_id: Uuid, reach: &BTreeMap<String, i64>) -> Result<()>;

    async fn update_contributions(
        &mut self,
        member_id: Uuid,
        contributions: &[Contribution],
    ) -> Result<()>;

    /// Resolve by verified identity (then by name when there is none), creating
    /// the organization when nothing matches.
    async fn find_or_create_organization(&mut self, org: &NormalizedOrganization) -> Result<Uuid>;

    async fn is_affiliation_blocked(&mut self, organization_id: Uuid) -> Result<bool>;

    async fn delete_work_experience(&mut self, member_id: Uuid, id: Uuid) -> Result<()>;

    /// `None` when an identical span for the same organization already exists.
    async fn insert_work_experience(
        &mut self,
        member_id: Uuid,
        entry: &NormalizedOrganization,
        organization_id: Uuid,
    ) -> Result<Option<Uuid>>;

    async fn update_work_experience_end_date(&mut self, id: Uuid, end: Option<NaiveDate>) -> Result<()>;

    /// Record `allow_affiliation = false` for a member's work experience.
    async fn block_affiliation(&mut self, member_id: Uuid, member_organization_id: Uuid) -> Result<()>;

    /// Set `last_updated_at` (and `last_tried_at`).
    async fn mark_enriched(&mut self, member_id: Uuid) -> Result<()>;

    async fn mark_tried(&mut self, member_id: Uuid) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct MemberSnapshotRow {
    id: Uuid,
    display_name: Option<String>,
    location: Option<String>,
    website: Option<String>,
    activity_count: i64,
    identities: Json<Vec<MemberIdentity>>,
}

impl From<MemberSnapshotRow> for EnrichableMember {
    fn from(row: MemberSnapshotRow) -> Self {
        EnrichableMember {
            id: row.id,
            display_name: row.display_name,
            location: row.location,
            website: row.website,
            identities: row.identities.0,
            activity_count: row.activity_count,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MemberProfileRow {
    display_name: Option<String>,
    attributes: Value,
    reach: Value,
    contributions: Option<Value>,
}

#[derive(Debug, sqlx::FromRow)]
struct WorkExperienceRow {
    id: Uuid,
    org_id: Uuid,
    org_name: String,
    job_title: Option<String>,
    date_start: Option<NaiveDate>,
    date_end: Option<NaiveDate>,
    source: Option<String>,
    identities: Json<Vec<OrganizationIdentity>>,
}

impl From<WorkExperienceRow> for ExistingWorkExperience {
    fn from(row: WorkExperienceRow) -> Self {
        ExistingWorkExperience {
            id: row.id,
            org_id: row.org_id,
            org_name: row.org_name,
            job_title: row.job_title,
            date_start: row.date_start,
            date_end: row.date_end,
            source: row.source,
            identities: row.identities.0,
        }
    }
}

/// Reach is stored as loose JSON; keep the integer entries.
fn reach_map(v: &Value) -> BTreeMap<String, i64> {
    v.as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_i64().map(|n| (k.clone(), n)))
                .collect()
        })
        .unwrap_or_default()
}

/// Stored contributions; anything that no longer parses counts as none.
fn contribution_list(v: Option<Value>) -> Vec<Contribution> {
    v.and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn find_enrichable_members(&self, query: &EligibilityQuery) -> Result<Vec<EnrichableMember>> {
        let sql = query.to_sql();
        let rows = sqlx::query_as::<_, MemberSnapshotRow>(&sql)
            .bind(query.limit)
            .bind(query.retry_after_seconds as f64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_member(&self, member_id: Uuid) -> Result<Option<EnrichableMember>> {
        let sql = format!(
            r#"
            SELECT {MEMBER_SNAPSHOT_COLUMNS}
            FROM members
            LEFT JOIN member_activity_counts activity ON activity.member_id = members.id
            WHERE members.id = $1 AND members.deleted_at IS NULL
            "#
        );
        let row = sqlx::query_as::<_, MemberSnapshotRow>(&sql)
            .bind(member_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn fetch_member_data_for_squashing(
        &self,
        member_id: Uuid,
    ) -> Result<Option<ExistingMemberData>> {
        let Some(profile) = sqlx::query_as::<_, MemberProfileRow>(
            r#"
            SELECT display_name, attributes, reach, contributions
            FROM members
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let identities = sqlx::query_scalar::<_, Json<Vec<MemberIdentity>>>(
            r#"
            SELECT COALESCE(jsonb_agg(jsonb_build_object(
                'platform', platform, 'type', type, 'value', value, 'verified', verified
            ) ORDER BY created_at), '[]'::jsonb)
            FROM member_identities
            WHERE member_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(member_id)
        .fetch_one(&self.pool)
        .await?
        .0;

        let organizations = sqlx::query_as::<_, WorkExperienceRow>(
            r#"
            SELECT
                mwe.id,
                mwe.organization_id AS org_id,
                o.display_name AS org_name,
                mwe.title AS job_title,
                mwe.date_start,
                mwe.date_end,
                mwe.source,
                COALESCE((
                    SELECT jsonb_agg(jsonb_build_object(
                        'platform', oi.platform, 'type', oi.type, 'value', oi.value, 'verified', oi.verified
                    ))
                    FROM organization_identities oi
                    WHERE oi.organization_id = o.id
                ), '[]'::jsonb) AS identities
            FROM member_work_experiences mwe
            JOIN organizations o ON o.id = mwe.organization_id
            WHERE mwe.member_id = $1 AND mwe.deleted_at IS NULL
            ORDER BY mwe.date_start NULLS LAST, mwe.created_at
            "#,
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

        Ok(Some(ExistingMemberData {
            display_name: profile.display_name,
            reach: reach_map(&profile.reach),
            attributes: profile.attributes,
            identities,
            organizations,
            contributions: contribution_list(profile.contributions),
        }))
    }

    async fn touch_last_tried_at(&self, member_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO member_enrichments (member_id, last_tried_at)
            VALUES ($1, now())
            ON CONFLICT (member_id) DO UPDATE SET last_tried_at = now()
            "#,
        )
        .bind(member_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn ProfileTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgProfileTransaction { tx }))
    }
}

pub struct PgProfileTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgProfileTransaction {
    async fn find_organization_by_verified_identity(
        &mut self,
        identity: &OrganizationIdentity,
    ) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT o.id
            FROM organizations o
            JOIN organization_identities oi ON oi.organization_id = o.id
            WHERE o.deleted_at IS NULL
              AND oi.verified
              AND oi.platform = $1
              AND oi.type = $2
              AND lower(oi.value) = lower($3)
            ORDER BY o.created_at
            LIMIT 1
            "#,
        )
        .bind(&identity.platform)
        .bind(identity.identity_type.as_str())
        .bind(&identity.value)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn find_organization_by_name(&mut self, name: &str) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM organizations
            WHERE deleted_at IS NULL AND lower(display_name) = lower($1)
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl ProfileTransaction for PgProfileTransaction {
    async fn insert_identities(&mut self, member_id: Uuid, identities: &[MemberIdentity]) -> Result<()> {
        for identity in identities {
            sqlx::query(
                r#"
                INSERT INTO member_identities (member_id, platform, type, value, verified, source)
                VALUES ($1, $2, $3, $4, $5, 'enrichment')
                ON CONFLICT (member_id, platform, type, value) DO NOTHING
                "#,
            )
            .bind(member_id)
            .bind(&identity.platform)
            .bind(identity.identity_type.as_str())
            .bind(&identity.value)
            .bind(identity.verified)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn update_attributes(&mut self, member_id: Uuid, attributes: &Value) -> Result<()> {
        sqlx::query("UPDATE members SET attributes = $2, updated_at = now() WHERE id = $1")
            .bind(member_id)
            .bind(attributes)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_reach(&mut self, member_id: Uuid, reach: &BTreeMap<String, i64>) -> Result<()> {
        sqlx::query("UPDATE members SET reach = $2, updated_at = now() WHERE id = $1")
            .bind(member_id)
            .bind(Json(reach))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_contributions(
        &mut self,
        member_id: Uuid,
        contributions: &[Contribution],
    ) -> Result<()> {
        sqlx::query("UPDATE members SET contributions = $2, updated_at = now() WHERE id = $1")
            .bind(member_id)
            .bind(Json(contributions))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_or_create_organization(&mut self, org: &NormalizedOrganization) -> Result<Uuid> {
        for identity in org.identities.iter().filter(|i| i.verified) {
            if let Some(id) = self.find_organization_by_verified_identity(identity).await? {
                return Ok(id);
            }
        }

        let has_verified = org.identities.iter().any(|i| i.verified);
        if !has_verified && !org.name.is_empty() {
            if let Some(id) = self.find_organization_by_name(&org.name).await? {
                return Ok(id);
            }
        }

        let display_name = if org.name.is_empty() {
            org.identities
                .iter()
                .find(|i| i.verified)
                .map(|i| i.value.clone())
                .unwrap_or_default()
        } else {
            org.name.clone()
        };

        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO organizations (display_name, description) VALUES ($1, $2) RETURNING id",
        )
        .bind(&display_name)
        .bind(&org.organization_description)
        .fetch_one(&mut *self.tx)
        .await?;

        for identity in &org.identities {
            sqlx::query(
                r#"
                INSERT INTO organization_identities (organization_id, platform, type, value, verified)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(id)
            .bind(&identity.platform)
            .bind(identity.identity_type.as_str())
            .bind(&identity.value)
            .bind(identity.verified)
            .execute(&mut *self.tx)
            .await?;
        }

        debug!(organization_id = %id, name = %display_name, "Created organization");
        Ok(id)
    }

    async fn is_affiliation_blocked(&mut self, organization_id: Uuid) -> Result<bool> {
        let blocked = sqlx::query_scalar::<_, bool>(
            "SELECT is_affiliation_blocked FROM organizations WHERE id = $1",
        )
        .bind(organization_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(blocked.unwrap_or(false))
    }

    async fn delete_work_experience(&mut self, member_id: Uuid, id: Uuid) -> Result<()> {
        sqlx::query(
            "DELETE FROM member_organization_affiliation_overrides \
             WHERE member_id = $1 AND member_organization_id = $2",
        )
        .bind(member_id)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            "UPDATE member_work_experiences SET deleted_at = now() \
             WHERE member_id = $1 AND id = $2 AND deleted_at IS NULL",
        )
        .bind(member_id)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_work_experience(
        &mut self,
        member_id: Uuid,
        entry: &NormalizedOrganization,
        organization_id: Uuid,
    ) -> Result<Option<Uuid>> {
        // manual entries win over whatever is stored for the same span
        let on_conflict = if entry.source == MANUAL_WORK_EXPERIENCE_SOURCE {
            "DO UPDATE SET title = EXCLUDED.title, source = EXCLUDED.source, updated_at = now()"
        } else {
            "DO NOTHING"
        };

        let sql = format!(
            r#"
            INSERT INTO member_work_experiences
                (member_id, organization_id, title, date_start, date_end, source)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (
                member_id,
                organization_id,
                COALESCE(date_start, '1900-01-01'::date),
                COALESCE(date_end, '1900-01-01'::date)
            ) WHERE deleted_at IS NULL
            {on_conflict}
            RETURNING id
            "#
        );

        let id = sqlx::query_scalar::<_, Uuid>(&sql)
            .bind(member_id)
            .bind(organization_id)
            .bind(&entry.title)
            .bind(entry.start_date)
            .bind(entry.end_date)
            .bind(&entry.source)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id)
    }

    async fn update_work_experience_end_date(&mut self, id: Uuid, end: Option<NaiveDate>) -> Result<()> {
        sqlx::query(
            "UPDATE member_work_experiences SET date_end = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(end)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn block_affiliation(&mut self, member_id: Uuid, member_organization_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO member_organization_affiliation_overrides
                (member_id, member_organization_id, allow_affiliation)
            VALUES ($1, $2, false)
            ON CONFLICT (member_id, member_organization_id)
            DO UPDATE SET allow_affiliation = false
            "#,
        )
        .bind(member_id)
        .bind(member_organization_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_enriched(&mut self, member_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO member_enrichments (member_id, last_tried_at, last_updated_at)
            VALUES ($1, now(), now())
            ON CONFLICT (member_id)
            DO UPDATE SET last_tried_at = now(), last_updated_at = now()
            "#,
        )
        .bind(member_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_tried(&mut self, member_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO member_enrichments (member_id, last_tried_at)
            VALUES ($1, now())
            ON CONFLICT (member_id) DO UPDATE SET last_tried_at = now()
            "#,
        )
        .bind(member_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
