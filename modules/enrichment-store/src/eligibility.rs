//! Bulk eligibility query for the population scanner.
//!
//! Each source contributes its SQL fragment, correlated with its own cache
//! obsolescence: a member qualifies for a source when one of its identities
//! matches the fragment and that source has no fresh cache row for it. The
//! fragments are static adapter code and may reference `members`, `mi`
//! (member identities) and `activity` (`total_count`).

use enrichment_common::SourceKind;

#[derive(Debug, Clone)]
pub struct SourceQueryInput {
    pub source: SourceKind,
    pub enrichable_by_sql: String,
    pub cache_obsolete_after_seconds: i64,
    pub never_reenrich: bool,
}

#[derive(Debug, Clone)]
pub struct EligibilityQuery {
    pub limit: i64,
    /// Members tried more recently than this are skipped.
    pub retry_after_seconds: i64,
    pub sources: Vec<SourceQueryInput>,
}

/// Columns shared by every member snapshot query. Binds nothing.
pub(crate) const MEMBER_SNAPSHOT_COLUMNS: &str = r#"
    members.id,
    members.display_name,
    NULLIF(members.attributes->'location'->>'default', '') AS location,
    NULLIF(members.attributes->'websiteUrl'->>'default', '') AS website,
    COALESCE(activity.total_count, 0) AS activity_count,
    COALESCE((
        SELECT jsonb_agg(jsonb_build_object(
            'platform', i.platform, 'type', i.type, 'value', i.value, 'verified', i.verified
        ) ORDER BY i.created_at)
        FROM member_identities i
        WHERE i.member_id = members.id AND i.deleted_at IS NULL
    ), '[]'::jsonb) AS identities
"#;

impl SourceQueryInput {
    fn clause(&self) -> String {
        let fresh = if self.never_reenrich {
            "TRUE".to_string()
        } else {
            format!(
                "c.updated_at > now() - make_interval(secs => {})",
                self.cache_obsolete_after_seconds
            )
        };

        format!(
            r#"(
            EXISTS (
                SELECT 1 FROM member_identities mi
                WHERE mi.member_id = members.id AND mi.deleted_at IS NULL
                  AND ({fragment})
            )
            AND NOT EXISTS (
                SELECT 1 FROM member_enrichment_cache c
                WHERE c.member_id = members.id AND c.source = '{source}' AND {fresh}
            )
        )"#,
            fragment = self.enrichable_by_sql,
            source = self.source.as_str(),
        )
    }
}

impl EligibilityQuery {
    /// SQL text. Binds `$1` = limit, `$2` = retry window in seconds.
    pub fn to_sql(&self) -> String {
        let per_source = if self.sources.is_empty() {
            "FALSE".to_string()
        } else {
            self.sources
                .iter()
                .map(SourceQueryInput::clause)
                .collect::<Vec<_>>()
                .join("\n        OR ")
        };

        format!(
            r#"
    SELECT {MEMBER_SNAPSHOT_COLUMNS}
    FROM members
    LEFT JOIN member_activity_counts activity ON activity.member_id = members.id
    LEFT JOIN member_enrichments me ON me.member_id = members.id
    WHERE members.deleted_at IS NULL
      AND NOT members.is_bot
      AND NOT members.is_organization
      AND (me.last_tried_at IS NULL OR me.last_tried_at < now() - make_interval(secs => $2::double precision))
      AND (
        {per_source}
      )
    ORDER BY activity.total_count DESC NULLS LAST, members.id
    LIMIT $1
    "#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(source: SourceKind, never_reenrich: bool) -> SourceQueryInput {
        SourceQueryInput {
            source,
            enrichable_by_sql: "mi.verified".to_string(),
            cache_obsolete_after_seconds: 7_776_000,
            never_reenrich,
        }
    }

    #[test]
    fn each_source_correlates_its_own_cache() {
        let q = EligibilityQuery {
            limit: 100,
            retry_after_seconds: 86_400,
            sources: vec![input(SourceKind::ProgAi, false), input(SourceKind::Crustdata, true)],
        };
        let sql = q.to_sql();

        assert!(sql.contains("c.source = 'progai' AND c.updated_at > now() - make_interval(secs => 7776000)"));
        assert!(sql.contains("c.source = 'crustdata' AND TRUE"));
        assert_eq!(sql.matches("EXISTS (").count(), 4);
        assert!(sql.contains("ORDER BY activity.total_count DESC"));
        assert!(sql.contains("LIMIT $1"));
    }

    #[test]
    fn no_sources_selects_nobody() {
        let q = EligibilityQuery {
            limit: 10,
            retry_after_seconds: 0,
            sources: vec![],
        };
        assert!(q.to_sql().contains("FALSE"));
    }
}
