//! progai-linkedin-scraper: progai profiles fetched by LinkedIn URL, one per
//! distinct handle the member is linked to.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use enrichment_common::{
    EnrichmentCacheEntry, EnrichmentInput, NormalizedResult, ProfileMetadata, SourceKind,
    VendorConfig,
};

use crate::error::Result;
use crate::linkedin::{discover_linkedin_handles, has_linkedin_input, LINKEDIN_HINT_SOURCES};
use crate::payload::id_string;
use crate::progai::{fetch_profile, normalize_profile};
use crate::source::{EnrichmentSource, SourceSettings, DAY_SECONDS};

pub fn settings() -> SourceSettings {
    SourceSettings {
        cache_obsolete_after_seconds: 90 * DAY_SECONDS,
        never_reenrich: false,
        max_concurrent_requests: 3,
        enrich_members_with_activity_more_than: None,
        enrichable_by_sql: "(mi.verified AND mi.type = 'username' AND mi.platform = 'linkedin')"
            .to_string(),
        also_find_inputs_in_source_caches: LINKEDIN_HINT_SOURCES,
    }
}

/// Normalize a cached list of scraped profiles into arbitration candidates.
pub fn normalize_profiles(raw: &Value, enrich_email_identities: bool) -> Option<NormalizedResult> {
    let candidates: Vec<_> = raw
        .as_array()?
        .iter()
        .filter_map(|profile| {
            let mut normalized = normalize_profile(profile, enrich_email_identities)?;
            normalized.metadata = profile
                .get("metadata")
                .and_then(|m| serde_json::from_value::<ProfileMetadata>(m.clone()).ok());
            Some(normalized)
        })
        .collect();

    if candidates.is_empty() {
        return None;
    }
    Some(NormalizedResult::Candidates(candidates))
}

fn cached_progai_id(caches: &[EnrichmentCacheEntry]) -> Option<String> {
    caches
        .iter()
        .find(|c| c.source == SourceKind::ProgAi)
        .and_then(|c| c.data.as_ref())
        .and_then(|d| d.get("id"))
        .and_then(id_string)
}

pub struct LinkedinScraperSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    enrich_email_identities: bool,
    settings: SourceSettings,
}

impl LinkedinScraperSource {
    pub fn new(http: reqwest::Client, config: &VendorConfig) -> Self {
        Self {
            http,
            base_url: config.progai_url.clone(),
            api_key: config.progai_api_key.clone(),
            enrich_email_identities: config.progai_enrich_email_identities,
            settings: settings(),
        }
    }
}

#[async_trait]
impl EnrichmentSource for LinkedinScraperSource {
    fn kind(&self) -> SourceKind {
        SourceKind::ProgAiLinkedinScraper
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn is_enrichable(&self, input: &EnrichmentInput, caches: &[EnrichmentCacheEntry]) -> bool {
        has_linkedin_input(input, caches, self.settings.also_find_inputs_in_source_caches)
    }

    async fn get_data(
        &self,
        input: &EnrichmentInput,
        caches: &[EnrichmentCacheEntry],
    ) -> Result<Option<Value>> {
        let progai_id = cached_progai_id(caches);
        let mut profiles = Vec::new();

        for candidate in
            discover_linkedin_handles(input, caches, self.settings.also_find_inputs_in_source_caches)
        {
            let linkedin_url = format!("https://linkedin.com/in/{}", candidate.handle);
            let Some(mut profile) = fetch_profile(
                self.kind(),
                &self.http,
                &self.base_url,
                &self.api_key,
                ("linkedin_url", &linkedin_url),
            )
            .await?
            else {
                continue;
            };

            // the progai cache already holds this exact profile
            if progai_id.is_some() && profile.get("id").and_then(id_string) == progai_id {
                debug!(member_id = %input.member_id, handle = %candidate.handle, "Scraped profile matches progai cache");
                continue;
            }

            if let Value::Object(map) = &mut profile {
                map.insert("metadata".to_string(), serde_json::to_value(candidate.metadata())?);
            }
            profiles.push(profile);
        }

        if profiles.is_empty() {
            return Ok(None);
        }
        Ok(Some(Value::Array(profiles)))
    }

    fn normalize(&self, raw: &Value) -> Option<NormalizedResult> {
        normalize_profiles(raw, self.enrich_email_identities)
    }

    async fn has_remaining_credits(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn candidates_carry_metadata() {
        let raw = json!([
            {
                "id": 1,
                "linkedin_url": "https://linkedin.com/in/jane",
                "title": "Engineer",
                "metadata": {"repeatedTimesInDifferentSources": 2, "isFromVerifiedSource": true}
            },
            {
                "id": 2,
                "linkedin_url": "https://linkedin.com/in/jane-other"
            }
        ]);

        let Some(NormalizedResult::Candidates(c)) = normalize_profiles(&raw, true) else {
            panic!("expected candidates");
        };
        assert_eq!(c.len(), 2);
        assert_eq!(
            c[0].metadata,
            Some(ProfileMetadata {
                repeated_times_in_different_sources: 2,
                is_from_verified_source: true
            })
        );
        assert!(c[1].metadata.is_none());
        assert!(c[0].has_linkedin_identity("jane"));
    }

    #[test]
    fn empty_list_normalizes_to_none() {
        assert!(normalize_profiles(&json!([]), true).is_none());
        assert!(normalize_profiles(&json!({"id": 1}), true).is_none());
    }

    #[test]
    fn progai_id_read_from_cache() {
        let caches = vec![EnrichmentCacheEntry {
            member_id: Uuid::new_v4(),
            source: SourceKind::ProgAi,
            data: Some(json!({"id": 42})),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_tried_at: None,
        }];
        assert_eq!(cached_progai_id(&caches).as_deref(), Some("42"));
        assert_eq!(cached_progai_id(&[]), None);
    }
}
