//! serp: finds a LinkedIn profile URL through a Google search.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use enrichment_common::{
    platform, EnrichmentCacheEntry, EnrichmentInput, MemberIdentity, NormalizedEnrichmentData,
    NormalizedResult, SourceKind, VendorConfig,
};

use crate::error::Result;
use crate::http::send_json;
use crate::payload::{decode, null_as_default};
use crate::social::{linkedin_profile_handle, normalize_linkedin_url};
use crate::source::{EnrichmentSource, SourceSettings, DAY_SECONDS};

const ACTIVITY_FLOOR: i64 = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerpCached {
    linkedin_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search_information: Option<SearchInformation>,
    #[serde(default, deserialize_with = "null_as_default")]
    organic_results: Vec<OrganicResult>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchInformation {
    #[serde(default)]
    total_results: Option<i64>,
    #[serde(default)]
    spelling_fix: Option<String>,
    #[serde(default)]
    spelling_fix_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountUsage {
    #[serde(default)]
    total_searches_left: i64,
}

/// First organic result, unless the engine rewrote the query.
fn first_profile_link(resp: SearchResponse) -> Option<String> {
    let info = resp.search_information?;
    if info.total_results.unwrap_or(0) <= 0
        || info.spelling_fix.is_some()
        || info.spelling_fix_type.is_some()
    {
        return None;
    }
    resp.organic_results
        .into_iter()
        .next()
        .and_then(|r| r.link)
        .filter(|l| !l.is_empty())
}

pub fn normalize_result(raw: &Value) -> Option<NormalizedEnrichmentData> {
    let cached: SerpCached = decode(raw, "serp")?;
    let url = normalize_linkedin_url(&cached.linkedin_url)?;
    let handle = linkedin_profile_handle(&url)?;

    Some(NormalizedEnrichmentData {
        identities: vec![MemberIdentity::username(platform::LINKEDIN, handle, false)],
        ..Default::default()
    })
}

pub fn settings() -> SourceSettings {
    SourceSettings {
        cache_obsolete_after_seconds: 120 * DAY_SECONDS,
        never_reenrich: false,
        max_concurrent_requests: 10,
        enrich_members_with_activity_more_than: Some(ACTIVITY_FLOOR),
        enrichable_by_sql: format!(
            "(activity.total_count > {ACTIVITY_FLOOR}) AND \
             (members.display_name LIKE '% %') AND \
             (members.attributes->'location'->>'default' IS NOT NULL AND members.attributes->'location'->>'default' <> '') AND \
             ((members.attributes->'websiteUrl'->>'default' IS NOT NULL AND members.attributes->'websiteUrl'->>'default' <> '') OR \
              (mi.verified AND mi.type = 'username' AND mi.platform = 'github') OR \
              (mi.verified AND mi.type = 'email'))"
        ),
        also_find_inputs_in_source_caches: &[],
    }
}

pub struct SerpSource {
    http: reqwest::Client,
    url: String,
    account_url: String,
    api_key: String,
    settings: SourceSettings,
}

impl SerpSource {
    pub fn new(http: reqwest::Client, config: &VendorConfig) -> Self {
        Self {
            http,
            url: config.serp_url.clone(),
            account_url: config.serp_account_url.clone(),
            api_key: config.serp_api_key.clone(),
            settings: settings(),
        }
    }

    async fn search(&self, display_name: &str, location: &str, identifier: &str) -> Result<Option<String>> {
        let query = format!("\"{display_name}\" {location} \"{identifier}\" site:linkedin.com/in");
        let request = self.http.get(&self.url).query(&[
            ("api_key", self.api_key.as_str()),
            ("q", query.as_str()),
            ("num", "3"),
            ("engine", "google"),
        ]);

        let Some(body) = send_json(self.kind(), request).await? else {
            debug!(display_name, identifier, "No search results");
            return Ok(None);
        };
        let resp: SearchResponse = serde_json::from_value(body)?;
        Ok(first_profile_link(resp))
    }
}

#[async_trait]
impl EnrichmentSource for SerpSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Serp
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn is_enrichable(&self, input: &EnrichmentInput, _caches: &[EnrichmentCacheEntry]) -> bool {
        let has_full_name = input
            .display_name
            .as_deref()
            .is_some_and(|n| n.split(' ').count() > 1);

        has_full_name
            && input.activity_count > ACTIVITY_FLOOR
            && input.location.is_some()
            && (input.email.is_some() || input.github.is_some() || input.website.is_some())
    }

    async fn get_data(
        &self,
        input: &EnrichmentInput,
        _caches: &[EnrichmentCacheEntry],
    ) -> Result<Option<Value>> {
        let (Some(name), Some(location)) = (input.display_name.as_deref(), input.location.as_deref())
        else {
            return Ok(None);
        };

        let identifiers = [
            input.website.as_deref(),
            input.github.as_ref().map(|g| g.value.as_str()),
            input.email.as_ref().map(|e| e.value.as_str()),
        ];

        for identifier in identifiers.into_iter().flatten() {
            if let Some(link) = self.search(name, location, identifier).await? {
                return Ok(Some(json!({ "linkedinUrl": link })));
            }
        }
        Ok(None)
    }

    fn normalize(&self, raw: &Value) -> Option<NormalizedResult> {
        normalize_result(raw).map(NormalizedResult::Single)
    }

    async fn has_remaining_credits(&self) -> bool {
        let request = self
            .http
            .get(&self.account_url)
            .query(&[("api_key", self.api_key.as_str())]);

        let usage = match send_json(self.kind(), request).await {
            Ok(Some(body)) => serde_json::from_value::<AccountUsage>(body).map_err(Into::into),
            Ok(None) => Ok(AccountUsage { total_searches_left: 0 }),
            Err(e) => Err(e),
        };

        match usage {
            Ok(u) => u.total_searches_left > 0,
            Err(e) => {
                error!(error = %e, "Error while checking serp account usage");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_organic_result() {
        let resp: SearchResponse = serde_json::from_value(json!({
            "search_information": {"total_results": 2},
            "organic_results": [
                {"link": "https://www.linkedin.com/in/jane-doe"},
                {"link": "https://www.linkedin.com/in/other"}
            ]
        }))
        .unwrap();
        assert_eq!(
            first_profile_link(resp).as_deref(),
            Some("https://www.linkedin.com/in/jane-doe")
        );
    }

    #[test]
    fn spelling_fix_discards_results() {
        let resp: SearchResponse = serde_json::from_value(json!({
            "search_information": {"total_results": 2, "spelling_fix": "Jane Doh"},
            "organic_results": [{"link": "https://www.linkedin.com/in/jane-doh"}]
        }))
        .unwrap();
        assert_eq!(first_profile_link(resp), None);

        let empty: SearchResponse = serde_json::from_value(json!({
            "search_information": {"total_results": 0},
            "organic_results": null
        }))
        .unwrap();
        assert_eq!(first_profile_link(empty), None);
    }

    #[test]
    fn normalizes_to_unverified_linkedin_identity() {
        let n = normalize_result(&json!({"linkedinUrl": "https://de.linkedin.com/in/jane-doe/?trk=x"}))
            .unwrap();
        assert_eq!(n.identities.len(), 1);
        assert_eq!(n.identities[0].value, "jane-doe");
        assert!(!n.identities[0].verified);
        assert!(n.attributes.is_empty());
    }

    #[test]
    fn needs_full_name_location_and_identifier() {
        let source = SerpSource::new(reqwest::Client::new(), &VendorConfig::default());
        let mut input = EnrichmentInput {
            member_id: uuid::Uuid::new_v4(),
            email: None,
            linkedin: None,
            github: None,
            display_name: Some("Jane Doe".into()),
            website: Some("https://jane.dev".into()),
            location: Some("Berlin".into()),
            activity_count: 501,
        };
        assert!(source.is_enrichable(&input, &[]));

        input.display_name = Some("jane".into());
        assert!(!source.is_enrichable(&input, &[]));

        input.display_name = Some("Jane Doe".into());
        input.website = None;
        assert!(!source.is_enrichable(&input, &[]));
    }
}
