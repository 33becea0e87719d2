//! crustdata: realtime LinkedIn enrichment. High-confidence, paid per lookup,
//! never re-enriched once a row exists.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use enrichment_common::attributes::{self as attr, replace_double_quotes};
use enrichment_common::dates::parse_vendor_date;
use enrichment_common::{
    platform, EnrichmentCacheEntry, EnrichmentInput, NormalizedEnrichmentData,
    NormalizedOrganization, NormalizedResult, OrganizationIdentity, OrganizationIdentityType,
    ProfileMetadata, SourceKind, VendorConfig,
};

use crate::attribute_settings::{
    comma_list_sorted, normalize_attributes, sorted_strings, AttributeSetting,
};
use crate::error::Result;
use crate::http::send_json;
use crate::linkedin::{discover_linkedin_handles, has_linkedin_input, LINKEDIN_HINT_SOURCES};
use crate::payload::{decode, id_string, null_as_default};
use crate::social::{is_email, last_path_segment, push_email_identity, push_social_identity};
use crate::source::{EnrichmentSource, SourceSettings, DAY_SECONDS};

const ACTIVITY_FLOOR: i64 = 100;

/// A realtime LinkedIn lookup costs this many credits.
const CREDITS_PER_LOOKUP: i64 = 5;

const ATTRIBUTES: &[AttributeSetting] = &[
    AttributeSetting::plain(attr::AVATAR_URL, &["profile_picture_url"]),
    AttributeSetting::plain(attr::JOB_TITLE, &["title"]),
    AttributeSetting::plain(attr::BIO, &["summary", "headline"]),
    AttributeSetting::with(attr::SKILLS, &["skills"], comma_list_sorted),
    AttributeSetting::with(attr::LANGUAGES, &["languages"], sorted_strings),
    AttributeSetting::with(attr::SCHOOLS, &["all_schools"], sorted_strings),
];

// ---------------------------------------------------------------------------
// Raw payload
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct CrustdataProfile {
    #[serde(default)]
    name: Option<String>,
    /// A list, or a comma separated string.
    #[serde(default)]
    email: Option<Value>,
    #[serde(default)]
    twitter_handle: Option<String>,
    #[serde(default)]
    linkedin_flagship_url: Option<String>,
    #[serde(default)]
    num_of_connections: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    past_employers: Vec<CrustdataEmployer>,
    #[serde(default, deserialize_with = "null_as_default")]
    current_employers: Vec<CrustdataEmployer>,
    #[serde(default)]
    metadata: Option<ProfileMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct CrustdataEmployer {
    #[serde(default)]
    employer_name: Option<String>,
    #[serde(default)]
    employer_linkedin_id: Option<Value>,
    #[serde(default)]
    employer_linkedin_description: Option<String>,
    #[serde(default)]
    employee_title: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemainingCredits {
    #[serde(default)]
    credits: i64,
}

fn emails(raw: &Value) -> Vec<String> {
    match raw {
        Value::Array(items) => items
            .iter()
            .filter_map(|e| e.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => s
            .split(',')
            .filter(|e| is_email(e))
            .map(|e| e.trim().to_string())
            .collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

pub fn normalize_one(raw: &Value) -> Option<NormalizedEnrichmentData> {
    let profile: CrustdataProfile = decode(raw, "crustdata")?;
    let source_platform = SourceKind::Crustdata.platform();

    let mut out = NormalizedEnrichmentData {
        display_name: profile.name.clone().filter(|n| !n.is_empty()),
        metadata: profile.metadata,
        ..Default::default()
    };

    if let Some(raw_emails) = &profile.email {
        for email in emails(raw_emails) {
            push_email_identity(&mut out, &source_platform, &email);
        }
    }
    if let Some(handle) = profile.twitter_handle.as_deref() {
        push_social_identity(&mut out, platform::TWITTER, handle);
    }
    if let Some(handle) = profile.linkedin_flagship_url.as_deref().and_then(last_path_segment) {
        push_social_identity(&mut out, platform::LINKEDIN, &handle);
    }

    normalize_attributes(raw, ATTRIBUTES, &source_platform, &mut out);

    for employer in profile.past_employers.into_iter().chain(profile.current_employers) {
        let identities = employer
            .employer_linkedin_id
            .as_ref()
            .and_then(id_string)
            .map(|id| OrganizationIdentity {
                platform: platform::LINKEDIN.to_string(),
                identity_type: OrganizationIdentityType::Username,
                value: format!("company:{id}"),
                verified: true,
            })
            .into_iter()
            .collect();

        out.member_organizations.push(NormalizedOrganization {
            name: replace_double_quotes(employer.employer_name.as_deref().unwrap_or_default()),
            title: employer.employee_title.as_deref().map(replace_double_quotes),
            organization_description: employer
                .employer_linkedin_description
                .as_deref()
                .map(replace_double_quotes),
            start_date: employer.start_date.as_deref().and_then(parse_vendor_date),
            end_date: employer.end_date.as_deref().and_then(parse_vendor_date),
            source: SourceKind::Crustdata.organization_source(),
            identities,
            organization_id: None,
        });
    }

    if let Some(connections) = profile.num_of_connections.filter(|c| *c > 0) {
        out.reach.insert(source_platform, connections);
    }

    Some(out)
}

pub fn normalize_profiles(raw: &Value) -> Option<NormalizedResult> {
    let candidates: Vec<_> = raw.as_array()?.iter().filter_map(normalize_one).collect();
    if candidates.is_empty() {
        return None;
    }
    Some(NormalizedResult::Candidates(candidates))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub fn settings() -> SourceSettings {
    SourceSettings {
        cache_obsolete_after_seconds: 90 * DAY_SECONDS,
        never_reenrich: true,
        max_concurrent_requests: 5,
        enrich_members_with_activity_more_than: Some(ACTIVITY_FLOOR),
        enrichable_by_sql: format!(
            "(activity.total_count > {ACTIVITY_FLOOR}) AND mi.verified AND mi.type = 'username' AND mi.platform = 'linkedin'"
        ),
        also_find_inputs_in_source_caches: LINKEDIN_HINT_SOURCES,
    }
}

pub struct CrustdataSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    settings: SourceSettings,
}

impl CrustdataSource {
    pub fn new(http: reqwest::Client, config: &VendorConfig) -> Self {
        Self {
            http,
            base_url: config.crustdata_url.trim_end_matches('/').to_string(),
            api_key: config.crustdata_api_key.clone(),
            settings: settings(),
        }
    }

    fn auth(&self) -> String {
        format!("Token {}", self.api_key)
    }

    async fn enrich_handle(&self, handle: &str) -> Result<Option<Value>> {
        let url = format!("{}/screener/person/enrich", self.base_url);
        let profile_url = format!("https://linkedin.com/in/{handle}");
        let request = self
            .http
            .get(&url)
            .query(&[
                ("linkedin_profile_url", profile_url.as_str()),
                ("enrich_realtime", "true"),
            ])
            .header(reqwest::header::AUTHORIZATION, self.auth());

        let Some(body) = send_json(self.kind(), request).await? else {
            return Ok(None);
        };
        let first = body
            .as_array()
            .and_then(|a| a.first())
            .filter(|p| p.get("error").is_none())
            .cloned();
        Ok(first)
    }
}

#[async_trait]
impl EnrichmentSource for CrustdataSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Crustdata
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn is_enrichable(&self, input: &EnrichmentInput, caches: &[EnrichmentCacheEntry]) -> bool {
        input.activity_count > ACTIVITY_FLOOR
            && has_linkedin_input(input, caches, self.settings.also_find_inputs_in_source_caches)
    }

    async fn get_data(
        &self,
        input: &EnrichmentInput,
        caches: &[EnrichmentCacheEntry],
    ) -> Result<Option<Value>> {
        let mut profiles = Vec::new();

        for candidate in
            discover_linkedin_handles(input, caches, self.settings.also_find_inputs_in_source_caches)
        {
            let Some(mut profile) = self.enrich_handle(&candidate.handle).await? else {
                continue;
            };
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
        normalize_profiles(raw)
    }

    async fn has_remaining_credits(&self) -> bool {
        let request = self
            .http
            .get(format!("{}/user/credits", self.base_url))
            .header(reqwest::header::AUTHORIZATION, self.auth());

        let credits = match send_json(self.kind(), request).await {
            Ok(Some(body)) => serde_json::from_value::<RemainingCredits>(body).map_err(Into::into),
            Ok(None) => Ok(RemainingCredits { credits: 0 }),
            Err(e) => Err(e),
        };

        match credits {
            Ok(c) => c.credits > CREDITS_PER_LOOKUP,
            Err(e) => {
                error!(error = %e, "Error while checking crustdata account usage");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn fixture() -> Value {
        json!({
            "name": "Jane Doe",
            "email": "jane@acme.com, not-an-email ,jd@personal.dev",
            "twitter_handle": "janed",
            "linkedin_flagship_url": "https://www.linkedin.com/in/jane-doe",
            "title": "VP Engineering",
            "headline": "Builder",
            "summary": null,
            "skills": "Rust, Postgres,  ,Kubernetes",
            "all_schools": ["MIT", "ETH"],
            "num_of_connections": 500,
            "past_employers": [{
                "employer_name": "Initech",
                "employer_linkedin_id": 1234,
                "employee_title": "Engineer",
                "start_date": "2015-01-01T00:00:00",
                "end_date": "2018-06-01T00:00:00"
            }],
            "current_employers": [{
                "employer_name": "Acme",
                "employer_linkedin_id": "5678",
                "employer_linkedin_description": "We make \"anvils\"",
                "employee_title": "VP Engineering",
                "start_date": "2018-07-01T00:00:00",
                "end_date": null
            }],
            "metadata": {"repeatedTimesInDifferentSources": 1, "isFromVerifiedSource": true}
        })
    }

    #[test]
    fn normalizes_profile() {
        let n = normalize_one(&fixture()).unwrap();
        let p = "enrichment-crustdata";

        assert_eq!(n.display_name.as_deref(), Some("Jane Doe"));
        let emails: Vec<_> = n.identities.iter().filter(|i| i.platform == p).map(|i| i.value.as_str()).collect();
        assert_eq!(emails, vec!["jane@acme.com", "jd@personal.dev"]);
        assert!(n.has_linkedin_identity("jane-doe"));

        assert_eq!(n.attributes[attr::BIO][p], json!("Builder"));
        assert_eq!(n.attributes[attr::SKILLS][p], json!(["Kubernetes", "Postgres", "Rust"]));
        assert_eq!(n.attributes[attr::SCHOOLS][p], json!(["ETH", "MIT"]));
        assert_eq!(n.reach.get(p), Some(&500));
        assert!(n.metadata.unwrap().is_from_verified_source);
    }

    #[test]
    fn employment_history_is_past_then_current() {
        let n = normalize_one(&fixture()).unwrap();
        assert_eq!(n.member_organizations.len(), 2);

        let past = &n.member_organizations[0];
        assert_eq!(past.name, "Initech");
        assert_eq!(past.identities[0].value, "company:1234");
        assert_eq!(past.end_date, NaiveDate::from_ymd_opt(2018, 6, 1));

        let current = &n.member_organizations[1];
        assert_eq!(current.identities[0].value, "company:5678");
        assert_eq!(current.end_date, None);
        assert_eq!(current.organization_description.as_deref(), Some("We make 'anvils'"));
        assert_eq!(current.source, "enrichment-crustdata");
    }

    #[test]
    fn list_of_profiles_becomes_candidates() {
        let raw = json!([fixture(), fixture()]);
        match normalize_profiles(&raw) {
            Some(NormalizedResult::Candidates(c)) => assert_eq!(c.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn settings_mark_never_reenrich() {
        let s = settings();
        assert!(s.never_reenrich);
        assert_eq!(s.enrich_members_with_activity_more_than, Some(100));
        assert_eq!(s.max_concurrent_requests, 5);
    }
}
