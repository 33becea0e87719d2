//! clearbit: person lookup by verified e-mail.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use enrichment_common::attributes::{self as attr, replace_double_quotes};
use enrichment_common::{
    platform, EnrichmentCacheEntry, EnrichmentInput, NormalizedEnrichmentData,
    NormalizedOrganization, NormalizedResult, OrganizationIdentity, OrganizationIdentityType,
    SourceKind, VendorConfig,
};

use crate::attribute_settings::{normalize_attributes, AttributeSetting};
use crate::error::Result;
use crate::http::send_json;
use crate::payload::decode;
use crate::social::{last_path_segment, push_email_identity, push_social_identity};
use crate::source::{EnrichmentSource, SourceSettings, DAY_SECONDS};

const ACTIVITY_FLOOR: i64 = 100;

const ATTRIBUTES: &[AttributeSetting] = &[
    AttributeSetting::plain(attr::LOCATION, &["location"]),
    AttributeSetting::plain(attr::TIMEZONE, &["timezone"]),
    AttributeSetting::plain(attr::BIO, &["bio"]),
    AttributeSetting::plain(attr::WEBSITE_URL, &["site"]),
    AttributeSetting::plain(attr::AVATAR_URL, &["avatar"]),
];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearbitPerson {
    #[serde(default)]
    name: Option<ClearbitName>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    facebook: Option<ClearbitHandle>,
    #[serde(default)]
    github: Option<ClearbitHandle>,
    #[serde(default)]
    linkedin: Option<ClearbitHandle>,
    #[serde(default)]
    twitter: Option<ClearbitHandle>,
    #[serde(default)]
    employment: Option<ClearbitEmployment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearbitName {
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClearbitHandle {
    #[serde(default)]
    handle: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClearbitEmployment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

fn handle(h: &Option<ClearbitHandle>) -> Option<&str> {
    h.as_ref()?.handle.as_deref().filter(|s| !s.is_empty())
}

pub fn normalize_person(raw: &Value) -> Option<NormalizedEnrichmentData> {
    let person: ClearbitPerson = decode(raw, "clearbit")?;
    let source_platform = SourceKind::Clearbit.platform();
    let mut out = NormalizedEnrichmentData {
        display_name: person
            .name
            .as_ref()
            .and_then(|n| n.full_name.clone())
            .filter(|n| !n.is_empty()),
        ..Default::default()
    };

    if let Some(email) = person.email.as_deref() {
        push_email_identity(&mut out, &source_platform, email);
    }
    if let Some(h) = handle(&person.facebook) {
        push_social_identity(&mut out, platform::FACEBOOK, h);
    }
    if let Some(h) = handle(&person.github) {
        push_social_identity(&mut out, platform::GITHUB, h);
    }
    if let Some(h) = handle(&person.linkedin).and_then(last_path_segment) {
        push_social_identity(&mut out, platform::LINKEDIN, &h);
    }
    if let Some(h) = handle(&person.twitter) {
        push_social_identity(&mut out, platform::TWITTER, h);
    }

    normalize_attributes(raw, ATTRIBUTES, &source_platform, &mut out);

    if let Some(employment) = person.employment {
        if let Some(name) = employment.name.filter(|n| !n.is_empty()) {
            let identities = employment
                .domain
                .filter(|d| !d.is_empty())
                .map(|domain| OrganizationIdentity {
                    platform: source_platform.clone(),
                    identity_type: OrganizationIdentityType::PrimaryDomain,
                    value: domain,
                    verified: true,
                })
                .into_iter()
                .collect();

            out.member_organizations.push(NormalizedOrganization {
                name: replace_double_quotes(&name),
                title: employment.title.as_deref().map(replace_double_quotes),
                organization_description: None,
                start_date: None,
                end_date: None,
                source: SourceKind::Clearbit.organization_source(),
                identities,
                organization_id: None,
            });
        }
    }

    Some(out)
}

pub fn settings() -> SourceSettings {
    SourceSettings {
        cache_obsolete_after_seconds: 120 * DAY_SECONDS,
        never_reenrich: false,
        max_concurrent_requests: 15,
        enrich_members_with_activity_more_than: Some(ACTIVITY_FLOOR),
        enrichable_by_sql: format!(
            "activity.total_count > {ACTIVITY_FLOOR} AND mi.type = 'email' AND mi.verified"
        ),
        also_find_inputs_in_source_caches: &[],
    }
}

pub struct ClearbitSource {
    http: reqwest::Client,
    url: String,
    api_key: String,
    settings: SourceSettings,
}

impl ClearbitSource {
    pub fn new(http: reqwest::Client, config: &VendorConfig) -> Self {
        Self {
            http,
            url: config.clearbit_url.clone(),
            api_key: config.clearbit_api_key.clone(),
            settings: settings(),
        }
    }
}

#[async_trait]
impl EnrichmentSource for ClearbitSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Clearbit
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn is_enrichable(&self, input: &EnrichmentInput, _caches: &[EnrichmentCacheEntry]) -> bool {
        input.activity_count > ACTIVITY_FLOOR
            && input.email.as_ref().is_some_and(|e| e.verified && !e.value.is_empty())
    }

    async fn get_data(
        &self,
        input: &EnrichmentInput,
        _caches: &[EnrichmentCacheEntry],
    ) -> Result<Option<Value>> {
        let Some(email) = &input.email else {
            return Ok(None);
        };

        let request = self
            .http
            .get(&self.url)
            .query(&[("email", email.value.as_str())])
            .bearer_auth(&self.api_key);

        let body = send_json(self.kind(), request).await?;
        // clearbit reports lookup misses as a 200 with an `error` object
        Ok(body.filter(|b| b.get("error").is_none()))
    }

    fn normalize(&self, raw: &Value) -> Option<NormalizedResult> {
        normalize_person(raw).map(NormalizedResult::Single)
    }

    async fn has_remaining_credits(&self) -> bool {
        true
    }
}
