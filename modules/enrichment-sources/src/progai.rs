//! progai: developer profiles looked up by GitHub handle, e-mail or LinkedIn URL.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use enrichment_common::attributes::{self as attr, replace_double_quotes};
use enrichment_common::dates::parse_vendor_date;
use enrichment_common::{
    platform, Contribution, EnrichmentCacheEntry, EnrichmentInput, NormalizedEnrichmentData,
    NormalizedOrganization, NormalizedResult, OrganizationIdentity, OrganizationIdentityType,
    SourceKind, VendorConfig,
};

use crate::attribute_settings::{normalize_attributes, sorted_strings, AttributeSetting};
use crate::error::Result;
use crate::payload::{decode, null_as_default};
use crate::social::{
    last_path_segment, linkedin_organization_handle, normalize_hostname, push_email_identity,
    push_social_identity,
};
use crate::source::{EnrichmentSource, SourceSettings, DAY_SECONDS};
use crate::http::send_json;

const ATTRIBUTES: &[AttributeSetting] = &[
    AttributeSetting::plain(attr::AVATAR_URL, &["profile_pic_url"]),
    AttributeSetting::plain(attr::LOCATION, &["location"]),
    AttributeSetting::plain(attr::BIO, &["title", "work_experiences[0].title"]),
    AttributeSetting::plain(attr::SENIORITY_LEVEL, &["seniority_level"]),
    AttributeSetting::plain(attr::COUNTRY, &["country"]),
    AttributeSetting::with(attr::PROGRAMMING_LANGUAGES, &["programming_languages"], sorted_strings),
    AttributeSetting::with(attr::LANGUAGES, &["languages"], sorted_strings),
    AttributeSetting::plain(attr::YEARS_OF_EXPERIENCE, &["years_of_experience"]),
    AttributeSetting::plain(attr::EXPERTISE, &["expertise"]),
    AttributeSetting::with(attr::EDUCATION, &["educations"], educations),
    AttributeSetting::plain(attr::AWARDS, &["awards"]),
    AttributeSetting::with(attr::CERTIFICATIONS, &["certifications"], certifications),
];

fn educations(v: &Value) -> Option<Value> {
    let items = v
        .as_array()?
        .iter()
        .map(|e| {
            let end = e
                .get("endDate")
                .filter(|d| !d.is_null() && d.as_str() != Some(""))
                .cloned()
                .unwrap_or_else(|| json!("Present"));
            json!({
                "campus": e.get("campus"),
                "major": e.get("major"),
                "specialization": e.get("specialization"),
                "startDate": e.get("startDate"),
                "endDate": end,
            })
        })
        .collect();
    Some(Value::Array(items))
}

fn certifications(v: &Value) -> Option<Value> {
    let items = v
        .as_array()?
        .iter()
        .map(|c| json!({"title": c.get("title"), "description": c.get("description")}))
        .collect();
    Some(Value::Array(items))
}

// ---------------------------------------------------------------------------
// Raw payload
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ProgAiProfile {
    #[serde(default, deserialize_with = "null_as_default")]
    emails: Vec<String>,
    #[serde(default)]
    github_handle: Option<String>,
    #[serde(default)]
    linkedin_url: Option<String>,
    #[serde(default)]
    twitter_handle: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    skills: Vec<ProgAiSkill>,
    #[serde(default, deserialize_with = "null_as_default")]
    oss_contributions: Vec<ProgAiContribution>,
    #[serde(default, deserialize_with = "null_as_default")]
    work_experiences: Vec<ProgAiWorkExperience>,
}

#[derive(Debug, Deserialize)]
struct ProgAiSkill {
    skill: String,
    #[serde(default)]
    weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProgAiContribution {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    topics: Vec<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    github_url: Option<String>,
    #[serde(default)]
    first_commit_date: Option<String>,
    #[serde(default)]
    last_commit_date: Option<String>,
    #[serde(default)]
    num_of_commits: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgAiWorkExperience {
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    company_url: Option<String>,
    #[serde(default, rename = "companyLinkedInUrl")]
    company_linkedin_url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize one progai profile. Also used for LinkedIn-scraped profiles, which
/// share the payload shape.
pub fn normalize_profile(raw: &Value, enrich_email_identities: bool) -> Option<NormalizedEnrichmentData> {
    let profile: ProgAiProfile = decode(raw, "progai")?;
    let source_platform = SourceKind::ProgAi.platform();
    let mut out = NormalizedEnrichmentData::default();

    if enrich_email_identities {
        for email in profile.emails.iter().filter(|e| !e.contains("noreply.github")) {
            push_email_identity(&mut out, &source_platform, email);
        }
    }

    out.contributions = profile
        .oss_contributions
        .into_iter()
        .map(|c| Contribution {
            id: c.id,
            topics: c.topics,
            summary: c.summary,
            url: c.github_url,
            first_commit_date: c.first_commit_date,
            last_commit_date: c.last_commit_date,
            number_commits: c.num_of_commits,
        })
        .collect();

    if let Some(handle) = profile.github_handle.as_deref() {
        push_social_identity(&mut out, platform::GITHUB, handle);
    }
    if let Some(handle) = profile.linkedin_url.as_deref().and_then(last_path_segment) {
        push_social_identity(&mut out, platform::LINKEDIN, &handle);
    }
    if let Some(handle) = profile.twitter_handle.as_deref() {
        push_social_identity(&mut out, platform::TWITTER, handle);
    }

    normalize_attributes(raw, ATTRIBUTES, &source_platform, &mut out);

    if !profile.skills.is_empty() {
        let mut skills = profile.skills;
        // stable: equal weights keep vendor order
        skills.sort_by(|a, b| {
            b.weight
                .unwrap_or(0.0)
                .partial_cmp(&a.weight.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut ordered: Vec<String> = Vec::with_capacity(skills.len());
        for s in skills {
            if !ordered.contains(&s.skill) {
                ordered.push(s.skill);
            }
        }
        out.set_attribute(attr::SKILLS, &source_platform, Value::from(ordered));
    }

    out.member_organizations = profile
        .work_experiences
        .into_iter()
        .filter_map(normalize_work_experience)
        .collect();

    Some(out)
}

fn normalize_work_experience(we: ProgAiWorkExperience) -> Option<NormalizedOrganization> {
    if we.company.is_none() && we.company_url.is_none() && we.company_linkedin_url.is_none() {
        return None;
    }

    let company = we.company.clone().unwrap_or_default();
    let mut identities = Vec::new();
    let mut has_primary_domain = false;

    if let Some(url) = we.company_url.as_deref() {
        // a GitHub link is not the company's domain
        let mentions_github = url.to_lowercase().contains("github")
            || company.to_lowercase().contains("github");
        if let Some(domain) = normalize_hostname(url, false).filter(|_| !mentions_github) {
            identities.push(OrganizationIdentity {
                platform: platform::LINKEDIN.to_string(),
                identity_type: OrganizationIdentityType::PrimaryDomain,
                value: domain,
                verified: true,
            });
            has_primary_domain = true;
        }
    }

    if let Some(handle) = we.company_linkedin_url.as_deref().and_then(linkedin_organization_handle) {
        identities.push(OrganizationIdentity {
            platform: platform::LINKEDIN.to_string(),
            identity_type: OrganizationIdentityType::Username,
            value: handle,
            verified: !has_primary_domain,
        });
    }

    Some(NormalizedOrganization {
        name: replace_double_quotes(&company),
        title: we.title.as_deref().map(replace_double_quotes),
        organization_description: None,
        start_date: we.start_date.as_deref().and_then(parse_vendor_date),
        end_date: we.end_date.as_deref().and_then(parse_vendor_date),
        source: SourceKind::ProgAi.organization_source(),
        identities,
        organization_id: None,
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// `GET {base}/get_profile` with one lookup key. Returns the `profile` object.
pub(crate) async fn fetch_profile(
    vendor: SourceKind,
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    lookup: (&str, &str),
) -> Result<Option<Value>> {
    let url = format!("{}/get_profile", base_url.trim_end_matches('/'));
    let request = http.get(&url).query(&[
        lookup,
        ("with_emails", "true"),
        ("api_key", api_key),
    ]);

    let Some(body) = send_json(vendor, request).await? else {
        return Ok(None);
    };
    Ok(body.get("profile").filter(|p| p.is_object()).cloned())
}

pub fn settings() -> SourceSettings {
    SourceSettings {
        cache_obsolete_after_seconds: 90 * DAY_SECONDS,
        never_reenrich: false,
        max_concurrent_requests: 3,
        enrich_members_with_activity_more_than: None,
        enrichable_by_sql: "mi.verified AND ((mi.type = 'username' AND mi.platform = 'github') OR (mi.type = 'email'))".to_string(),
        also_find_inputs_in_source_caches: &[],
    }
}

pub struct ProgAiSource {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    use_email_for_enrichment: bool,
    enrich_email_identities: bool,
    settings: SourceSettings,
}

impl ProgAiSource {
    pub fn new(http: reqwest::Client, config: &VendorConfig) -> Self {
        Self {
            http,
            base_url: config.progai_url.clone(),
            api_key: config.progai_api_key.clone(),
            use_email_for_enrichment: config.progai_use_email_for_enrichment,
            enrich_email_identities: config.progai_enrich_email_identities,
            settings: settings(),
        }
    }
}

#[async_trait]
impl EnrichmentSource for ProgAiSource {
    fn kind(&self) -> SourceKind {
        SourceKind::ProgAi
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn is_enrichable(&self, input: &EnrichmentInput, _caches: &[EnrichmentCacheEntry]) -> bool {
        input.github.is_some() || (self.use_email_for_enrichment && input.email.is_some())
    }

    async fn get_data(
        &self,
        input: &EnrichmentInput,
        _caches: &[EnrichmentCacheEntry],
    ) -> Result<Option<Value>> {
        if let Some(github) = &input.github {
            let found = fetch_profile(
                self.kind(),
                &self.http,
                &self.base_url,
                &self.api_key,
                ("github_handle", &github.value),
            )
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }

        if self.use_email_for_enrichment {
            if let Some(email) = &input.email {
                debug!(member_id = %input.member_id, "progai falling back to e-mail lookup");
                return fetch_profile(
                    self.kind(),
                    &self.http,
                    &self.base_url,
                    &self.api_key,
                    ("email", &email.value),
                )
                .await;
            }
        }

        Ok(None)
    }

    fn normalize(&self, raw: &Value) -> Option<NormalizedResult> {
        normalize_profile(raw, self.enrich_email_identities).map(NormalizedResult::Single)
    }

    async fn has_remaining_credits(&self) -> bool {
        true
    }
}
