use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::source::SourceKind;

// ---------------------------------------------------------------------------
// Platforms
// ---------------------------------------------------------------------------

pub mod platform {
    pub const GITHUB: &str = "github";
    pub const LINKEDIN: &str = "linkedin";
    pub const TWITTER: &str = "twitter";
    pub const FACEBOOK: &str = "facebook";
}

/// Work-experience source tag reserved for entries typed in by a human.
pub const MANUAL_WORK_EXPERIENCE_SOURCE: &str = "ui";

// ---------------------------------------------------------------------------
// Member identities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberIdentityType {
    Email,
    Username,
}

impl MemberIdentityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Username => "username",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberIdentity {
    pub platform: String,
    #[serde(rename = "type")]
    pub identity_type: MemberIdentityType,
    pub value: String,
    #[serde(default)]
    pub verified: bool,
}

impl MemberIdentity {
    pub fn username(platform: &str, value: impl Into<String>, verified: bool) -> Self {
        Self {
            platform: platform.to_string(),
            identity_type: MemberIdentityType::Username,
            value: value.into(),
            verified,
        }
    }

    pub fn email(platform: &str, value: impl Into<String>, verified: bool) -> Self {
        Self {
            platform: platform.to_string(),
            identity_type: MemberIdentityType::Email,
            value: value.into(),
            verified,
        }
    }

    /// Identity equality used for de-duplication: platform, type and value.
    pub fn same_key(&self, other: &MemberIdentity) -> bool {
        self.platform == other.platform
            && self.identity_type == other.identity_type
            && self.value == other.value
    }
}

// ---------------------------------------------------------------------------
// Enrichable member snapshot
// ---------------------------------------------------------------------------

/// Immutable snapshot of a member taken when an enrichment attempt starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichableMember {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub identities: Vec<MemberIdentity>,
    pub activity_count: i64,
}

impl EnrichableMember {
    fn first_verified(&self, platform: Option<&str>, kind: MemberIdentityType) -> Option<MemberIdentity> {
        self.identities
            .iter()
            .find(|i| {
                i.verified
                    && i.identity_type == kind
                    && platform.map_or(true, |p| i.platform == p)
            })
            .cloned()
    }

    /// Derive the per-source query view.
    pub fn enrichment_input(&self) -> EnrichmentInput {
        EnrichmentInput {
            member_id: self.id,
            email: self.first_verified(None, MemberIdentityType::Email),
            linkedin: self.first_verified(Some(platform::LINKEDIN), MemberIdentityType::Username),
            github: self.first_verified(Some(platform::GITHUB), MemberIdentityType::Username),
            display_name: self.display_name.clone().filter(|s| !s.is_empty()),
            website: self.website.clone().filter(|s| !s.is_empty()),
            location: self.location.clone().filter(|s| !s.is_empty()),
            activity_count: self.activity_count,
        }
    }
}

/// What a source adapter may query a vendor with.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentInput {
    pub member_id: Uuid,
    pub email: Option<MemberIdentity>,
    pub linkedin: Option<MemberIdentity>,
    pub github: Option<MemberIdentity>,
    pub display_name: Option<String>,
    pub website: Option<String>,
    pub location: Option<String>,
    pub activity_count: i64,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// One (member, source) cache row. `data == None` records that the vendor had nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentCacheEntry {
    pub member_id: Uuid,
    pub source: SourceKind,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_tried_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Organizations / work experience
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrganizationIdentityType {
    PrimaryDomain,
    Username,
}

impl OrganizationIdentityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryDomain => "primary-domain",
            Self::Username => "username",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizationIdentity {
    pub platform: String,
    #[serde(rename = "type")]
    pub identity_type: OrganizationIdentityType,
    pub value: String,
    #[serde(default)]
    pub verified: bool,
}

/// A work-experience entry as reported by a source (or merged by the oracle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedOrganization {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_description: Option<String>,
    #[serde(default, with = "crate::dates::lenient")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, with = "crate::dates::lenient")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub identities: Vec<OrganizationIdentity>,
    /// Resolved during apply; never produced by a source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Normalized enrichment data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub first_commit_date: Option<String>,
    #[serde(default)]
    pub last_commit_date: Option<String>,
    #[serde(default)]
    pub number_commits: Option<i64>,
}

/// Provenance of a candidate profile discovered through LinkedIn handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMetadata {
    pub repeated_times_in_different_sources: u32,
    pub is_from_verified_source: bool,
}

/// Attribute name → platform → value.
pub type AttributeMap = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEnrichmentData {
    #[serde(default)]
    pub identities: Vec<MemberIdentity>,
    #[serde(default)]
    pub attributes: AttributeMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributions: Vec<Contribution>,
    #[serde(default)]
    pub member_organizations: Vec<NormalizedOrganization>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reach: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ProfileMetadata>,
}

impl NormalizedEnrichmentData {
    pub fn linkedin_identity(&self) -> Option<&MemberIdentity> {
        self.identities.iter().find(|i| i.platform == platform::LINKEDIN)
    }

    pub fn has_linkedin_identity(&self, value: &str) -> bool {
        self.identities
            .iter()
            .any(|i| i.platform == platform::LINKEDIN && i.value == value)
    }

    /// Set `attributes[name][platform] = value`.
    pub fn set_attribute(&mut self, name: &str, platform: &str, value: serde_json::Value) {
        self.attributes
            .entry(name.to_string())
            .or_default()
            .insert(platform.to_string(), value);
    }
}

/// The output of a source's `normalize`: one profile, or several candidates for arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum NormalizedResult {
    Single(NormalizedEnrichmentData),
    Candidates(Vec<NormalizedEnrichmentData>),
}

impl NormalizedResult {
    /// All profiles, regardless of shape.
    pub fn profiles(&self) -> Vec<&NormalizedEnrichmentData> {
        match self {
            Self::Single(p) => vec![p],
            Self::Candidates(ps) => ps.iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stored profile (read for squashing)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingWorkExperience {
    pub id: Uuid,
    pub org_id: Uuid,
    pub org_name: String,
    pub job_title: Option<String>,
    #[serde(default, with = "crate::dates::lenient")]
    pub date_start: Option<NaiveDate>,
    #[serde(default, with = "crate::dates::lenient")]
    pub date_end: Option<NaiveDate>,
    pub source: Option<String>,
    #[serde(default)]
    pub identities: Vec<OrganizationIdentity>,
}

impl ExistingWorkExperience {
    pub fn is_manual(&self) -> bool {
        self.source.as_deref() == Some(MANUAL_WORK_EXPERIENCE_SOURCE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingMemberData {
    pub display_name: Option<String>,
    /// Stored attributes: name → platform → value, including the computed `default`.
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub reach: BTreeMap<String, i64>,
    #[serde(default)]
    pub identities: Vec<MemberIdentity>,
    #[serde(default)]
    pub organizations: Vec<ExistingWorkExperience>,
    #[serde(default)]
    pub contributions: Vec<Contribution>,
}

// ---------------------------------------------------------------------------
// Reconciliation output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SquashedPayload {
    pub identities: Vec<MemberIdentity>,
    /// Attribute name → the single chosen enrichment value.
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub member_organizations: Vec<NormalizedOrganization>,
    /// Only ever populated from the high-confidence source.
    pub reach: BTreeMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(identities: Vec<MemberIdentity>) -> EnrichableMember {
        EnrichableMember {
            id: Uuid::new_v4(),
            display_name: Some("Ada Lovelace".into()),
            location: Some(String::new()),
            website: None,
            identities,
            activity_count: 42,
        }
    }

    #[test]
    fn input_picks_first_verified_identities() {
        let m = member(vec![
            MemberIdentity::email("github", "unverified@example.com", false),
            MemberIdentity::email("github", "ada@example.com", true),
            MemberIdentity::username(platform::GITHUB, "ada", true),
            MemberIdentity::username(platform::LINKEDIN, "ada-l", false),
        ]);

        let input = m.enrichment_input();
        assert_eq!(input.email.unwrap().value, "ada@example.com");
        assert_eq!(input.github.unwrap().value, "ada");
        assert!(input.linkedin.is_none(), "unverified linkedin must not be used");
        assert!(input.location.is_none(), "empty location treated as absent");
        assert_eq!(input.activity_count, 42);
    }

    #[test]
    fn organization_dates_are_lenient() {
        let org: NormalizedOrganization = serde_json::from_str(
            r#"{"name":"Acme","startDate":"2020-01-01T00:00:00Z","endDate":"Present","source":"x"}"#,
        )
        .unwrap();
        assert_eq!(org.start_date, NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(org.end_date, None);
    }

    #[test]
    fn identity_type_wire_names() {
        let id = OrganizationIdentity {
            platform: "linkedin".into(),
            identity_type: OrganizationIdentityType::PrimaryDomain,
            value: "acme.com".into(),
            verified: true,
        };
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json["type"], "primary-domain");
    }
}
