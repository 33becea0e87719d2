//! Arbitration for decisions the merge rules cannot make on their own.
//!
//! Every call may come back empty. Callers treat an empty answer as
//! "discard the ambiguous candidates" or "leave the value alone".

mod llm;

pub use llm::LlmArbitrationOracle;

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use enrichment_common::{ExistingMemberData, NormalizedEnrichmentData, NormalizedOrganization};

/// Organization identities sent along with a member profile, per organization.
pub const MAX_ORGANIZATION_IDENTITIES: usize = 50;

#[async_trait]
pub trait ArbitrationOracle: Send + Sync {
    /// Index into `candidates` of the profile that belongs to the member.
    async fn select_profile(
        &self,
        member_id: Uuid,
        member: &ExistingMemberData,
        candidates: &[NormalizedEnrichmentData],
    ) -> Option<usize>;

    /// One value per attribute, chosen among its candidates. Attributes
    /// missing from the answer are left unchanged.
    async fn squash_attributes(
        &self,
        member_id: Uuid,
        candidates: &BTreeMap<String, Vec<Value>>,
    ) -> BTreeMap<String, Value>;

    /// Merge work histories from several sources into one chronological list.
    async fn squash_work_experiences(
        &self,
        member_id: Uuid,
        histories: &[Vec<NormalizedOrganization>],
    ) -> Option<Vec<NormalizedOrganization>>;
}

/// Answers nothing. Used when no language model is configured.
pub struct UnavailableOracle;

#[async_trait]
impl ArbitrationOracle for UnavailableOracle {
    async fn select_profile(
        &self,
        _member_id: Uuid,
        _member: &ExistingMemberData,
        _candidates: &[NormalizedEnrichmentData],
    ) -> Option<usize> {
        None
    }

    async fn squash_attributes(
        &self,
        _member_id: Uuid,
        _candidates: &BTreeMap<String, Vec<Value>>,
    ) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    async fn squash_work_experiences(
        &self,
        _member_id: Uuid,
        _histories: &[Vec<NormalizedOrganization>],
    ) -> Option<Vec<NormalizedOrganization>> {
        None
    }
}

/// Deduplicate each organization's identities by (platform, value), verified
/// first, capped at [`MAX_ORGANIZATION_IDENTITIES`].
pub fn compact_member_profile(member: &ExistingMemberData) -> ExistingMemberData {
    let mut compact = member.clone();
    for org in &mut compact.organizations {
        let mut sorted = std::mem::take(&mut org.identities);
        // stable: keeps first-seen order within each group
        sorted.sort_by_key(|i| !i.verified);
        let mut seen = HashSet::new();
        org.identities = sorted
            .into_iter()
            .filter(|i| seen.insert((i.platform.clone(), i.value.clone())))
            .take(MAX_ORGANIZATION_IDENTITIES)
            .collect();
    }
    compact
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrichment_common::{ExistingWorkExperience, OrganizationIdentity, OrganizationIdentityType};
    use serde_json::json;

    fn identity(value: &str, verified: bool) -> OrganizationIdentity {
        OrganizationIdentity {
            platform: "linkedin".into(),
            identity_type: OrganizationIdentityType::Username,
            value: value.into(),
            verified,
        }
    }

    #[test]
    fn compacting_dedupes_and_caps_identities() {
        let mut identities = vec![identity("dup", false), identity("dup", true)];
        identities.extend((0..80).map(|i| identity(&format!("org-{i}"), i % 2 == 0)));

        let member = ExistingMemberData {
            display_name: None,
            attributes: json!({}),
            reach: BTreeMap::new(),
            identities: vec![],
            organizations: vec![ExistingWorkExperience {
                id: Uuid::new_v4(),
                org_id: Uuid::new_v4(),
                org_name: "Big Org".into(),
                job_title: None,
                date_start: None,
                date_end: None,
                source: None,
                identities,
            }],
            contributions: vec![],
        };

        let compact = compact_member_profile(&member);
        let ids = &compact.organizations[0].identities;
        assert_eq!(ids.len(), MAX_ORGANIZATION_IDENTITIES);
        assert!(ids[..41].iter().all(|i| i.verified));
        let dups: Vec<_> = ids.iter().filter(|i| i.value == "dup").collect();
        assert_eq!(dups.len(), 1);
        assert!(dups[0].verified, "verified copy wins");
        assert_eq!(member.organizations[0].identities.len(), 82, "input untouched");
    }
}
