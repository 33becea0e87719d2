//! LinkedIn handle discovery across the member's verified identity and the
//! caches of earlier sources, with provenance for later arbitration.

use enrichment_common::{EnrichmentCacheEntry, EnrichmentInput, ProfileMetadata, SourceKind};

use crate::{clearbit, progai, serp};

/// Sources whose normalized payloads may carry a LinkedIn identity.
pub const LINKEDIN_HINT_SOURCES: &[SourceKind] =
    &[SourceKind::ProgAi, SourceKind::Clearbit, SourceKind::Serp];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedinCandidate {
    pub handle: String,
    pub repeated_times_in_different_sources: u32,
    pub is_from_verified_source: bool,
}

impl LinkedinCandidate {
    pub fn metadata(&self) -> ProfileMetadata {
        ProfileMetadata {
            repeated_times_in_different_sources: self.repeated_times_in_different_sources,
            is_from_verified_source: self.is_from_verified_source,
        }
    }
}

/// LinkedIn handle found in one cached payload, if any.
pub fn cached_linkedin_handle(entry: &EnrichmentCacheEntry) -> Option<String> {
    let data = entry.data.as_ref()?;
    let normalized = match entry.source {
        SourceKind::ProgAi => progai::normalize_profile(data, false),
        SourceKind::Clearbit => clearbit::normalize_person(data),
        SourceKind::Serp => serp::normalize_result(data),
        SourceKind::ProgAiLinkedinScraper | SourceKind::Crustdata => None,
    }?;
    normalized.linkedin_identity().map(|i| i.value.clone())
}

pub fn has_linkedin_in_caches(caches: &[EnrichmentCacheEntry], sources: &[SourceKind]) -> bool {
    caches
        .iter()
        .filter(|c| sources.contains(&c.source))
        .any(|c| cached_linkedin_handle(c).is_some())
}

fn verified_input_handle(input: &EnrichmentInput) -> Option<String> {
    input
        .linkedin
        .as_ref()
        .filter(|l| l.verified)
        .map(|l| l.value.replace('/', ""))
        .filter(|v| !v.is_empty())
}

/// Whether a LinkedIn-driven source has anything to query with.
pub fn has_linkedin_input(
    input: &EnrichmentInput,
    caches: &[EnrichmentCacheEntry],
    sources: &[SourceKind],
) -> bool {
    verified_input_handle(input).is_some() || has_linkedin_in_caches(caches, sources)
}

/// Distinct handles in discovery order. Each cache that mentions a handle adds
/// one to its count; the member's own verified handle adds one more and marks
/// it as verified.
pub fn discover_linkedin_handles(
    input: &EnrichmentInput,
    caches: &[EnrichmentCacheEntry],
    sources: &[SourceKind],
) -> Vec<LinkedinCandidate> {
    let mut found: Vec<LinkedinCandidate> = Vec::new();

    let mut bump = |handle: String, verified: bool| {
        match found.iter_mut().find(|c| c.handle == handle) {
            Some(existing) => {
                existing.repeated_times_in_different_sources += 1;
                existing.is_from_verified_source |= verified;
            }
            None => found.push(LinkedinCandidate {
                handle,
                repeated_times_in_different_sources: 1,
                is_from_verified_source: verified,
            }),
        }
    };

    for cache in caches.iter().filter(|c| sources.contains(&c.source)) {
        if let Some(handle) = cached_linkedin_handle(cache) {
            bump(handle, false);
        }
    }

    if let Some(handle) = verified_input_handle(input) {
        bump(handle, true);
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use enrichment_common::{platform, MemberIdentity};
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn cache(member_id: Uuid, source: SourceKind, data: Option<Value>) -> EnrichmentCacheEntry {
        EnrichmentCacheEntry {
            member_id,
            source,
            data,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_tried_at: None,
        }
    }

    fn input(member_id: Uuid, linkedin: Option<MemberIdentity>) -> EnrichmentInput {
        EnrichmentInput {
            member_id,
            email: None,
            linkedin,
            github: None,
            display_name: None,
            website: None,
            location: None,
            activity_count: 1000,
        }
    }

    #[test]
    fn counts_corroboration_and_verification() {
        let id = Uuid::new_v4();
        let caches = vec![
            cache(id, SourceKind::ProgAi, Some(json!({"linkedin_url": "https://linkedin.com/in/jane"}))),
            cache(id, SourceKind::Clearbit, Some(json!({"linkedin": {"handle": "in/jane"}}))),
            cache(id, SourceKind::Serp, Some(json!({"linkedinUrl": "https://linkedin.com/in/jane-2"}))),
            cache(id, SourceKind::Crustdata, Some(json!([{"linkedin_flagship_url": "https://linkedin.com/in/x"}]))),
            cache(id, SourceKind::ProgAi, None),
        ];
        let own = MemberIdentity::username(platform::LINKEDIN, "jane/", true);

        let found = discover_linkedin_handles(&input(id, Some(own)), &caches, LINKEDIN_HINT_SOURCES);

        assert_eq!(
            found,
            vec![
                LinkedinCandidate {
                    handle: "jane".into(),
                    repeated_times_in_different_sources: 3,
                    is_from_verified_source: true,
                },
                LinkedinCandidate {
                    handle: "jane-2".into(),
                    repeated_times_in_different_sources: 1,
                    is_from_verified_source: false,
                },
            ]
        );
    }

    #[test]
    fn unverified_input_is_ignored() {
        let id = Uuid::new_v4();
        let own = MemberIdentity::username(platform::LINKEDIN, "jane", false);
        let i = input(id, Some(own));
        assert!(discover_linkedin_handles(&i, &[], LINKEDIN_HINT_SOURCES).is_empty());
        assert!(!has_linkedin_input(&i, &[], LINKEDIN_HINT_SOURCES));
    }

    #[test]
    fn caches_alone_make_member_discoverable() {
        let id = Uuid::new_v4();
        let caches = vec![cache(
            id,
            SourceKind::Serp,
            Some(json!({"linkedinUrl": "https://linkedin.com/in/jane"})),
        )];
        assert!(has_linkedin_input(&input(id, None), &caches, LINKEDIN_HINT_SOURCES));
        assert!(!has_linkedin_input(&input(id, None), &caches, &[SourceKind::ProgAi]));
    }
}
