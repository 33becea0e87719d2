//! Normalized source payloads and duplicate-profile arbitration.

use std::collections::BTreeMap;

use uuid::Uuid;

use enrichment_common::{
    Contribution, EnrichmentCacheEntry, ExistingMemberData, MemberIdentity,
    NormalizedEnrichmentData, NormalizedResult, SourceKind,
};
use enrichment_sources::SourceRegistry;

use crate::oracle::ArbitrationOracle;

/// Sources that return several candidate profiles, in arbitration order.
pub const CANDIDATE_SOURCES: [SourceKind; 2] =
    [SourceKind::Crustdata, SourceKind::ProgAiLinkedinScraper];

/// Normalized payloads keyed by source, with bulky fields moved aside.
#[derive(Debug, Default)]
pub struct CollectedSources {
    pub payloads: BTreeMap<SourceKind, NormalizedResult>,
    /// Whether any candidate profile carried contributions.
    pub candidates_had_contributions: bool,
    /// Contributions from the progai payload, if it had any.
    pub progai_contributions: Vec<Contribution>,
}

/// Normalize every non-empty cache row of `requested`.
///
/// `caches` may hold rows of other sources; only the progai row is read from
/// them, for its contributions.
pub fn collect_sources(
    registry: &SourceRegistry,
    requested: &[SourceKind],
    caches: &[EnrichmentCacheEntry],
) -> CollectedSources {
    let mut collected = CollectedSources::default();

    for cache in caches {
        let Some(raw) = &cache.data else { continue };
        let wanted = requested.contains(&cache.source);
        if !wanted && cache.source != SourceKind::ProgAi {
            continue;
        }
        let Some(normalized) = registry.normalize(cache.source, raw) else {
            continue;
        };

        let normalized = match normalized {
            NormalizedResult::Single(mut profile) => {
                let contributions = std::mem::take(&mut profile.contributions);
                if cache.source == SourceKind::ProgAi {
                    collected.progai_contributions = contributions;
                }
                NormalizedResult::Single(profile)
            }
            NormalizedResult::Candidates(mut profiles) => {
                for profile in &mut profiles {
                    if !profile.contributions.is_empty() {
                        collected.candidates_had_contributions = true;
                    }
                    profile.contributions.clear();
                }
                NormalizedResult::Candidates(profiles)
            }
        };

        if wanted {
            collected.payloads.insert(cache.source, normalized);
        }
    }

    collected
}

#[derive(Debug, Default)]
pub struct Arbitration {
    pub selected: Option<NormalizedEnrichmentData>,
    pub discarded: Vec<NormalizedEnrichmentData>,
}

fn is_from_verified_source(profile: &NormalizedEnrichmentData) -> bool {
    profile
        .metadata
        .map(|m| m.is_from_verified_source)
        .unwrap_or(false)
}

/// Pick at most one of `candidates` for the member.
///
/// Profiles found through verified identities are considered first: one is
/// taken as is, several go to the oracle. Unverified ones are only considered
/// when nothing verified was selected, and always through the oracle.
pub async fn arbitrate(
    oracle: &dyn ArbitrationOracle,
    member_id: Uuid,
    member: &ExistingMemberData,
    candidates: Vec<NormalizedEnrichmentData>,
) -> Arbitration {
    let (verified, unverified): (Vec<_>, Vec<_>) =
        candidates.into_iter().partition(is_from_verified_source);

    let mut result = Arbitration::default();

    match verified.len() {
        0 => {}
        1 => result.selected = verified.into_iter().next(),
        _ => pick(oracle, member_id, member, verified, &mut result).await,
    }

    if !unverified.is_empty() {
        if result.selected.is_some() {
            result.discarded.extend(unverified);
        } else {
            pick(oracle, member_id, member, unverified, &mut result).await;
        }
    }

    result
}

async fn pick(
    oracle: &dyn ArbitrationOracle,
    member_id: Uuid,
    member: &ExistingMemberData,
    group: Vec<NormalizedEnrichmentData>,
    result: &mut Arbitration,
) {
    let index = oracle
        .select_profile(member_id, member, &group)
        .await
        .filter(|i| *i < group.len());

    for (i, profile) in group.into_iter().enumerate() {
        if Some(i) == index {
            result.selected = Some(profile);
        } else {
            result.discarded.push(profile);
        }
    }
}

fn identities_of(payload: &NormalizedResult) -> &[MemberIdentity] {
    match payload {
        NormalizedResult::Single(p) => &p.identities,
        NormalizedResult::Candidates(_) => &[],
    }
}

/// Run arbitration for each candidate-producing source.
///
/// The selection replaces the candidate list; a source with no selection is
/// dropped. Each discarded profile's LinkedIn handle removes every source that
/// reported it. Returns the selections that survived, by source.
pub async fn resolve_candidates(
    oracle: &dyn ArbitrationOracle,
    member_id: Uuid,
    member: &ExistingMemberData,
    payloads: &mut BTreeMap<SourceKind, NormalizedResult>,
) -> BTreeMap<SourceKind, NormalizedEnrichmentData> {
    let mut selections = BTreeMap::new();

    for kind in CANDIDATE_SOURCES {
        let Some(payload) = payloads.remove(&kind) else {
            continue;
        };
        let arbitration = match payload {
            NormalizedResult::Single(profile) => Arbitration {
                selected: Some(profile),
                discarded: vec![],
            },
            NormalizedResult::Candidates(candidates) => {
                arbitrate(oracle, member_id, member, candidates).await
            }
        };

        match arbitration.selected {
            Some(selected) => {
                selections.insert(kind, selected.clone());
                payloads.insert(kind, NormalizedResult::Single(selected));
            }
            None => {
                tracing::info!(%member_id, source = %kind, "No candidate profile selected");
            }
        }

        for discarded in &arbitration.discarded {
            let Some(handle) = discarded.linkedin_identity() else {
                continue;
            };
            payloads.retain(|source, payload| {
                let reported = identities_of(payload)
                    .iter()
                    .any(|i| i.platform == handle.platform && i.value == handle.value);
                if reported {
                    tracing::info!(
                        %member_id,
                        %source,
                        linkedin = %handle.value,
                        "Dropping source that reported a discarded profile"
                    );
                }
                !reported
            });
        }
    }

    selections.retain(|kind, _| payloads.contains_key(kind));
    selections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockOracle;
    use enrichment_common::{platform, ProfileMetadata};
    use serde_json::json;

    fn member() -> ExistingMemberData {
        ExistingMemberData {
            display_name: Some("Ada".into()),
            attributes: json!({}),
            reach: BTreeMap::new(),
            identities: vec![],
            organizations: vec![],
            contributions: vec![],
        }
    }

    fn candidate(handle: &str, verified: bool) -> NormalizedEnrichmentData {
        NormalizedEnrichmentData {
            identities: vec![MemberIdentity::username(platform::LINKEDIN, handle, false)],
            metadata: Some(ProfileMetadata {
                repeated_times_in_different_sources: 1,
                is_from_verified_source: verified,
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn single_verified_profile_wins_without_oracle() {
        let oracle = MockOracle::new();
        let result = arbitrate(
            &oracle,
            Uuid::new_v4(),
            &member(),
            vec![candidate("a", true), candidate("b", false), candidate("c", false)],
        )
        .await;

        assert!(result.selected.unwrap().has_linkedin_identity("a"));
        assert_eq!(result.discarded.len(), 2);
        assert_eq!(oracle.select_calls(), 0);
    }

    #[tokio::test]
    async fn several_verified_profiles_ask_the_oracle() {
        let oracle = MockOracle::new().select([Some(1)]);
        let result = arbitrate(
            &oracle,
            Uuid::new_v4(),
            &member(),
            vec![candidate("a", true), candidate("b", true), candidate("c", false)],
        )
        .await;

        assert!(result.selected.unwrap().has_linkedin_identity("b"));
        let discarded: Vec<_> = result
            .discarded
            .iter()
            .filter_map(|p| p.linkedin_identity().map(|i| i.value.clone()))
            .collect();
        assert_eq!(discarded, vec!["a", "c"]);
        assert_eq!(oracle.select_calls(), 1);
    }

    #[tokio::test]
    async fn no_answer_for_verified_falls_back_to_unverified() {
        let oracle = MockOracle::new().select([None, Some(0)]);
        let result = arbitrate(
            &oracle,
            Uuid::new_v4(),
            &member(),
            vec![candidate("a", true), candidate("b", true), candidate("c", false)],
        )
        .await;

        assert!(result.selected.unwrap().has_linkedin_identity("c"));
        assert_eq!(result.discarded.len(), 2);
        assert_eq!(oracle.select_calls(), 2);
    }

    #[tokio::test]
    async fn lone_unverified_profile_still_needs_the_oracle() {
        let oracle = MockOracle::new();
        let result = arbitrate(&oracle, Uuid::new_v4(), &member(), vec![candidate("z", false)]).await;

        assert!(result.selected.is_none());
        assert_eq!(result.discarded.len(), 1);
        assert_eq!(oracle.select_calls(), 1);
    }

    #[tokio::test]
    async fn discarded_handles_remove_reporting_sources() {
        let oracle = MockOracle::new();
        let mut serp = NormalizedEnrichmentData::default();
        serp.identities = vec![MemberIdentity::username(platform::LINKEDIN, "b", false)];
        let progai = NormalizedEnrichmentData::default();

        let mut payloads = BTreeMap::new();
        payloads.insert(SourceKind::ProgAi, NormalizedResult::Single(progai));
        payloads.insert(SourceKind::Serp, NormalizedResult::Single(serp));
        payloads.insert(
            SourceKind::Crustdata,
            NormalizedResult::Candidates(vec![candidate("a", true), candidate("b", false)]),
        );

        let selections = resolve_candidates(&oracle, Uuid::new_v4(), &member(), &mut payloads).await;

        assert!(selections[&SourceKind::Crustdata].has_linkedin_identity("a"));
        assert!(payloads.contains_key(&SourceKind::ProgAi));
        assert!(!payloads.contains_key(&SourceKind::Serp));
        assert!(matches!(payloads[&SourceKind::Crustdata], NormalizedResult::Single(_)));
    }

    #[tokio::test]
    async fn source_without_selection_is_dropped() {
        let oracle = MockOracle::new();
        let mut payloads = BTreeMap::new();
        payloads.insert(SourceKind::ProgAi, NormalizedResult::Single(Default::default()));
        payloads.insert(
            SourceKind::ProgAiLinkedinScraper,
            NormalizedResult::Candidates(vec![candidate("x", false)]),
        );

        let selections = resolve_candidates(&oracle, Uuid::new_v4(), &member(), &mut payloads).await;

        assert!(selections.is_empty());
        assert_eq!(payloads.len(), 1);
    }
}
