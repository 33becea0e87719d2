//! Reconciliation: N cached source payloads into one profile write.
//!
//! Split into a read-only [`plan_squash`] (cache reads, arbitration) and a
//! transactional [`apply_plan`], so the durable layer can journal the plan
//! and replay only the write.

mod apply;
pub mod attributes;
pub mod profiles;
pub mod work_experience;

pub use apply::{apply_plan, merge_reach};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use enrichment_common::{
    Contribution, EnrichmentError, ExistingMemberData, MemberIdentity, NormalizedOrganization,
    NormalizedResult, Result, SourceKind, SquashedPayload,
};

use crate::deps::EnrichmentDeps;
use crate::oracle::ArbitrationOracle;
use profiles::{collect_sources, resolve_candidates};
use work_experience::demote_extra_verified;

/// Everything the write step needs, computed before the transaction opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SquashPlan {
    pub member_id: Uuid,
    pub existing: ExistingMemberData,
    pub payload: SquashedPayload,
    /// The progai payload's contributions. Present only when the LinkedIn
    /// scraper profile was selected; written when they differ from the stored ones.
    pub contributions: Option<Vec<Contribution>>,
    /// The crustdata profile was selected; its work history replaces ours.
    pub high_confidence: bool,
}

/// Build the squash for `member_id` from the caches of `sources`.
///
/// `None` when fewer than two sources have cached data; nothing is
/// reconciled then.
pub async fn plan_squash(
    deps: &EnrichmentDeps,
    member_id: Uuid,
    sources: &[SourceKind],
) -> Result<Option<SquashPlan>> {
    let mut wanted = sources.to_vec();
    if !wanted.contains(&SourceKind::ProgAi) {
        wanted.push(SourceKind::ProgAi);
    }
    let caches = deps.cache.find_for_sources(member_id, &wanted, false).await?;
    let mut collected = collect_sources(&deps.sources, sources, &caches);

    if collected.payloads.len() < 2 {
        debug!(%member_id, sources = collected.payloads.len(), "Not enough sources to squash");
        return Ok(None);
    }

    let existing = deps
        .profiles
        .fetch_member_data_for_squashing(member_id)
        .await?
        .ok_or(EnrichmentError::MemberNotFound(member_id))?;

    let oracle = deps.oracle.as_ref();
    let selections =
        resolve_candidates(oracle, member_id, &existing, &mut collected.payloads).await;

    let profiles: Vec<(SourceKind, &enrichment_common::NormalizedEnrichmentData)> = collected
        .payloads
        .iter()
        .filter_map(|(kind, payload)| match payload {
            NormalizedResult::Single(p) => Some((*kind, p)),
            NormalizedResult::Candidates(_) => None,
        })
        .collect();

    let identities = merge_identities(&existing, profiles.iter().map(|(_, p)| *p));

    let candidates = attributes::collect_attribute_candidates(profiles.iter().copied());
    let attributes = attributes::squash_attributes(oracle, member_id, candidates).await;

    let crustdata = selections.get(&SourceKind::Crustdata);
    let member_organizations = match crustdata {
        Some(profile) => profile.member_organizations.clone(),
        None => {
            let histories: Vec<Vec<NormalizedOrganization>> = profiles
                .iter()
                .map(|(_, p)| p.member_organizations.clone())
                .filter(|orgs| !orgs.is_empty())
                .collect();
            merge_work_histories(oracle, member_id, histories).await
        }
    };

    let reach = crustdata.map(|p| p.reach.clone()).unwrap_or_default();

    let scraper_selected = selections.contains_key(&SourceKind::ProgAiLinkedinScraper);
    let contributions = (scraper_selected
        && collected.candidates_had_contributions
        && !collected.progai_contributions.is_empty())
    .then(|| std::mem::take(&mut collected.progai_contributions));

    info!(
        %member_id,
        sources = ?collected.payloads.keys().collect::<Vec<_>>(),
        identities = identities.len(),
        attributes = attributes.len(),
        work_experiences = member_organizations.len(),
        high_confidence = crustdata.is_some(),
        "Squash planned"
    );

    Ok(Some(SquashPlan {
        member_id,
        existing,
        payload: SquashedPayload {
            identities,
            attributes,
            member_organizations,
            reach,
        },
        contributions,
        high_confidence: crustdata.is_some(),
    }))
}

/// Union of the sources' identities, minus those the member already has.
pub fn merge_identities<'a>(
    existing: &ExistingMemberData,
    profiles: impl IntoIterator<Item = &'a enrichment_common::NormalizedEnrichmentData>,
) -> Vec<MemberIdentity> {
    let mut merged: Vec<MemberIdentity> = Vec::new();
    for identity in profiles.into_iter().flat_map(|p| p.identities.iter()) {
        let known = merged.iter().any(|i| i.same_key(identity))
            || existing.identities.iter().any(|i| i.same_key(identity));
        if !known {
            merged.push(identity.clone());
        }
    }
    merged
}

async fn merge_work_histories(
    oracle: &dyn ArbitrationOracle,
    member_id: Uuid,
    mut histories: Vec<Vec<NormalizedOrganization>>,
) -> Vec<NormalizedOrganization> {
    match histories.len() {
        0 => vec![],
        1 => histories.pop().unwrap_or_default(),
        _ => match oracle.squash_work_experiences(member_id, &histories).await {
            Some(mut merged) => {
                demote_extra_verified(&mut merged);
                merged
            }
            None => {
                info!(%member_id, "Work histories not merged, leaving work experience unchanged");
                vec![]
            }
        },
    }
}

/// Plan and apply in one go. Returns whether the profile changed.
///
/// A failed write still marks the member tried, so a later sweep revisits it.
pub async fn squash_member(
    deps: &EnrichmentDeps,
    member_id: Uuid,
    sources: &[SourceKind],
) -> Result<bool> {
    match plan_squash(deps, member_id, sources).await? {
        Some(plan) => match apply_plan(deps, plan).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                warn!(%member_id, error = %e, "Squash write failed, marking member tried");
                deps.profiles.touch_last_tried_at(member_id).await?;
                Err(e)
            }
        },
        None => {
            deps.profiles.touch_last_tried_at(member_id).await?;
            Ok(false)
        }
    }
}
