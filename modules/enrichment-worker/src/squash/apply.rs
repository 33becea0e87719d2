use std::collections::BTreeMap;

use tracing::{debug, info};
use uuid::Uuid;

use enrichment_common::attributes::{merge_enrichment_values, set_attribute_defaults};
use enrichment_common::{NormalizedOrganization, Result};

use super::work_experience::{does_incoming_org_exist_in_existing_orgs, prepare_work_experiences};
use super::SquashPlan;
use crate::deps::EnrichmentDeps;

const REACH_TOTAL: &str = "total";

/// Fold incoming per-platform reach into the stored map.
///
/// `total` moves by the difference between incoming and stored values, so
/// applying the same reach twice leaves it unchanged. A stored total of `-1`
/// means "unknown" and counts as zero.
pub fn merge_reach(
    existing: &BTreeMap<String, i64>,
    incoming: &BTreeMap<String, i64>,
) -> BTreeMap<String, i64> {
    let mut merged = existing.clone();
    let mut total = existing.get(REACH_TOTAL).copied().unwrap_or(0).max(0);

    for (platform, value) in incoming.iter().filter(|(k, _)| k.as_str() != REACH_TOTAL) {
        let previous = existing.get(platform).copied().unwrap_or(0);
        total += value - previous;
        merged.insert(platform.clone(), *value);
    }

    merged.insert(REACH_TOTAL.to_string(), total);
    merged
}

/// Give incoming entries that describe an existing work experience that
/// experience's organization, along with every entry of the same name.
fn link_existing_organizations(plan: &SquashPlan, incoming: &mut [NormalizedOrganization]) {
    for i in 0..incoming.len() {
        if incoming[i].organization_id.is_some() {
            continue;
        }
        let Some(existing) = plan
            .existing
            .organizations
            .iter()
            .find(|e| does_incoming_org_exist_in_existing_orgs(e, &incoming[i]))
        else {
            continue;
        };
        let name = incoming[i].name.clone();
        for entry in incoming.iter_mut().filter(|o| o.name == name) {
            entry.organization_id = Some(existing.org_id);
        }
    }
}

/// Write a squash in one transaction. Returns whether anything changed.
///
/// Search-index notifications go out only after the commit.
pub async fn apply_plan(deps: &EnrichmentDeps, plan: SquashPlan) -> Result<bool> {
    let member_id = plan.member_id;
    let mut tx = deps.profiles.begin().await?;
    let mut updated = false;
    let mut organizations_to_sync: Vec<Uuid> = Vec::new();

    if !plan.payload.identities.is_empty() {
        debug!(%member_id, count = plan.payload.identities.len(), "Adding member identities");
        tx.insert_identities(member_id, &plan.payload.identities).await?;
        updated = true;
    }

    if let Some(contributions) = plan
        .contributions
        .as_ref()
        .filter(|c| **c != plan.existing.contributions)
    {
        tx.update_contributions(member_id, contributions).await?;
        updated = true;
    }

    if !plan.payload.attributes.is_empty() {
        let merged = merge_enrichment_values(&plan.existing.attributes, &plan.payload.attributes);
        let merged = set_attribute_defaults(&merged, &deps.settings.attribute_platform_priority);
        if merged != plan.existing.attributes {
            tx.update_attributes(member_id, &merged).await?;
            updated = true;
        }
    }

    if !plan.payload.reach.is_empty() {
        let reach = merge_reach(&plan.existing.reach, &plan.payload.reach);
        if reach != plan.existing.reach {
            tx.update_reach(member_id, &reach).await?;
            updated = true;
        }
    }

    if !plan.payload.member_organizations.is_empty() {
        let mut incoming = plan.payload.member_organizations.clone();
        link_existing_organizations(&plan, &mut incoming);

        for org in incoming.iter_mut().filter(|o| o.organization_id.is_none()) {
            let has_verified = org.identities.iter().any(|i| i.verified);
            if org.name.is_empty() && !has_verified {
                debug!(%member_id, "Skipping organization without name or verified identity");
                continue;
            }
            let organization_id = tx.find_or_create_organization(org).await?;
            org.organization_id = Some(organization_id);
            if !organizations_to_sync.contains(&organization_id) {
                organizations_to_sync.push(organization_id);
            }
        }
        incoming.retain(|o| o.organization_id.is_some());

        let diff = prepare_work_experiences(
            &plan.existing.organizations,
            incoming,
            plan.high_confidence,
        );

        for id in &diff.to_delete {
            tx.delete_work_experience(member_id, *id).await?;
            updated = true;
        }

        for entry in &diff.to_create {
            let Some(organization_id) = entry.organization_id else {
                continue;
            };
            let Some(id) = tx
                .insert_work_experience(member_id, entry, organization_id)
                .await?
            else {
                continue;
            };
            updated = true;
            if tx.is_affiliation_blocked(organization_id).await? {
                tx.block_affiliation(member_id, id).await?;
            }
        }

        for update in &diff.to_update {
            tx.update_work_experience_end_date(update.id, update.date_end)
                .await?;
            updated = true;
        }
    }

    if updated {
        tx.mark_enriched(member_id).await?;
    } else {
        tx.mark_tried(member_id).await?;
    }
    tx.commit().await?;

    if updated {
        info!(%member_id, "Member profile updated from enrichment sources");
        deps.search_index.sync_member(member_id).await;
    } else {
        debug!(%member_id, "Squash produced no changes");
    }
    if !organizations_to_sync.is_empty() {
        deps.search_index
            .sync_organizations(&organizations_to_sync)
            .await;
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reach(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn reach_total_moves_by_difference() {
        let existing = reach(&[("github", 10), ("linkedin", 100), ("total", 110)]);
        let incoming = reach(&[("linkedin", 150)]);

        let merged = merge_reach(&existing, &incoming);
        assert_eq!(merged["linkedin"], 150);
        assert_eq!(merged["github"], 10);
        assert_eq!(merged["total"], 160);

        assert_eq!(merge_reach(&merged, &incoming), merged, "applying twice is a no-op");
    }

    #[test]
    fn unknown_total_counts_as_zero() {
        let existing = reach(&[("total", -1)]);
        let merged = merge_reach(&existing, &reach(&[("linkedin", 42), ("total", 999)]));
        assert_eq!(merged["total"], 42);
    }
}
