//! Work-experience merge rules. Everything here is pure.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use enrichment_common::dates::same_month_year;
use enrichment_common::{ExistingWorkExperience, NormalizedOrganization, OrganizationIdentityType};

/// Keep only the first verified identity per entry verified.
///
/// Several verified identities may resolve to different stored organizations,
/// which would then need a merge.
pub fn demote_extra_verified(entries: &mut [NormalizedOrganization]) {
    for entry in entries {
        let mut seen_verified = false;
        for identity in entry.identities.iter_mut().filter(|i| i.verified) {
            if seen_verified {
                identity.verified = false;
            }
            seen_verified = true;
        }
    }
}

fn verified_domains(identities: &[enrichment_common::OrganizationIdentity]) -> Vec<&str> {
    identities
        .iter()
        .filter(|i| i.verified && i.identity_type == OrganizationIdentityType::PrimaryDomain)
        .map(|i| i.value.as_str())
        .collect()
}

fn names_overlap(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let (a, b) = (a.to_lowercase(), b.to_lowercase());
    a.contains(&b) || b.contains(&a)
}

/// Whether an incoming entry describes a work experience the member already has.
pub fn does_incoming_org_exist_in_existing_orgs(
    existing: &ExistingWorkExperience,
    incoming: &NormalizedOrganization,
) -> bool {
    let incoming_domains = verified_domains(&incoming.identities);
    let existing_domains = verified_domains(&existing.identities);
    if incoming_domains.iter().any(|d| existing_domains.contains(d)) {
        return true;
    }

    if !names_overlap(&existing.org_name, &incoming.name) {
        return false;
    }
    let same_span = same_month_year(incoming.start_date, existing.date_start)
        && same_month_year(incoming.end_date, existing.date_end);
    same_span || incoming.title == existing.job_title
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkExperienceUpdate {
    pub id: Uuid,
    pub date_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkExperiencePlan {
    pub to_delete: Vec<Uuid>,
    pub to_create: Vec<NormalizedOrganization>,
    pub to_update: Vec<WorkExperienceUpdate>,
}

impl WorkExperiencePlan {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_create.is_empty() && self.to_update.is_empty()
    }
}

fn is_same_entry(existing: &ExistingWorkExperience, incoming: &NormalizedOrganization) -> bool {
    incoming.organization_id == Some(existing.org_id)
        && incoming.title == existing.job_title
        && incoming.start_date == existing.date_start
        && incoming.end_date == existing.date_end
}

/// Diff stored work experiences against the reconciled list.
///
/// Every incoming entry must already carry its `organization_id`. Non-manual
/// stored entries are replaced, except those identical to an incoming entry.
/// Manual entries are never deleted; they may only receive an end date.
pub fn prepare_work_experiences(
    existing: &[ExistingWorkExperience],
    mut incoming: Vec<NormalizedOrganization>,
    high_confidence: bool,
) -> WorkExperiencePlan {
    let mut plan = WorkExperiencePlan::default();

    for current in existing.iter().filter(|e| !e.is_manual()) {
        match incoming.iter().position(|i| is_same_entry(current, i)) {
            Some(pos) => {
                incoming.remove(pos);
            }
            None => plan.to_delete.push(current.id),
        }
    }

    if high_confidence {
        plan.to_create = incoming;
        return plan;
    }

    let mut manual: Vec<&ExistingWorkExperience> =
        existing.iter().filter(|e| e.is_manual()).collect();
    manual.sort_by_key(|e| e.date_start);
    incoming.sort_by_key(|i| i.start_date);

    for current in manual {
        let Some(pos) = incoming.iter().position(|i| {
            i.title == current.job_title && i.organization_id == Some(current.org_id)
        }) else {
            continue;
        };

        let matched = incoming.remove(pos);
        if current.date_start == matched.start_date
            && current.date_end.is_none()
            && matched.end_date.is_some()
        {
            plan.to_update.push(WorkExperienceUpdate {
                id: current.id,
                date_end: matched.end_date,
            });
        }
    }

    plan.to_create = incoming;
    plan
}
