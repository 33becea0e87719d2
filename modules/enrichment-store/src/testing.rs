// In-memory stores for orchestrator, scanner and squash tests.
//
// InMemoryProfileStore transactions work on a copy of the state: `commit`
// swaps the copy in and appends the transaction's writes to the committed
// log, dropping the transaction discards both. `fail_lookups_for` and
// `fail_commits` simulate an unreachable database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use enrichment_common::{
    Contribution, EnrichableMember, EnrichmentCacheEntry, ExistingMemberData,
    ExistingWorkExperience, MemberIdentity, NormalizedOrganization, OrganizationIdentity, Result,
    SourceKind,
};

use crate::cache::{strip_null_bytes, EnrichmentCacheStore};
use crate::eligibility::EligibilityQuery;
use crate::profile::{ProfileStore, ProfileTransaction};

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryCacheStore {
    rows: Mutex<HashMap<(Uuid, SourceKind), EnrichmentCacheEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a row as-is, timestamps included.
    pub fn seed(&self, entry: EnrichmentCacheEntry) {
        self.rows
            .lock()
            .unwrap()
            .insert((entry.member_id, entry.source), entry);
    }

    pub fn get(&self, member_id: Uuid, source: SourceKind) -> Option<EnrichmentCacheEntry> {
        self.rows.lock().unwrap().get(&(member_id, source)).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EnrichmentCacheStore for InMemoryCacheStore {
    async fn find_for_sources(
        &self,
        member_id: Uuid,
        sources: &[SourceKind],
        include_empty: bool,
    ) -> Result<Vec<EnrichmentCacheEntry>> {
        let rows = self.rows.lock().unwrap();
        let mut entries: Vec<EnrichmentCacheEntry> = rows
            .values()
            .filter(|e| e.member_id == member_id && sources.contains(&e.source))
            .filter(|e| include_empty || e.data.is_some())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.source);
        Ok(entries)
    }

    async fn insert(&self, member_id: Uuid, source: SourceKind, data: Option<&Value>) -> Result<()> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        let created_at = rows
            .get(&(member_id, source))
            .map(|e| e.created_at)
            .unwrap_or(now);
        rows.insert(
            (member_id, source),
            EnrichmentCacheEntry {
                member_id,
                source,
                data: data.map(strip_null_bytes),
                created_at,
                updated_at: now,
                last_tried_at: Some(now),
            },
        );
        Ok(())
    }

    async fn update_data(
        &self,
        member_id: Uuid,
        source: SourceKind,
        data: Option<&Value>,
    ) -> Result<()> {
        let now = Utc::now();
        if let Some(e) = self.rows.lock().unwrap().get_mut(&(member_id, source)) {
            e.data = data.map(strip_null_bytes);
            e.updated_at = now;
            e.last_tried_at = Some(now);
        }
        Ok(())
    }

    async fn touch_updated_at(&self, member_id: Uuid, source: SourceKind) -> Result<()> {
        let now = Utc::now();
        if let Some(e) = self.rows.lock().unwrap().get_mut(&(member_id, source)) {
            e.updated_at = now;
            e.last_tried_at = Some(now);
        }
        Ok(())
    }

    async fn touch_last_tried_at(&self, member_id: Uuid, source: SourceKind) -> Result<()> {
        if let Some(e) = self.rows.lock().unwrap().get_mut(&(member_id, source)) {
            e.last_tried_at = Some(Utc::now());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// One write performed through a [`ProfileTransaction`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileWrite {
    IdentitiesInserted { member_id: Uuid, identities: Vec<MemberIdentity> },
    AttributesUpdated { member_id: Uuid, attributes: Value },
    ReachUpdated { member_id: Uuid, reach: BTreeMap<String, i64> },
    ContributionsUpdated { member_id: Uuid, contributions: Vec<Contribution> },
    OrganizationCreated { organization_id: Uuid, name: String },
    WorkExperienceDeleted { member_id: Uuid, id: Uuid },
    WorkExperienceInserted { member_id: Uuid, id: Uuid, organization_id: Uuid, title: Option<String> },
    WorkExperienceEndDateUpdated { id: Uuid, end: Option<NaiveDate> },
    AffiliationBlocked { member_id: Uuid, member_organization_id: Uuid },
    MarkedEnriched { member_id: Uuid },
    MarkedTried { member_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct StoredOrganization {
    pub id: Uuid,
    pub name: String,
    pub identities: Vec<OrganizationIdentity>,
    pub affiliation_blocked: bool,
}

#[derive(Debug, Clone, Default)]
struct ProfileState {
    members: HashMap<Uuid, EnrichableMember>,
    profiles: HashMap<Uuid, ExistingMemberData>,
    organizations: Vec<StoredOrganization>,
    tried: HashMap<Uuid, u32>,
    enriched: HashMap<Uuid, u32>,
    failing_lookups: HashSet<Uuid>,
    failing_commits: bool,
}

fn connection_lost() -> enrichment_common::EnrichmentError {
    sqlx::Error::PoolTimedOut.into()
}

#[derive(Default)]
pub struct InMemoryProfileStore {
    state: Arc<Mutex<ProfileState>>,
    committed: Arc<Mutex<Vec<ProfileWrite>>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member with its stored profile.
    pub fn add_member(&self, member: EnrichableMember, profile: ExistingMemberData) {
        let mut state = self.state.lock().unwrap();
        state.profiles.insert(member.id, profile);
        state.members.insert(member.id, member);
    }

    /// Reads of this member fail as if the database were down.
    pub fn fail_lookups_for(&self, member_id: Uuid) {
        self.state.lock().unwrap().failing_lookups.insert(member_id);
    }

    /// Every later commit fails and its writes are discarded.
    pub fn fail_commits(&self) {
        self.state.lock().unwrap().failing_commits = true;
    }

    pub fn add_organization(&self, org: StoredOrganization) {
        self.state.lock().unwrap().organizations.push(org);
    }

    pub fn profile(&self, member_id: Uuid) -> Option<ExistingMemberData> {
        self.state.lock().unwrap().profiles.get(&member_id).cloned()
    }

    pub fn contributions(&self, member_id: Uuid) -> Vec<Contribution> {
        self.profile(member_id)
            .map(|p| p.contributions)
            .unwrap_or_default()
    }

    pub fn organizations(&self) -> Vec<StoredOrganization> {
        self.state.lock().unwrap().organizations.clone()
    }

    /// How often `last_tried_at` was set for the member.
    pub fn tried_count(&self, member_id: Uuid) -> u32 {
        self.state.lock().unwrap().tried.get(&member_id).copied().unwrap_or(0)
    }

    /// How often `last_updated_at` was set for the member.
    pub fn enriched_count(&self, member_id: Uuid) -> u32 {
        self.state.lock().unwrap().enriched.get(&member_id).copied().unwrap_or(0)
    }

    pub fn committed_writes(&self) -> Vec<ProfileWrite> {
        self.committed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn find_enrichable_members(&self, query: &EligibilityQuery) -> Result<Vec<EnrichableMember>> {
        let state = self.state.lock().unwrap();
        let mut members: Vec<EnrichableMember> = state.members.values().cloned().collect();
        members.sort_by(|a, b| {
            b.activity_count
                .cmp(&a.activity_count)
                .then_with(|| a.id.cmp(&b.id))
        });
        members.truncate(query.limit.max(0) as usize);
        Ok(members)
    }

    async fn find_member(&self, member_id: Uuid) -> Result<Option<EnrichableMember>> {
        let state = self.state.lock().unwrap();
        if state.failing_lookups.contains(&member_id) {
            return Err(connection_lost());
        }
        Ok(state.members.get(&member_id).cloned())
    }

    async fn fetch_member_data_for_squashing(
        &self,
        member_id: Uuid,
    ) -> Result<Option<ExistingMemberData>> {
        let state = self.state.lock().unwrap();
        if state.failing_lookups.contains(&member_id) {
            return Err(connection_lost());
        }
        Ok(state.profiles.get(&member_id).cloned())
    }

    async fn touch_last_tried_at(&self, member_id: Uuid) -> Result<()> {
        *self.state.lock().unwrap().tried.entry(member_id).or_default() += 1;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn ProfileTransaction>> {
        let working = self.state.lock().unwrap().clone();
        Ok(Box::new(InMemoryProfileTransaction {
            shared: self.state.clone(),
            committed: self.committed.clone(),
            working,
            writes: Vec::new(),
        }))
    }
}

pub struct InMemoryProfileTransaction {
    shared: Arc<Mutex<ProfileState>>,
    committed: Arc<Mutex<Vec<ProfileWrite>>>,
    working: ProfileState,
    writes: Vec<ProfileWrite>,
}

impl InMemoryProfileTransaction {
    fn profile_mut(&mut self, member_id: Uuid) -> Option<&mut ExistingMemberData> {
        self.working.profiles.get_mut(&member_id)
    }
}

#[async_trait]
impl ProfileTransaction for InMemoryProfileTransaction {
    async fn insert_identities(&mut self, member_id: Uuid, identities: &[MemberIdentity]) -> Result<()> {
        if let Some(profile) = self.profile_mut(member_id) {
            for identity in identities {
                if !profile.identities.iter().any(|i| i.same_key(identity)) {
                    profile.identities.push(identity.clone());
                }
            }
        }
        self.writes.push(ProfileWrite::IdentitiesInserted {
            member_id,
            identities: identities.to_vec(),
        });
        Ok(())
    }

    async fn update_attributes(&mut self, member_id: Uuid, attributes: &Value) -> Result<()> {
        if let Some(profile) = self.profile_mut(member_id) {
            profile.attributes = attributes.clone();
        }
        self.writes.push(ProfileWrite::AttributesUpdated {
            member_id,
            attributes: attributes.clone(),
        });
        Ok(())
    }

    async fn update_reach(&mut self, member_id: Uuid, reach: &BTreeMap<String, i64>) -> Result<()> {
        if let Some(profile) = self.profile_mut(member_id) {
            profile.reach = reach.clone();
        }
        self.writes.push(ProfileWrite::ReachUpdated {
            member_id,
            reach: reach.clone(),
        });
        Ok(())
    }

    async fn update_contributions(
        &mut self,
        member_id: Uuid,
        contributions: &[Contribution],
    ) -> Result<()> {
        if let Some(profile) = self.profile_mut(member_id) {
            profile.contributions = contributions.to_vec();
        }
        self.writes.push(ProfileWrite::ContributionsUpdated {
            member_id,
            contributions: contributions.to_vec(),
        });
        Ok(())
    }

    async fn find_or_create_organization(&mut self, org: &NormalizedOrganization) -> Result<Uuid> {
        let verified: Vec<&OrganizationIdentity> =
            org.identities.iter().filter(|i| i.verified).collect();

        for identity in &verified {
            let found = self.working.organizations.iter().find(|o| {
                o.identities.iter().any(|i| {
                    i.verified
                        && i.platform == identity.platform
                        && i.identity_type == identity.identity_type
                        && i.value.eq_ignore_ascii_case(&identity.value)
                })
            });
            if let Some(o) = found {
                return Ok(o.id);
            }
        }

        if verified.is_empty() && !org.name.is_empty() {
            if let Some(o) = self
                .working
                .organizations
                .iter()
                .find(|o| o.name.eq_ignore_ascii_case(&org.name))
            {
                return Ok(o.id);
            }
        }

        let name = if org.name.is_empty() {
            verified.first().map(|i| i.value.clone()).unwrap_or_default()
        } else {
            org.name.clone()
        };
        let id = Uuid::new_v4();
        self.working.organizations.push(StoredOrganization {
            id,
            name: name.clone(),
            identities: org.identities.clone(),
            affiliation_blocked: false,
        });
        self.writes.push(ProfileWrite::OrganizationCreated {
            organization_id: id,
            name,
        });
        Ok(id)
    }

    async fn is_affiliation_blocked(&mut self, organization_id: Uuid) -> Result<bool> {
        Ok(self
            .working
            .organizations
            .iter()
            .any(|o| o.id == organization_id && o.affiliation_blocked))
    }

    async fn delete_work_experience(&mut self, member_id: Uuid, id: Uuid) -> Result<()> {
        if let Some(profile) = self.profile_mut(member_id) {
            profile.organizations.retain(|w| w.id != id);
        }
        self.writes
            .push(ProfileWrite::WorkExperienceDeleted { member_id, id });
        Ok(())
    }

    async fn insert_work_experience(
        &mut self,
        member_id: Uuid,
        entry: &NormalizedOrganization,
        organization_id: Uuid,
    ) -> Result<Option<Uuid>> {
        let org = self
            .working
            .organizations
            .iter()
            .find(|o| o.id == organization_id)
            .cloned();
        let Some(profile) = self.working.profiles.get_mut(&member_id) else {
            return Ok(None);
        };

        let duplicate = profile.organizations.iter().any(|w| {
            w.org_id == organization_id
                && w.date_start == entry.start_date
                && w.date_end == entry.end_date
        });
        if duplicate {
            return Ok(None);
        }

        let id = Uuid::new_v4();
        profile.organizations.push(ExistingWorkExperience {
            id,
            org_id: organization_id,
            org_name: org.as_ref().map(|o| o.name.clone()).unwrap_or_default(),
            job_title: entry.title.clone(),
            date_start: entry.start_date,
            date_end: entry.end_date,
            source: Some(entry.source.clone()),
            identities: org.map(|o| o.identities).unwrap_or_default(),
        });
        self.writes.push(ProfileWrite::WorkExperienceInserted {
            member_id,
            id,
            organization_id,
            title: entry.title.clone(),
        });
        Ok(Some(id))
    }

    async fn update_work_experience_end_date(&mut self, id: Uuid, end: Option<NaiveDate>) -> Result<()> {
        for profile in self.working.profiles.values_mut() {
            for w in profile.organizations.iter_mut().filter(|w| w.id == id) {
                w.date_end = end;
            }
        }
        self.writes
            .push(ProfileWrite::WorkExperienceEndDateUpdated { id, end });
        Ok(())
    }

    async fn block_affiliation(&mut self, member_id: Uuid, member_organization_id: Uuid) -> Result<()> {
        self.writes.push(ProfileWrite::AffiliationBlocked {
            member_id,
            member_organization_id,
        });
        Ok(())
    }

    async fn mark_enriched(&mut self, member_id: Uuid) -> Result<()> {
        *self.working.enriched.entry(member_id).or_default() += 1;
        *self.working.tried.entry(member_id).or_default() += 1;
        self.writes.push(ProfileWrite::MarkedEnriched { member_id });
        Ok(())
    }

    async fn mark_tried(&mut self, member_id: Uuid) -> Result<()> {
        *self.working.tried.entry(member_id).or_default() += 1;
        self.writes.push(ProfileWrite::MarkedTried { member_id });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut shared = this.shared.lock().unwrap();
        if shared.failing_commits {
            return Err(connection_lost());
        }
        *shared = this.working;
        drop(shared);
        this.committed.lock().unwrap().extend(this.writes);
        Ok(())
    }
}
