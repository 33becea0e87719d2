// Test doubles for the worker's seams: the arbitration oracle, the language
// model behind it and the search index.
//
// Each double answers from a queue set up front and records what it was
// asked, so tests can assert both on outcomes and on call counts.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use ai_client::CompletionAgent;
use enrichment_common::{ExistingMemberData, NormalizedEnrichmentData, NormalizedOrganization};

use crate::oracle::ArbitrationOracle;
use crate::search_index::SearchIndex;

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Scripted oracle. Profile selections are consumed in order and default to
/// `None` once exhausted; attribute and work-history answers are fixed.
#[derive(Default)]
pub struct MockOracle {
    selections: Mutex<VecDeque<Option<usize>>>,
    attributes: BTreeMap<String, Value>,
    work_experiences: Option<Vec<NormalizedOrganization>>,
    select_calls: Mutex<Vec<usize>>,
    attribute_calls: Mutex<Vec<BTreeMap<String, Vec<Value>>>>,
    work_experience_calls: Mutex<usize>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(self, answers: impl IntoIterator<Item = Option<usize>>) -> Self {
        self.selections.lock().unwrap().extend(answers);
        self
    }

    pub fn with_attributes<'a>(mut self, answers: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        self.attributes = answers
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        self
    }

    pub fn with_work_experiences(mut self, merged: Option<Vec<NormalizedOrganization>>) -> Self {
        self.work_experiences = merged;
        self
    }

    pub fn select_calls(&self) -> usize {
        self.select_calls.lock().unwrap().len()
    }

    /// Candidate counts of each selection request, in call order.
    pub fn select_candidate_counts(&self) -> Vec<usize> {
        self.select_calls.lock().unwrap().clone()
    }

    pub fn attribute_calls(&self) -> usize {
        self.attribute_calls.lock().unwrap().len()
    }

    /// Attributes asked about, per call.
    pub fn attribute_requests(&self) -> Vec<BTreeMap<String, Vec<Value>>> {
        self.attribute_calls.lock().unwrap().clone()
    }

    pub fn work_experience_calls(&self) -> usize {
        *self.work_experience_calls.lock().unwrap()
    }
}

#[async_trait]
impl ArbitrationOracle for MockOracle {
    async fn select_profile(
        &self,
        _member_id: Uuid,
        _member: &ExistingMemberData,
        candidates: &[NormalizedEnrichmentData],
    ) -> Option<usize> {
        self.select_calls.lock().unwrap().push(candidates.len());
        self.selections.lock().unwrap().pop_front().flatten()
    }

    async fn squash_attributes(
        &self,
        _member_id: Uuid,
        candidates: &BTreeMap<String, Vec<Value>>,
    ) -> BTreeMap<String, Value> {
        self.attribute_calls.lock().unwrap().push(candidates.clone());
        self.attributes
            .iter()
            .filter(|(name, _)| candidates.contains_key(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    async fn squash_work_experiences(
        &self,
        _member_id: Uuid,
        _histories: &[Vec<NormalizedOrganization>],
    ) -> Option<Vec<NormalizedOrganization>> {
        *self.work_experience_calls.lock().unwrap() += 1;
        self.work_experiences.clone()
    }
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

/// Completion agent replaying queued replies. Errors once the queue is empty.
#[derive(Default)]
pub struct MockAgent {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionAgent for MockAgent {
    async fn complete(&self, _system: &str, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("no scripted reply left")),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Search index
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSearchIndex {
    members: Mutex<Vec<Uuid>>,
    organizations: Mutex<Vec<Uuid>>,
}

impl RecordingSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self) -> Vec<Uuid> {
        self.members.lock().unwrap().clone()
    }

    pub fn organizations(&self) -> Vec<Uuid> {
        self.organizations.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchIndex for RecordingSearchIndex {
    async fn sync_member(&self, member_id: Uuid) {
        self.members.lock().unwrap().push(member_id);
    }

    async fn sync_organizations(&self, organization_ids: &[Uuid]) {
        self.organizations
            .lock()
            .unwrap()
            .extend_from_slice(organization_ids);
    }
}
