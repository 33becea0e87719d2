use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use ai_client::{extract_json, CompletionAgent};
use enrichment_common::{ExistingMemberData, NormalizedEnrichmentData, NormalizedOrganization};

use super::{compact_member_profile, ArbitrationOracle};

const SELECT_PROFILE_SYSTEM_PROMPT: &str = r#"You are an expert at analyzing and matching personal profiles. You will receive a member profile and an array of LinkedIn profiles, both as JSON. Return only the index of the profile that most likely belongs to the member.

Match on flexible criteria, allowing partial matches:
- Name similarity: at most 2 edits apart, character tokenized.
- Job titles and companies: overlaps in current or past roles.
- Location: overlapping or similar locations.
- Education and skills: shared schools or skill sets.

A profile matching at least two strong criteria (name, job or location) with no contradictory information is a plausible match. If there is contradictory data, do not return the profile.

Respond with JSON only, no prose and no code fences:
{"profileIndex": 0}
where profileIndex is the 0-based index into the array, or null when nothing matches."#;

const SQUASH_ATTRIBUTES_SYSTEM_PROMPT: &str = r#"You will receive a JSON object mapping member attribute names to arrays of candidate values collected from different sources. Pick the single best value for each attribute.

General rules:
- Select the most relevant and accurate value.
- Information repeated across values is a strong indicator.

Specific rules:
- avatarUrl: prefer the highest quality, professional, clear image. Exclude broken or invalid URLs.
- jobTitle: prefer the most precise and professional title ("Software Engineer" over "Engineer"). When titles form a hierarchy pick the highest level.
- bio: prefer the most detailed, relevant, grammatically accurate description. Avoid generic text.
- location: prefer specific, complete values that include city and country ("Berlin, Germany" over "Germany").

Respond with a single JSON object with exactly the attribute names you were given as keys and the chosen values. Use an empty string when no candidate is valid. No prose and no code fences."#;

const SQUASH_WORK_EXPERIENCES_SYSTEM_PROMPT: &str = r#"You will receive nested JSON arrays of work experience entries, one inner array per data source. Each entry has: name, identities (optional), title (optional), organizationDescription (optional), startDate and endDate (optional ISO dates, endDate null when ongoing), source.

Produce one chronologically ordered array that is the most accurate work history:
- Sort by startDate. When startDate is missing, infer order from endDate or context.
- Never merge entries coming from the same source.
- When entries for the same organization overlap in time across different sources, squash them into one entry with unified dates. Merge date ranges only; never concatenate titles, pick the one that best represents the role.
- Keep all unique identities.
- Fill missing dates only from dates present in the input. An entry with neither date may be dropped when another entry for the same or a similar organization has dates.
- Ongoing roles (endDate null) go last.
- Keep every field of the entries you return.

Respond with the JSON array only, no prose and no code fences."#;

/// Arbitration backed by a completion model.
pub struct LlmArbitrationOracle {
    agent: Arc<dyn CompletionAgent>,
}

impl LlmArbitrationOracle {
    pub fn new(agent: Arc<dyn CompletionAgent>) -> Self {
        Self { agent }
    }

    /// Run a completion and parse its JSON. Every failure is "no answer".
    async fn ask(&self, member_id: Uuid, call: &str, system: &str, prompt: String) -> Option<Value> {
        let response = match self.agent.complete(system, &prompt).await {
            Ok(r) => r,
            Err(e) => {
                warn!(%member_id, call, error = %e, "Arbitration request failed");
                return None;
            }
        };

        let parsed = extract_json(&response);
        if parsed.is_none() {
            warn!(
                %member_id,
                call,
                model = self.agent.model_name(),
                "Arbitration response was not valid JSON"
            );
        }
        parsed
    }
}

fn build_select_profile_prompt(
    member: &ExistingMemberData,
    candidates: &[NormalizedEnrichmentData],
) -> String {
    format!(
        "### Member profile:\n{}\n\n### LinkedIn profiles:\n{}\n",
        serde_json::to_string(member).unwrap_or_default(),
        serde_json::to_string(candidates).unwrap_or_default(),
    )
}

fn parse_profile_index(value: &Value, candidate_count: usize) -> Option<usize> {
    let index = value.get("profileIndex")?.as_u64()? as usize;
    (index < candidate_count).then_some(index)
}

/// Empty strings and nulls mean the model found no valid candidate.
fn parse_attribute_choices(
    value: Value,
    asked: &BTreeMap<String, Vec<Value>>,
) -> BTreeMap<String, Value> {
    let Value::Object(map) = value else {
        return BTreeMap::new();
    };
    map.into_iter()
        .filter(|(name, _)| asked.contains_key(name))
        .filter(|(_, v)| match v {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
        .collect()
}

#[async_trait]
impl ArbitrationOracle for LlmArbitrationOracle {
    async fn select_profile(
        &self,
        member_id: Uuid,
        member: &ExistingMemberData,
        candidates: &[NormalizedEnrichmentData],
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let prompt = build_select_profile_prompt(&compact_member_profile(member), candidates);
        let value = self
            .ask(member_id, "select_profile", SELECT_PROFILE_SYSTEM_PROMPT, prompt)
            .await?;

        let index = parse_profile_index(&value, candidates.len());
        info!(
            %member_id,
            candidates = candidates.len(),
            selected = ?index,
            "Profile arbitration answered"
        );
        index
    }

    async fn squash_attributes(
        &self,
        member_id: Uuid,
        candidates: &BTreeMap<String, Vec<Value>>,
    ) -> BTreeMap<String, Value> {
        if candidates.is_empty() {
            return BTreeMap::new();
        }
        let prompt = format!(
            "<json> {} </json>",
            serde_json::to_string(candidates).unwrap_or_default()
        );
        match self
            .ask(member_id, "squash_attributes", SQUASH_ATTRIBUTES_SYSTEM_PROMPT, prompt)
            .await
        {
            Some(value) => parse_attribute_choices(value, candidates),
            None => BTreeMap::new(),
        }
    }

    async fn squash_work_experiences(
        &self,
        member_id: Uuid,
        histories: &[Vec<NormalizedOrganization>],
    ) -> Option<Vec<NormalizedOrganization>> {
        let prompt = format!(
            "## INPUT\n{}\n",
            serde_json::to_string(histories).unwrap_or_default()
        );
        let value = self
            .ask(
                member_id,
                "squash_work_experiences",
                SQUASH_WORK_EXPERIENCES_SYSTEM_PROMPT,
                prompt,
            )
            .await?;

        match serde_json::from_value::<Vec<NormalizedOrganization>>(value) {
            Ok(merged) => Some(merged),
            Err(e) => {
                warn!(%member_id, error = %e, "Merged work history did not match the expected shape");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAgent;
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

    fn candidates(n: usize) -> Vec<NormalizedEnrichmentData> {
        (0..n)
            .map(|i| NormalizedEnrichmentData {
                display_name: Some(format!("candidate {i}")),
                ..Default::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn parses_fenced_profile_index() {
        let agent = Arc::new(MockAgent::new().reply("```json\n{\"profileIndex\": 1}\n```"));
        let oracle = LlmArbitrationOracle::new(agent.clone());

        let picked = oracle
            .select_profile(Uuid::new_v4(), &member(), &candidates(3))
            .await;
        assert_eq!(picked, Some(1));
        assert_eq!(agent.prompts().len(), 1);
        assert!(agent.prompts()[0].contains("candidate 2"));
    }

    #[tokio::test]
    async fn null_or_out_of_range_index_is_no_answer() {
        let agent = Arc::new(
            MockAgent::new()
                .reply(r#"{"profileIndex": null}"#)
                .reply(r#"{"profileIndex": 7}"#),
        );
        let oracle = LlmArbitrationOracle::new(agent);

        assert_eq!(oracle.select_profile(Uuid::new_v4(), &member(), &candidates(2)).await, None);
        assert_eq!(oracle.select_profile(Uuid::new_v4(), &member(), &candidates(2)).await, None);
    }

    #[tokio::test]
    async fn malformed_response_is_no_answer() {
        let agent = Arc::new(MockAgent::new().reply("I think it's the second one"));
        let oracle = LlmArbitrationOracle::new(agent);

        let histories = vec![vec![], vec![]];
        assert!(oracle
            .squash_work_experiences(Uuid::new_v4(), &histories)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn agent_failure_is_no_answer() {
        let agent = Arc::new(MockAgent::new().fail("throttled"));
        let oracle = LlmArbitrationOracle::new(agent);

        let mut asked = BTreeMap::new();
        asked.insert("bio".to_string(), vec![json!("a"), json!("b")]);
        assert!(oracle.squash_attributes(Uuid::new_v4(), &asked).await.is_empty());
    }

    #[tokio::test]
    async fn attribute_answers_drop_blanks_and_unasked_keys() {
        let agent = Arc::new(MockAgent::new().reply(
            r#"{"jobTitle": "Senior Software Engineer", "bio": "", "location": null, "avatarUrl": "x"}"#,
        ));
        let oracle = LlmArbitrationOracle::new(agent);

        let mut asked = BTreeMap::new();
        asked.insert("jobTitle".to_string(), vec![json!("Engineer"), json!("Senior Software Engineer")]);
        asked.insert("bio".to_string(), vec![json!("a"), json!("b")]);
        asked.insert("location".to_string(), vec![json!("Berlin"), json!("Germany")]);

        let chosen = oracle.squash_attributes(Uuid::new_v4(), &asked).await;
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen["jobTitle"], json!("Senior Software Engineer"));
    }

    #[tokio::test]
    async fn merged_work_history_is_parsed() {
        let agent = Arc::new(MockAgent::new().reply(
            r#"[{"name":"Acme","title":"Engineer","startDate":"2020-01-01","endDate":null,"source":"enrichment-progai"}]"#,
        ));
        let oracle = LlmArbitrationOracle::new(agent);

        let merged = oracle
            .squash_work_experiences(Uuid::new_v4(), &[vec![], vec![]])
            .await
            .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Acme");
        assert_eq!(merged[0].end_date, None);
    }
}
