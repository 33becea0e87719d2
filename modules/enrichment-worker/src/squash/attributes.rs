use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use enrichment_common::attributes::clean_attribute_value;
use enrichment_common::{NormalizedEnrichmentData, SourceKind};

use crate::oracle::ArbitrationOracle;

/// Null, `false`, zero and empty strings count as "not reported".
pub(crate) fn is_reported(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Values each source reported under its own platform key, per attribute.
pub fn collect_attribute_candidates<'a>(
    profiles: impl IntoIterator<Item = (SourceKind, &'a NormalizedEnrichmentData)>,
) -> BTreeMap<String, Vec<Value>> {
    let mut candidates: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for (kind, profile) in profiles {
        let platform = kind.platform();
        for (name, platforms) in &profile.attributes {
            if let Some(value) = platforms.get(&platform).filter(|v| is_reported(v)) {
                candidates
                    .entry(name.clone())
                    .or_default()
                    .push(clean_attribute_value(value));
            }
        }
    }
    candidates
}

/// One value per attribute.
///
/// Single-source attributes are taken as they are, as are attributes whose
/// sources all agree. The rest go to the oracle in one batch; attributes it
/// leaves unanswered are skipped.
pub async fn squash_attributes(
    oracle: &dyn ArbitrationOracle,
    member_id: Uuid,
    candidates: BTreeMap<String, Vec<Value>>,
) -> BTreeMap<String, Value> {
    let mut squashed = BTreeMap::new();
    let mut contested = BTreeMap::new();

    for (name, mut values) in candidates {
        let unanimous = values.windows(2).all(|w| w[0] == w[1]);
        if unanimous {
            if let Some(value) = values.pop() {
                squashed.insert(name, value);
            }
        } else {
            contested.insert(name, values);
        }
    }

    if !contested.is_empty() {
        tracing::debug!(%member_id, attributes = contested.len(), "Arbitrating contested attributes");
        for (name, value) in oracle.squash_attributes(member_id, &contested).await {
            if contested.contains_key(&name) && is_reported(&value) {
                squashed.insert(name, clean_attribute_value(&value));
            }
        }
    }

    squashed
}
