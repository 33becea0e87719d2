//! Member attribute names and value clean-up shared by sources and reconciliation.

use serde_json::{Map, Value};

pub const AVATAR_URL: &str = "avatarUrl";
pub const LOCATION: &str = "location";
pub const BIO: &str = "bio";
pub const SENIORITY_LEVEL: &str = "seniorityLevel";
pub const COUNTRY: &str = "country";
pub const PROGRAMMING_LANGUAGES: &str = "programmingLanguages";
pub const LANGUAGES: &str = "languages";
pub const YEARS_OF_EXPERIENCE: &str = "yearsOfExperience";
pub const EXPERTISE: &str = "expertise";
pub const EDUCATION: &str = "education";
pub const AWARDS: &str = "awards";
pub const CERTIFICATIONS: &str = "certifications";
pub const SKILLS: &str = "skills";
pub const TIMEZONE: &str = "timezone";
pub const WEBSITE_URL: &str = "websiteUrl";
pub const JOB_TITLE: &str = "jobTitle";
pub const SCHOOLS: &str = "schools";

/// Platform key for the reconciled value of an attribute.
pub const ENRICHMENT_PLATFORM: &str = "enrichment";
/// Platform key holding the value shown to users.
pub const DEFAULT_PLATFORM: &str = "default";

pub fn replace_double_quotes(s: &str) -> String {
    s.replace('"', "'")
}

/// Strip double quotes from string values, one level deep into arrays and objects.
pub fn clean_attribute_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(replace_double_quotes(s)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Value::String(replace_double_quotes(s)),
                    other => other.clone(),
                })
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => Value::String(replace_double_quotes(s)),
                        other => other.clone(),
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Write `{name: {enrichment: value}}` entries into a stored attribute object.
///
/// Other platforms under each attribute are left as they are.
pub fn merge_enrichment_values<'a>(
    stored: &Value,
    squashed: impl IntoIterator<Item = (&'a String, &'a Value)>,
) -> Value {
    let mut merged = match stored {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    for (name, value) in squashed {
        let slot = merged
            .entry(name.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(platforms) = slot {
            platforms.insert(ENRICHMENT_PLATFORM.to_string(), value.clone());
        }
    }

    Value::Object(merged)
}

/// Recompute each attribute's `default` from the platform priority list.
///
/// The first platform in `priorities` that holds a non-null value wins. When
/// none of the listed platforms are present the first remaining platform is used.
pub fn set_attribute_defaults(attributes: &Value, priorities: &[String]) -> Value {
    let Value::Object(map) = attributes else {
        return attributes.clone();
    };

    let mut out = Map::new();
    for (name, platforms) in map {
        let Value::Object(platforms) = platforms else {
            out.insert(name.clone(), platforms.clone());
            continue;
        };

        let candidates: Vec<(&String, &Value)> = platforms
            .iter()
            .filter(|(p, v)| p.as_str() != DEFAULT_PLATFORM && !v.is_null())
            .collect();

        let chosen = priorities
            .iter()
            .find_map(|p| candidates.iter().find(|(k, _)| *k == p))
            .or_else(|| candidates.first())
            .map(|(_, v)| (*v).clone());

        let mut platforms = platforms.clone();
        if let Some(v) = chosen {
            platforms.insert(DEFAULT_PLATFORM.to_string(), v);
        }
        out.insert(name.clone(), Value::Object(platforms));
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cleans_nested_strings_one_level() {
        let v = json!({"title": "The \"Best\"", "n": 3});
        assert_eq!(clean_attribute_value(&v), json!({"title": "The 'Best'", "n": 3}));

        let v = json!(["a\"b", 1]);
        assert_eq!(clean_attribute_value(&v), json!(["a'b", 1]));
    }

    #[test]
    fn merge_keeps_other_platforms() {
        let stored = json!({"bio": {"github": "hi", "default": "hi"}});
        let bio = BIO.to_string();
        let value = json!("Senior engineer");
        let merged = merge_enrichment_values(&stored, [(&bio, &value)]);
        assert_eq!(merged["bio"]["github"], "hi");
        assert_eq!(merged["bio"]["enrichment"], "Senior engineer");

        let jt = JOB_TITLE.to_string();
        let merged = merge_enrichment_values(&json!(null), [(&jt, &value)]);
        assert_eq!(merged["jobTitle"]["enrichment"], "Senior engineer");
    }

    #[test]
    fn defaults_follow_priority() {
        let attrs = json!({
            "bio": {"enrichment": "from enrichment", "github": "from github"},
            "location": {"twitter": "Berlin"},
        });
        let priorities = vec!["custom".to_string(), "github".to_string(), "enrichment".to_string()];
        let out = set_attribute_defaults(&attrs, &priorities);
        assert_eq!(out["bio"]["default"], "from github");
        assert_eq!(out["location"]["default"], "Berlin");
    }

    #[test]
    fn existing_default_is_ignored_as_candidate() {
        let attrs = json!({"bio": {"default": "stale", "enrichment": "fresh"}});
        let out = set_attribute_defaults(&attrs, &["enrichment".to_string()]);
        assert_eq!(out["bio"]["default"], "fresh");
    }
}
