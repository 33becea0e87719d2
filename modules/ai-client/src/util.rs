/// Strip markdown code blocks from a response.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Parse a model response as JSON, tolerating code fences and leading prose.
///
/// Returns `None` when no JSON value can be recovered.
pub fn extract_json(response: &str) -> Option<serde_json::Value> {
    let stripped = strip_code_blocks(response);
    if let Ok(v) = serde_json::from_str(stripped) {
        return Some(v);
    }

    let start = stripped.find(['{', '['])?;
    let close = if stripped[start..].starts_with('{') { '}' } else { ']' };
    let end = stripped.rfind(close)?;
    if end < start {
        return None;
    }
    serde_json::from_str(&stripped[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("{}"), "{}");
    }

    #[test]
    fn extract_json_from_fenced_block() {
        let v = extract_json("```json\n{\"profileIndex\": 1}\n```").unwrap();
        assert_eq!(v["profileIndex"], 1);
    }

    #[test]
    fn extract_json_with_surrounding_prose() {
        let v = extract_json("Sure! Here it is: [{\"name\":\"Acme\"}] Hope that helps.").unwrap();
        assert_eq!(v[0]["name"], "Acme");
    }

    #[test]
    fn extract_json_gives_up_on_garbage() {
        assert!(extract_json("I could not decide.").is_none());
        assert!(extract_json("} nope {").is_none());
    }
}
