//! Table-driven extraction of member attributes from raw vendor payloads.
//!
//! Each source declares a list of [`AttributeSetting`]s. For every setting the
//! field paths are tried in order; the first present value (optionally passed
//! through `transform`) becomes `attributes[name][platform]`.

use serde_json::Value;

use enrichment_common::NormalizedEnrichmentData;

pub type Transform = fn(&Value) -> Option<Value>;

#[derive(Debug, Clone, Copy)]
pub struct AttributeSetting {
    pub name: &'static str,
    /// Dotted paths with optional array indices, e.g. `work_experiences[0].title`.
    pub fields: &'static [&'static str],
    pub transform: Option<Transform>,
}

impl AttributeSetting {
    pub const fn plain(name: &'static str, fields: &'static [&'static str]) -> Self {
        Self {
            name,
            fields,
            transform: None,
        }
    }

    pub const fn with(
        name: &'static str,
        fields: &'static [&'static str],
        transform: Transform,
    ) -> Self {
        Self {
            name,
            fields,
            transform: Some(transform),
        }
    }
}

/// Resolve a path like `a.b[0].c` against a JSON value.
pub fn resolve_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        let (key, indices) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for idx in indices.split('[').filter(|s| !s.is_empty()) {
            let i: usize = idx.trim_end_matches(']').parse().ok()?;
            current = current.get(i)?;
        }
    }
    Some(current)
}

/// Whether a vendor value counts as present.
pub fn is_present(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn normalize_attributes(
    data: &Value,
    settings: &[AttributeSetting],
    platform: &str,
    out: &mut NormalizedEnrichmentData,
) {
    for setting in settings {
        let found = setting
            .fields
            .iter()
            .filter_map(|f| resolve_path(data, f))
            .find(|v| is_present(v));

        let Some(value) = found else { continue };

        let value = match setting.transform {
            Some(t) => match t(value) {
                Some(v) => v,
                None => continue,
            },
            None => value.clone(),
        };

        out.set_attribute(setting.name, platform, value);
    }
}

// ---------------------------------------------------------------------------
// Common transforms
// ---------------------------------------------------------------------------

/// Sort a list of strings. Non-string items are dropped.
pub fn sorted_strings(v: &Value) -> Option<Value> {
    let mut items: Vec<String> = v
        .as_array()?
        .iter()
        .filter_map(|s| s.as_str().map(str::to_string))
        .collect();
    items.sort();
    Some(Value::from(items))
}

/// Accept either a list or a comma separated string, trimmed, non-empty and sorted.
pub fn comma_list_sorted(v: &Value) -> Option<Value> {
    let raw: Vec<String> = match v {
        Value::Array(items) => items
            .iter()
            .filter_map(|s| s.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => return Some(Value::Array(vec![])),
    };
    let mut items: Vec<String> = raw
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    items.sort();
    Some(Value::from(items))
}
