use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Vendors send `null` where an empty list is meant.
pub(crate) fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Decode a cached payload, logging rows that no longer match the vendor shape.
pub(crate) fn decode<T: DeserializeOwned>(raw: &Value, what: &str) -> Option<T> {
    match serde_json::from_value(raw.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(payload = what, error = %e, "Failed to decode cached vendor payload");
            None
        }
    }
}

/// String form of an id that may arrive as a number or a string.
pub(crate) fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
