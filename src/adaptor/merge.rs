//! Deep merge of caller supplied JSON over generated config messages.

use serde_json::Value;
use serde_json::map::Entry;

/// Merge `overlay` into `base` in place.
///
/// Keys missing from `base` are added. When both sides hold a value of a
/// different JSON type the overlay wins; arrays are appended; objects merge
/// recursively; other scalars are replaced.
pub fn merge_into(base: &mut Value, overlay: &Value) {
    let (Value::Object(base_map), Value::Object(overlay_map)) = (base, overlay) else {
        return;
    };
    for (key, value) in overlay_map {
        match base_map.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(value.clone());
            }
            Entry::Occupied(mut slot) => match (slot.get_mut(), value) {
                (Value::Array(items), Value::Array(extra)) => {
                    items.extend(extra.iter().cloned());
                }
                (existing, value) if existing.is_object() && value.is_object() => {
                    merge_into(existing, value);
                }
                (existing, value) => {
                    *existing = value.clone();
                }
            },
        }
    }
}

/// Apply an optional JSON text override to a computed config message.
///
/// Invalid JSON and non-object overrides are logged and ignored.
pub fn apply_custom_config(mut base: Value, custom: Option<&str>) -> Value {
    let Some(text) = custom.map(str::trim).filter(|t| !t.is_empty()) else {
        return base;
    };
    match serde_json::from_str::<Value>(text) {
        Ok(overlay @ Value::Object(_)) => {
            merge_into(&mut base, &overlay);
        }
        Ok(other) => {
            log::warn!("Ignoring custom config that is not an object: {}", other);
        }
        Err(e) => {
            log::warn!("Ignoring invalid custom config JSON: {}", e);
        }
    }
    base
}
