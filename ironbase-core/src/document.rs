// ironbase-core/src/document.rs
// Schema-free JSON document with reserved `_id`/`_created_at`/`_updated_at`
// fields and dot-path field access.

use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter combined with wall-clock millis to generate a
/// collision-free, lexicographically-sortable 16-char hex doc id.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a 16-hex-char doc id derived from monotonic time + a counter.
///
/// Layout: 10 hex chars of millis-since-epoch (truncated to 40 bits, which
/// covers ~34 years from the epoch) followed by 6 hex chars of a
/// process-wide monotonic counter, so two ids minted within the same
/// millisecond still can't collide.
pub fn generate_doc_id() -> String {
    let millis = Utc::now().timestamp_millis() as u64 & 0xFF_FFFF_FFFF;
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFF_FFFF;
    format!("{:010x}{:06x}", millis, seq)
}

/// A schema-free document: a JSON object carrying the three reserved fields
/// plus arbitrary caller fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    value: Value,
}

impl Document {
    /// Wrap an existing JSON object, assumed to already carry `_id`.
    pub fn from_value(value: Value) -> Self {
        Document { value }
    }

    /// Stamp a freshly-inserted document with `_id`, `_created_at`,
    /// `_updated_at`. `data` must be a JSON object; non-object input is
    /// wrapped into an empty object (defensive; should not happen past the
    /// collection layer's own validation).
    pub fn new_inserted(mut data: Value, id: String) -> Self {
        if !data.is_object() {
            data = Value::Object(serde_json::Map::new());
        }
        let now = Utc::now().to_rfc3339();
        let obj = data.as_object_mut().unwrap();
        obj.insert("_id".to_string(), Value::String(id));
        obj.insert("_created_at".to_string(), Value::String(now.clone()));
        obj.insert("_updated_at".to_string(), Value::String(now));
        Document { value: data }
    }

    pub fn id(&self) -> &str {
        self.value
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.value)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Ok(Document { value })
    }

    /// Dot-path field read (`"address.city"`, `"items.0.name"`).
    pub fn get(&self, path: &str) -> Option<&Value> {
        crate::value_utils::get_nested_value(&self.value, path)
    }

    /// Overwrite fields from `patch` onto this document, refresh
    /// `_updated_at`, and return the set of top-level field names that
    /// changed (used to build the change-stream `UPDATE` event's
    /// updated-fields subset).
    pub fn apply_patch(&mut self, patch: &Value) -> Vec<String> {
        let mut changed = Vec::new();
        if let (Value::Object(target), Value::Object(source)) = (&mut self.value, patch) {
            for (k, v) in source {
                if k == "_id" || k == "_created_at" {
                    continue;
                }
                if target.get(k) != Some(v) {
                    changed.push(k.clone());
                }
                target.insert(k.clone(), v.clone());
            }
            target.insert(
                "_updated_at".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_ids_are_unique_and_16_chars() {
        let a = generate_doc_id();
        let b = generate_doc_id();
        assert_eq!(a.len(), 16);
        assert_eq!(b.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn new_inserted_stamps_reserved_fields() {
        let doc = Document::new_inserted(json!({"name": "Alice"}), "abc0000000000001".into());
        assert_eq!(doc.id(), "abc0000000000001");
        assert!(doc.get("_created_at").is_some());
        assert!(doc.get("_updated_at").is_some());
        assert_eq!(doc.get("name"), Some(&json!("Alice")));
    }

    #[test]
    fn apply_patch_preserves_created_at_and_reports_changed_fields() {
        let mut doc = Document::new_inserted(json!({"name": "Alice", "age": 30}), "id".into());
        let created_at = doc.get("_created_at").cloned().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(2));
        let changed = doc.apply_patch(&json!({"age": 31, "name": "Alice"}));

        assert_eq!(changed, vec!["age".to_string()]);
        assert_eq!(doc.get("_created_at"), Some(&created_at));
        assert_eq!(doc.get("age"), Some(&json!(31)));
    }

    #[test]
    fn dot_path_access() {
        let doc = Document::new_inserted(json!({"address": {"city": "NYC"}}), "id".into());
        assert_eq!(doc.get("address.city"), Some(&json!("NYC")));
    }
}
