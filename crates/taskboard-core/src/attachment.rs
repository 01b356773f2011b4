use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::CoreError;

/// Largest file accepted for upload (10 MiB).
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

/// File metadata stored inline on a task row. Insertion order is upload order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
    pub url: String,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(name: &str, content_type: &str, size: u64, url: String, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_attachment_id(now),
            name: name.to_string(),
            content_type: content_type.to_string(),
            size,
            url,
            created_at: now,
        }
    }
}

/// Client-side id: millisecond timestamp plus a short random suffix.
/// Collisions are unlikely but not ruled out.
pub fn generate_attachment_id(now: DateTime<Utc>) -> String {
    format!("{}-{}", now.timestamp_millis(), random_token(9))
}

/// Lowercase alphanumeric token used for ids and storage keys.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// Decode the `attachments` column of a task row.
///
/// Accepts a JSON array, a string holding a JSON array (text columns), or null.
pub fn decode_attachment_list(value: &Value) -> Result<Vec<Attachment>, CoreError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => serde_json::from_value(value.clone())
            .map_err(|e| CoreError::Decode(format!("attachments: {e}"))),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::String(s) => serde_json::from_str(s)
            .map_err(|e| CoreError::Decode(format!("attachments text: {e}"))),
        other => Err(CoreError::Decode(format!(
            "attachments: expected array, got {other}"
        ))),
    }
}

pub(crate) fn deserialize_attachments<'de, D>(deserializer: D) -> Result<Vec<Attachment>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    decode_attachment_list(&value).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> Attachment {
        Attachment::new(
            "notes.txt",
            "text/plain",
            12,
            "https://example.test/a".into(),
            Utc::now(),
        )
    }

    #[test]
    fn generated_id_has_timestamp_prefix() {
        let now = Utc::now();
        let id = generate_attachment_id(now);
        let (ts, suffix) = id.split_once('-').unwrap();
        assert_eq!(ts, now.timestamp_millis().to_string());
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn wire_format_uses_type_and_camel_created_at() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["type"], "text/plain");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("content_type").is_none());
    }

    #[test]
    fn decode_accepts_array_text_and_null() {
        let att = sample();
        let array = json!([att.clone()]);
        assert_eq!(decode_attachment_list(&array).unwrap(), vec![att.clone()]);

        let text = Value::String(serde_json::to_string(&vec![att.clone()]).unwrap());
        assert_eq!(decode_attachment_list(&text).unwrap(), vec![att]);

        assert!(decode_attachment_list(&Value::Null).unwrap().is_empty());
        assert!(decode_attachment_list(&json!("")).unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_other_shapes() {
        let err = decode_attachment_list(&json!({"id": "x"})).unwrap_err();
        assert!(matches!(err, CoreError::Decode(_)));
    }
}
