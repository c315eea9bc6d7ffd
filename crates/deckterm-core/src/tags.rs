//! Tag list serialization: `key1:value1,key2:value2`.
//!
//! Keys and values are not escaped. A `:` in a key or a `,` anywhere does not
//! survive a round trip.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

pub fn serialize_tags(tags: &[Tag]) -> String {
    tags.iter()
        .map(|t| format!("{}:{}", t.key, t.value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a serialized tag list. An entry without `:` becomes a tag with an
/// empty value; the value keeps everything after the first `:`.
pub fn parse_tags(s: &str) -> Vec<Tag> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split(',')
        .map(|entry| match entry.split_once(':') {
            Some((key, value)) => Tag::new(key, value),
            None => Tag::new(entry, ""),
        })
        .collect()
}
