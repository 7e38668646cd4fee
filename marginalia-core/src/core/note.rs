use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Boolean(bool),
}

/// A content-bearing note owned by one reader.
///
/// Notes exist independently of outlines; an outline only references them
/// through position rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub reader_id: String,
    pub body: String,
    pub metadata: HashMap<String, FieldValue>,
    pub attachments: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub modified_at: i64,
}

/// The caller-supplied content of a brand-new note.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    pub body: String,
    #[serde(default)]
    pub metadata: HashMap<String, FieldValue>,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NoteDraft {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Rejects drafts without any content.
    pub fn validate(&self) -> Result<(), String> {
        if self.body.trim().is_empty() {
            return Err("Note body must not be empty".to_string());
        }
        Ok(())
    }
}

/// Trims, lowercases, deduplicates and sorts a tag list.
pub fn normalise_tags(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut normalised: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    normalised.sort();
    normalised.dedup();
    normalised
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_rejects_blank_body() {
        assert!(NoteDraft::new("   ").validate().is_err());
        assert!(NoteDraft::new("").validate().is_err());
        assert!(NoteDraft::new("Chapter 2 recap").validate().is_ok());
    }

    #[test]
    fn test_draft_deserializes_with_defaults() {
        let draft: NoteDraft = serde_json::from_str(r#"{"body":"hi"}"#).unwrap();
        assert_eq!(draft.body, "hi");
        assert!(draft.tags.is_empty());
        assert!(draft.metadata.is_empty());
    }

    #[test]
    fn test_normalise_tags() {
        let tags = normalise_tags(vec!["  Rust ".into(), "RUST".into(), "design".into(), " ".into()]);
        assert_eq!(tags, vec!["design", "rust"]);
    }

    #[test]
    fn test_field_value_text() {
        let value = FieldValue::Text("Hello".to_string());
        match value {
            FieldValue::Text(s) => assert_eq!(s, "Hello"),
            _ => panic!("Wrong variant"),
        }
    }
}
