use crate::{Result, ScraperError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

/// Instruction handed to the extraction engine alongside [`article_schema`].
pub const EXTRACTION_INSTRUCTION: &str = "\
Extract structured article information as a SINGLE JSON OBJECT. Follow these rules:

1. Main content:
- title: the main article title
- publish_date: in ISO 8601 format (YYYY-MM-DD), omit if unknown
- content: full text with paragraphs preserved

2. Images (relevant image URLs only):
- url: direct image source URL
- description: based on alt text, caption, or surrounding context
- caption: exact caption text if present

3. Embeds from YouTube, Twitter, Instagram, TikTok or other platforms:
- platform: one of youtube, twitter, instagram, tiktok, other
- url: direct link to the original content
- embed_code: full iframe/embed code if available
- description: context from surrounding text explaining the embed

4. Formatting:
- Preserve original language and formatting
- Exclude ads, comments, and non-article content
- Maintain chronological order of content elements";

/// The JSON schema every extraction result must follow.
pub fn article_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "publish_date": { "type": "string", "format": "date" },
            "content": { "type": "string" },
            "images": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "url": { "type": "string", "format": "uri" },
                        "description": { "type": "string" },
                        "caption": { "type": "string" }
                    },
                    "required": ["url"]
                }
            },
            "embeds": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "platform": {
                            "type": "string",
                            "enum": ["youtube", "twitter", "instagram", "tiktok", "other"]
                        },
                        "url": { "type": "string", "format": "uri" },
                        "embed_code": { "type": "string" },
                        "description": { "type": "string" }
                    },
                    "required": ["platform", "url"]
                }
            }
        },
        "required": ["title", "content"]
    })
}

/// An extracted article. Absent `images`/`embeds` deserialize as empty lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<Image>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub platform: Platform,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Twitter,
    Instagram,
    Tiktok,
    #[serde(other)]
    Other,
}

/// Metadata stored next to every persisted article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub url: String,
    pub extracted_at: DateTime<Utc>,
    /// The proxy of the attempt that produced the article, or `"none"`.
    pub proxy_used: String,
}

/// The persisted form of a successful extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub metadata: ArticleMetadata,
    pub article: Article,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Validates the raw text returned by the extraction engine.
///
/// The text must be JSON. An array is reduced to its first element; anything that is
/// then not an object carrying string `title` and `content` fields is rejected.
///
/// # Errors
///
/// `ScraperError::DataFault` describing why the payload was rejected.
pub fn validate_payload(raw: &str) -> Result<Article> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ScraperError::DataFault(format!("payload is not valid JSON: {}", e)))?;

    let object = match value {
        Value::Object(_) => value,
        Value::Array(items) => match items.into_iter().next() {
            Some(first) => first,
            None => return Err(ScraperError::DataFault("Empty array received".to_string())),
        },
        Value::Bool(b) => {
            return Err(ScraperError::DataFault(format!(
                "Unexpected boolean response: {}",
                b
            )))
        }
        other => {
            return Err(ScraperError::DataFault(format!(
                "Unexpected data type: {}",
                json_type_name(&other)
            )))
        }
    };

    if !object.is_object() {
        return Err(ScraperError::DataFault(format!(
            "Unexpected element type: {}",
            json_type_name(&object)
        )));
    }

    serde_json::from_value(object)
        .map_err(|e| ScraperError::DataFault(format!("payload does not match schema: {}", e)))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_fault_message(raw: &str) -> String {
        match validate_payload(raw) {
            Err(ScraperError::DataFault(message)) => message,
            other => panic!("expected data fault, got {:?}", other),
        }
    }

    #[test]
    fn test_minimal_object_defaults_lists() {
        let article = validate_payload(r#"{"title":"T","content":"C"}"#).unwrap();
        assert_eq!(article.title, "T");
        assert_eq!(article.content, "C");
        assert!(article.publish_date.is_none());
        assert!(article.images.is_empty());
        assert!(article.embeds.is_empty());

        // serialized form carries explicit empty lists
        let value = serde_json::to_value(&article).unwrap();
        assert_eq!(value["images"], json!([]));
        assert_eq!(value["embeds"], json!([]));
    }

    #[test]
    fn test_null_lists_become_empty() {
        let article =
            validate_payload(r#"{"title":"T","content":"C","images":null,"embeds":null}"#).unwrap();
        assert!(article.images.is_empty());
        assert!(article.embeds.is_empty());
    }

    #[test]
    fn test_array_takes_first_element() {
        let article =
            validate_payload(r#"[{"title":"T","content":"C"},{"title":"X","content":"Y"}]"#)
                .unwrap();
        assert_eq!(article.title, "T");
    }

    #[test]
    fn test_empty_array_is_data_fault() {
        assert_eq!(data_fault_message("[]"), "Empty array received");
    }

    #[test]
    fn test_rejected_shapes() {
        assert!(data_fault_message("true").contains("boolean"));
        assert!(data_fault_message("42").contains("number"));
        assert!(data_fault_message(r#""text""#).contains("string"));
        assert!(data_fault_message("[1]").contains("number"));
        assert!(data_fault_message("not json").contains("not valid JSON"));
    }

    #[test]
    fn test_missing_required_fields() {
        assert!(data_fault_message(r#"{"title":"T"}"#).contains("content"));
        assert!(data_fault_message(r#"{"content":"C"}"#).contains("title"));
        assert!(data_fault_message(r#"{"title":1,"content":"C"}"#).contains("schema"));
    }

    #[test]
    fn test_full_article() {
        let raw = r#"{
            "title": "Launch",
            "publish_date": "2023-12-31",
            "content": "Body",
            "images": [{"url": "https://example.com/a.jpg", "caption": "A"}],
            "embeds": [
                {"platform": "youtube", "url": "https://youtube.com/watch?v=XYZ"},
                {"platform": "vimeo", "url": "https://vimeo.com/1"}
            ]
        }"#;

        let article = validate_payload(raw).unwrap();
        assert_eq!(article.publish_date.as_deref(), Some("2023-12-31"));
        assert_eq!(article.images[0].caption.as_deref(), Some("A"));
        assert_eq!(article.embeds[0].platform, Platform::Youtube);
        assert_eq!(article.embeds[1].platform, Platform::Other);
    }

    #[test]
    fn test_schema_requires_title_and_content() {
        let schema = article_schema();
        assert_eq!(schema["required"], json!(["title", "content"]));
        assert_eq!(schema["properties"]["embeds"]["items"]["required"], json!(["platform", "url"]));
    }
}
