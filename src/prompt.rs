use crate::scraper::PageDigest;
use serde_json::Value;

/// The `PromptBuilder` struct is responsible for constructing the extraction prompt.
/// It combines the instruction, the target schema and the digest of the fetched page.
pub struct PromptBuilder {
    /// The extraction instruction.
    instruction: String,
    /// The JSON schema the answer must follow.
    schema: Option<Value>,
    /// The page the article is extracted from.
    url: String,
    page: PageDigest,
    /// Upper bound on page text characters included in the prompt.
    max_chars: usize,
}

impl PromptBuilder {
    /// Creates a new `PromptBuilder` with the given instruction.
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            schema: None,
            url: String::new(),
            page: PageDigest::default(),
            max_chars: usize::MAX,
        }
    }

    pub fn with_schema(mut self, schema: &Value) -> Self {
        self.schema = Some(schema.clone());
        self
    }

    /// Adds the page the model should read.
    pub fn with_page(mut self, url: impl Into<String>, page: PageDigest) -> Self {
        self.url = url.into();
        self.page = page;
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    /// Builds the prompt string.
    ///
    /// # Returns
    ///
    /// The instruction, followed by the schema, then the page sections.
    pub fn build(&self) -> String {
        let mut prompt = self.instruction.trim().to_string();

        if let Some(schema) = &self.schema {
            prompt.push_str("\n\nRespond with JSON matching this schema:\n");
            prompt.push_str(&schema.to_string());
        }

        prompt.push_str(&format!("\n\nSource: {}\n", self.url));
        if let Some(title) = &self.page.title {
            prompt.push_str(&format!("Page title: {}\n", title));
        }

        if !self.page.images.is_empty() {
            prompt.push_str("Images:\n");
            for (src, alt) in &self.page.images {
                match alt {
                    Some(alt) => prompt.push_str(&format!("- {} ({})\n", src, alt)),
                    None => prompt.push_str(&format!("- {}\n", src)),
                }
            }
        }

        if !self.page.embeds.is_empty() {
            prompt.push_str("Embeds:\n");
            for src in &self.page.embeds {
                prompt.push_str(&format!("- {}\n", src));
            }
        }

        prompt.push_str("Content:\n");
        prompt.push_str(&truncate_chars(&self.page.text, self.max_chars));
        prompt.push_str("\n---\n");
        prompt
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Tests the `PromptBuilder` functionality.
    #[test]
    fn test_prompt_builder() {
        let page = PageDigest {
            title: Some("Page".to_string()),
            text: "Test content".to_string(),
            images: vec![("https://example.com/a.jpg".to_string(), Some("alt".to_string()))],
            embeds: vec!["https://youtube.com/embed/1".to_string()],
        };

        let prompt = PromptBuilder::new("Extract the article.")
            .with_schema(&json!({"type": "object"}))
            .with_page("https://example.com", page)
            .build();

        assert!(prompt.starts_with("Extract the article."));
        assert!(prompt.contains(r#"{"type":"object"}"#));
        assert!(prompt.contains("Source: https://example.com"));
        assert!(prompt.contains("- https://example.com/a.jpg (alt)"));
        assert!(prompt.contains("- https://youtube.com/embed/1"));
        assert!(prompt.contains("Test content"));
    }

    #[test]
    fn test_page_text_is_truncated() {
        let page = PageDigest {
            text: "äbcdef".to_string(),
            ..PageDigest::default()
        };

        let prompt = PromptBuilder::new("x")
            .with_page("https://example.com", page)
            .with_max_chars(3)
            .build();

        assert!(prompt.contains("Content:\näbc\n---"));
    }
}
