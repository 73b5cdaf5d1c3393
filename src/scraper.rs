use scraper::{ElementRef, Html, Selector};
use tracing::instrument;

/// The parts of a fetched page that the extraction model needs to see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageDigest {
    /// The document title, if any.
    pub title: Option<String>,
    /// Readable text of the main content, paragraphs separated by newlines.
    pub text: String,
    /// `(src, alt)` pairs of images found inside the content area.
    pub images: Vec<(String, Option<String>)>,
    /// Sources of embedded frames (videos, posts).
    pub embeds: Vec<String>,
}

/// The `PageScraper` struct reduces raw HTML to a [`PageDigest`].
/// It uses CSS selectors to find the main content area and the media inside it.
#[derive(Debug)]
pub struct PageScraper {
    /// Candidate selectors for the main content, most specific first.
    content_selectors: Vec<Selector>,
    title: Selector,
    images: Selector,
    embeds: Selector,
}

impl Default for PageScraper {
    /// Provides default values for the `PageScraper` struct.
    ///
    /// # Returns
    ///
    /// A `PageScraper` instance with selectors that suit typical article pages.
    fn default() -> Self {
        let default_selectors = [
            "article p, article li, article h2, article h3, article blockquote",
            "div.content p, div.content li",
            "main p, main li",
            "div.post-content p",
            "div.entry-content p",
            "p, li",
        ];

        Self::new(default_selectors)
    }
}

impl PageScraper {
    /// Creates a new `PageScraper` with the given content selectors.
    ///
    /// Selectors that fail to parse are ignored.
    pub fn new(content_selectors: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let content_selectors = content_selectors
            .into_iter()
            .filter_map(|s| Selector::parse(s.as_ref()).ok())
            .collect();

        Self {
            content_selectors,
            title: Selector::parse("title, h1").expect("static selector"),
            images: Selector::parse("img[src]").expect("static selector"),
            embeds: Selector::parse("iframe[src], blockquote.twitter-tweet a[href], blockquote.instagram-media[data-instgrm-permalink], blockquote.tiktok-embed[cite]")
                .expect("static selector"),
        }
    }

    /// Parses `html` and collects title, text, images and embeds.
    #[instrument(skip(self, html), fields(html_length = html.len()))]
    pub fn digest(&self, html: &str) -> PageDigest {
        let document = Html::parse_document(html);

        PageDigest {
            title: self.extract_title(&document),
            text: self.extract_text(&document),
            images: self.extract_images(&document),
            embeds: self.extract_embeds(&document),
        }
    }

    fn extract_title(&self, document: &Html) -> Option<String> {
        document
            .select(&self.title)
            .map(|element| clean_text(&element.text().collect::<Vec<_>>().join(" ")))
            .find(|title| !title.is_empty())
    }

    /// Uses the first content selector that yields any text.
    fn extract_text(&self, document: &Html) -> String {
        for selector in &self.content_selectors {
            let content = document
                .select(selector)
                .map(|element| clean_text(&element.text().collect::<Vec<_>>().join(" ")))
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");

            if !content.is_empty() {
                return content;
            }
        }

        String::new()
    }

    fn extract_images(&self, document: &Html) -> Vec<(String, Option<String>)> {
        let mut images: Vec<(String, Option<String>)> = Vec::new();
        for element in document.select(&self.images) {
            let Some(src) = element.value().attr("src") else {
                continue;
            };
            // tracking pixels and inline placeholders carry no content
            if src.starts_with("data:") || images.iter().any(|(seen, _)| seen == src) {
                continue;
            }
            let alt = element
                .value()
                .attr("alt")
                .map(clean_text)
                .filter(|alt| !alt.is_empty());
            images.push((src.to_string(), alt));
        }
        images
    }

    fn extract_embeds(&self, document: &Html) -> Vec<String> {
        let mut embeds: Vec<String> = Vec::new();
        for element in document.select(&self.embeds) {
            if let Some(src) = embed_source(&element) {
                if !embeds.iter().any(|seen| seen == src) {
                    embeds.push(src.to_string());
                }
            }
        }
        embeds
    }
}

fn embed_source<'a>(element: &ElementRef<'a>) -> Option<&'a str> {
    let value = element.value();
    value
        .attr("src")
        .or_else(|| value.attr("data-instgrm-permalink"))
        .or_else(|| value.attr("cite"))
        .or_else(|| value.attr("href"))
}

/// Collapses runs of whitespace into single spaces.
fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_digest() {
        let html = r#"
            <!DOCTYPE html>
            <html>
                <head><title>Test   Page</title></head>
                <body>
                    <nav><p>Menu</p></nav>
                    <article>
                        <h1>Test Article</h1>
                        <p>This is a test paragraph.</p>
                        <img src="https://example.com/a.jpg" alt=" A  photo ">
                        <img src="data:image/gif;base64,R0lGOD">
                        <p>This is another paragraph.</p>
                        <iframe src="https://www.youtube.com/embed/XYZ"></iframe>
                    </article>
                </body>
            </html>
        "#;

        let digest = PageScraper::default().digest(html);

        assert_eq!(digest.title.as_deref(), Some("Test Page"));
        assert_eq!(
            digest.text,
            "This is a test paragraph.\nThis is another paragraph."
        );
        assert_eq!(
            digest.images,
            vec![("https://example.com/a.jpg".to_string(), Some("A photo".to_string()))]
        );
        assert_eq!(digest.embeds, vec!["https://www.youtube.com/embed/XYZ".to_string()]);
    }

    #[test]
    fn test_custom_selectors() {
        let html = r#"
            <div class="custom-content">
                <span class="special">Special content</span>
            </div>
        "#;

        let digest = PageScraper::new([".custom-content .special"]).digest(html);
        assert_eq!(digest.text, "Special content");
    }

    #[test]
    fn test_empty_page() {
        let digest = PageScraper::default().digest("<html><body></body></html>");
        assert!(digest.text.is_empty());
        assert!(digest.title.is_none());
    }

    #[test]
    fn test_tweet_embed() {
        let html = r#"<blockquote class="twitter-tweet"><p>hi</p><a href="https://twitter.com/x/status/1">link</a></blockquote>"#;
        let digest = PageScraper::default().digest(html);
        assert_eq!(digest.embeds, vec!["https://twitter.com/x/status/1".to_string()]);
    }
}
