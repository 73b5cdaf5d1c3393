use std::time::Duration;
use thiserror::Error;

pub mod article;
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod pool;
pub mod prompt;
pub mod scraper;
pub mod sources;
pub mod store;
pub mod types;
pub mod validator;

// Re-export commonly used types
pub use article::{Article, ArticleRecord};
pub use crate::config::ScraperConfig;
pub use engine::{EngineError, ExtractionEngine, LlmExtractor};
pub use pipeline::RetryPipeline;
pub use pool::{ProxyEndpoint, ProxyPool};
pub use types::{AttemptOutcome, AttemptRecord, ExtractionResult, ValidationResult};
pub use validator::ProxyValidator;

/// The `ScraperError` enum represents the errors that can occur while validating proxies
/// and extracting articles through them.
#[derive(Error, Debug)]
pub enum ScraperError {
    /// A proxy string that cannot be turned into an endpoint.
    #[error("Invalid proxy endpoint: {0:?}")]
    InvalidEndpoint(String),
    /// A failure attributable to the proxy or the network path through it.
    #[error("Proxy fault: {0}")]
    ProxyFault(String),
    /// The network layer succeeded but the extracted payload is unusable.
    #[error("Data validation failed: {0}")]
    DataFault(String),
    /// Anything that fits none of the other categories.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
    /// Represents an error that occurs during an HTTP request.
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Represents a filesystem error while reading candidates or writing artifacts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Represents a JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Represents an error while loading layered configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

/// A type alias for `Result` with the `ScraperError` error type.
pub type Result<T> = std::result::Result<T, ScraperError>;

/// Renders an error together with its `source()` chain, joined by `": "`.
///
/// `reqwest` keeps the interesting part of a proxy failure (tunnel refusal,
/// connect timeout) in the source chain, not in the top-level message.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let inner_text = inner.to_string();
        if !text.contains(&inner_text) {
            text.push_str(": ");
            text.push_str(&inner_text);
        }
        source = inner.source();
    }
    text
}

/// Shortens an error message for console output: first line only, at most `max_chars` characters.
pub fn summarize(message: &str, max_chars: usize) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= max_chars {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

// Constants

/// The default per-probe timeout used by the proxy validator.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// The default number of proxy checks in flight at once.
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 30;
/// The default maximum number of extraction attempts per run.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// The default endpoint probed through each candidate proxy.
pub const DEFAULT_TEST_URL: &str = "http://httpbin.org/ip";
/// Where the validator writes the confirmed-live proxies.
pub const DEFAULT_VALID_PROXY_FILE: &str = "valid_proxies.txt";
/// Length of error summaries in per-proxy report lines.
pub const PROBE_ERROR_SUMMARY_LEN: usize = 30;
/// Length of error summaries in per-attempt and final report lines.
pub const ATTEMPT_ERROR_SUMMARY_LEN: usize = 200;
