use crate::article::{
    article_schema, validate_payload, ArticleMetadata, ArticleRecord, EXTRACTION_INSTRUCTION,
};
use crate::engine::{EngineError, ExtractionEngine};
use crate::pool::{ProxyEndpoint, ProxyPool};
use crate::store::ArticleSink;
use crate::types::{AttemptOutcome, AttemptRecord, ExtractionResult};
use crate::{summarize, ScraperError, ATTEMPT_ERROR_SUMMARY_LEN};
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Lowercase fragments that mark a free-text network error as the proxy's fault.
pub const PROXY_FAULT_SIGNATURES: &[&str] = &[
    "err_timed_out",
    "timed out",
    "timeout",
    "err_tunnel_connection_failed",
    "tunnel connection failed",
    "unsuccessful tunnel",
    "proxy",
];

/// Whether `message` contains one of the [`PROXY_FAULT_SIGNATURES`].
pub fn matches_proxy_signature(message: &str) -> bool {
    let message = message.to_lowercase();
    PROXY_FAULT_SIGNATURES
        .iter()
        .any(|signature| message.contains(signature))
}

/// Maps an engine failure to its attempt outcome and whether the proxy should be evicted.
///
/// Only strong evidence evicts: a structured proxy failure, or a network error whose
/// text matches a proxy signature. Other network errors still count as proxy faults.
pub fn classify(err: &EngineError) -> (AttemptOutcome, bool) {
    match err {
        EngineError::Proxy { .. } => (AttemptOutcome::ProxyFault, true),
        EngineError::Network(message) => {
            (AttemptOutcome::ProxyFault, matches_proxy_signature(message))
        }
        EngineError::Other(_) => (AttemptOutcome::Unexpected, false),
    }
}

enum State {
    Pending,
    Attempting { attempt: u32 },
    Retry { attempt: u32 },
    Success { record: ArticleRecord, saved_to: PathBuf },
    Exhausted,
}

/// The `RetryPipeline` struct drives repeated extraction attempts over a proxy pool.
///
/// Attempts run one after another. Each draws a fresh proxy, so a proxy evicted by one
/// attempt is never drawn again in the same run.
pub struct RetryPipeline<E, S> {
    engine: E,
    sink: S,
    schema: Value,
    instruction: String,
}

impl<E, S> RetryPipeline<E, S>
where
    E: ExtractionEngine,
    S: ArticleSink,
{
    /// Creates a pipeline that extracts with `engine` and persists successes to `sink`.
    pub fn new(engine: E, sink: S) -> Self {
        Self {
            engine,
            sink,
            schema: article_schema(),
            instruction: EXTRACTION_INSTRUCTION.to_string(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Extracts `url`, making at most `max_retries` attempts.
    ///
    /// Stops at the first success. Faulty proxies are evicted from `pool` along the way.
    /// Failures never escape: an exhausted run is reported as
    /// [`ExtractionResult::Exhausted`] carrying the last failed attempt.
    #[instrument(skip(self, pool), fields(pool_size = pool.len()))]
    pub async fn run(&self, url: &str, pool: &mut ProxyPool, max_retries: u32) -> ExtractionResult {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut state = State::Pending;

        loop {
            state = match state {
                State::Pending if max_retries == 0 => State::Exhausted,
                State::Pending => State::Attempting { attempt: 1 },
                State::Attempting { attempt } => {
                    let (record, success) = self.attempt(attempt, max_retries, url, pool).await;
                    attempts.push(record);
                    match success {
                        Some((record, saved_to)) => State::Success { record, saved_to },
                        None => State::Retry { attempt },
                    }
                }
                State::Retry { attempt } if attempt < max_retries => State::Attempting {
                    attempt: attempt + 1,
                },
                State::Retry { .. } => State::Exhausted,
                State::Success { record, saved_to } => {
                    return ExtractionResult::Success {
                        record,
                        saved_to,
                        attempts,
                    };
                }
                State::Exhausted => {
                    let last_failure = attempts.last().cloned();
                    warn!(
                        attempts = attempts.len(),
                        "Failed after {} attempts: {}",
                        max_retries,
                        last_failure
                            .as_ref()
                            .and_then(|a| a.error.as_deref())
                            .map(|e| summarize(e, ATTEMPT_ERROR_SUMMARY_LEN))
                            .unwrap_or_default()
                    );
                    return ExtractionResult::Exhausted {
                        last_failure,
                        attempts,
                    };
                }
            };
        }
    }

    /// Performs one attempt with a freshly drawn proxy.
    async fn attempt(
        &self,
        attempt: u32,
        max_retries: u32,
        url: &str,
        pool: &mut ProxyPool,
    ) -> (AttemptRecord, Option<(ArticleRecord, PathBuf)>) {
        let proxy = pool.draw();
        info!(
            attempt,
            max_retries,
            proxy = proxy.as_ref().map(ProxyEndpoint::as_str).unwrap_or("none"),
            "Attempting extraction"
        );

        let raw = match self
            .engine
            .extract(url, proxy.as_ref(), &self.schema, &self.instruction)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                let (outcome, strong_signal) = classify(&err);
                let evicted = match &proxy {
                    Some(proxy) if strong_signal => {
                        warn!(proxy = %proxy, "Removing faulty proxy");
                        pool.evict(proxy)
                    }
                    _ => false,
                };
                let error = ScraperError::from(err).to_string();
                return (failed(attempt, proxy, outcome, error, evicted), None);
            }
        };

        let article = match validate_payload(&raw) {
            Ok(article) => article,
            Err(err) => {
                return (
                    failed(attempt, proxy, AttemptOutcome::DataFault, err.to_string(), false),
                    None,
                );
            }
        };

        let record = ArticleRecord {
            metadata: ArticleMetadata {
                url: url.to_string(),
                extracted_at: Utc::now(),
                proxy_used: proxy
                    .as_ref()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            },
            article,
        };

        match self.sink.save(&record) {
            Ok(saved_to) => {
                info!(attempt, path = %saved_to.display(), "Extraction succeeded");
                let success = AttemptRecord {
                    attempt,
                    proxy,
                    outcome: AttemptOutcome::Success,
                    error: None,
                    evicted: false,
                };
                (success, Some((record, saved_to)))
            }
            Err(err) => (
                failed(
                    attempt,
                    proxy,
                    AttemptOutcome::Unexpected,
                    format!("could not persist article: {}", err),
                    false,
                ),
                None,
            ),
        }
    }
}

fn failed(
    attempt: u32,
    proxy: Option<ProxyEndpoint>,
    outcome: AttemptOutcome,
    error: String,
    evicted: bool,
) -> AttemptRecord {
    warn!(
        attempt,
        %outcome,
        evicted,
        "Attempt failed: {}",
        summarize(&error, ATTEMPT_ERROR_SUMMARY_LEN)
    );
    AttemptRecord {
        attempt,
        proxy,
        outcome,
        error: Some(error),
        evicted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ProxyFailure;

    #[test]
    fn test_signature_matching_is_case_insensitive() {
        assert!(matches_proxy_signature("net::ERR_TIMED_OUT at https://x"));
        assert!(matches_proxy_signature("net::ERR_TUNNEL_CONNECTION_FAILED"));
        assert!(matches_proxy_signature("Proxy connection refused"));
        assert!(!matches_proxy_signature("connection reset by peer"));
    }

    #[test]
    fn test_classify() {
        let structured = EngineError::Proxy {
            kind: ProxyFailure::Timeout,
            message: "deadline".to_string(),
        };
        assert_eq!(classify(&structured), (AttemptOutcome::ProxyFault, true));

        let signature = EngineError::Network("error sending request: unsuccessful tunnel".to_string());
        assert_eq!(classify(&signature), (AttemptOutcome::ProxyFault, true));

        let weak = EngineError::Network("page returned HTTP 503".to_string());
        assert_eq!(classify(&weak), (AttemptOutcome::ProxyFault, false));

        let other = EngineError::Other("LLM request failed".to_string());
        assert_eq!(classify(&other), (AttemptOutcome::Unexpected, false));
    }
}
