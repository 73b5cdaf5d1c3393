use crate::config::ScraperConfig;
use crate::pool::ProxyEndpoint;
use crate::types::ValidationResult;
use crate::{error_chain, summarize, PROBE_ERROR_SUMMARY_LEN};
use futures::{stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, Proxy, StatusCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// The `ProxyValidator` struct checks candidate proxies for liveness.
///
/// Every candidate gets one GET to the test URL with the candidate set as both the
/// HTTP and HTTPS proxy. Only an HTTP 200 within the timeout counts as alive.
#[derive(Debug, Clone)]
pub struct ProxyValidator {
    /// The URL requested through each candidate.
    test_url: String,
    /// Hard upper bound for a single check.
    timeout: Duration,
    /// Number of checks in flight at once.
    concurrency: usize,
    user_agent: String,
    show_progress: bool,
}

impl ProxyValidator {
    /// Creates a new `ProxyValidator`.
    ///
    /// # Arguments
    ///
    /// * `test_url` - The URL requested through each candidate.
    /// * `timeout` - Upper bound for a single check.
    /// * `concurrency` - Number of checks in flight at once; `0` is treated as `1`.
    pub fn new(test_url: impl Into<String>, timeout: Duration, concurrency: usize) -> Self {
        Self {
            test_url: test_url.into(),
            timeout,
            concurrency: concurrency.max(1),
            user_agent: ScraperConfig::default().user_agent,
            show_progress: false,
        }
    }

    /// Creates a validator from the application configuration, with a progress bar.
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self::new(
            config.validator.test_url.clone(),
            config.timeout(),
            config.concurrent_requests,
        )
        .with_user_agent(config.user_agent.clone())
        .with_progress(true)
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Shows an `indicatif` progress bar while validating.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Checks every candidate and returns one result per candidate, in completion order.
    ///
    /// A failing check never aborts the sweep. An empty input yields an empty output.
    #[instrument(skip(self, candidates), fields(candidates = candidates.len(), concurrency = self.concurrency))]
    pub async fn validate(&self, candidates: &[ProxyEndpoint]) -> Vec<ValidationResult> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let progress = self.progress_bar(candidates.len());
        let checked = AtomicUsize::new(0);

        let results = stream::iter(candidates.iter().cloned())
            .map(|endpoint| {
                let progress = &progress;
                let checked = &checked;
                async move {
                    let result = self.check(endpoint).await;
                    let done = checked.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.set_position(done as u64);
                    result
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let alive = results.iter().filter(|r| r.alive).count();
        progress.finish_with_message(format!(
            "Completed: {} of {} proxies alive",
            alive,
            results.len()
        ));
        results
    }

    /// Runs one probe under the hard timeout and reports its outcome.
    async fn check(&self, endpoint: ProxyEndpoint) -> ValidationResult {
        let started = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.probe(&endpoint)).await {
            Ok(Ok(status)) if status == StatusCode::OK => {
                ValidationResult::alive(endpoint, started.elapsed())
            }
            Ok(Ok(status)) => ValidationResult::dead(endpoint, format!("HTTP {}", status.as_u16())),
            Ok(Err(e)) => {
                let chain = error_chain(&e);
                let first_line = chain.lines().next().unwrap_or_default().to_string();
                ValidationResult::dead(endpoint, first_line)
            }
            Err(_) => ValidationResult::dead(endpoint, "probe timed out"),
        };

        report(&result);
        result
    }

    /// One GET through `endpoint`. Bounded only by the hard timeout in [`Self::check`].
    async fn probe(&self, endpoint: &ProxyEndpoint) -> reqwest::Result<StatusCode> {
        let client = Client::builder()
            .proxy(Proxy::all(endpoint.as_str())?)
            .user_agent(&self.user_agent)
            .build()?;

        let response = client.get(&self.test_url).send().await?;
        Ok(response.status())
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new(total as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} proxies checked {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        progress
    }
}

/// Logs one finished check.
fn report(result: &ValidationResult) {
    let address = result.endpoint.address();
    match (&result.latency, &result.error) {
        (Some(latency), _) if result.alive => {
            info!("{:<21} | Latency: {:.2}s | Valid", address, latency.as_secs_f64());
        }
        (_, Some(error)) if error.starts_with("HTTP ") => {
            debug!("{:<21} | {} | Invalid", address, error);
        }
        (_, error) => {
            // the innermost cause is the informative part of a transport error
            let cause = error
                .as_deref()
                .and_then(|e| e.rsplit(": ").next())
                .unwrap_or("unknown error");
            debug!(
                "{:<21} | {:<30} | Error",
                address,
                summarize(cause, PROBE_ERROR_SUMMARY_LEN)
            );
        }
    }
}

/// Checks `candidates` against `test_url` without a progress bar.
pub async fn validate(
    candidates: &[ProxyEndpoint],
    test_url: &str,
    timeout: Duration,
    concurrency: usize,
) -> Vec<ValidationResult> {
    ProxyValidator::new(test_url, timeout, concurrency)
        .validate(candidates)
        .await
}

/// Totals of one collection and validation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    /// Candidates gathered before de-duplication.
    pub total_scraped: usize,
    pub unique: usize,
    pub valid: usize,
    pub invalid: usize,
}

impl SweepSummary {
    pub fn new(total_scraped: usize, results: &[ValidationResult]) -> Self {
        let valid = results.iter().filter(|r| r.alive).count();
        Self {
            total_scraped,
            unique: results.len(),
            valid,
            invalid: results.len() - valid,
        }
    }

    /// Share of live proxies in percent, `0.0` for an empty sweep.
    pub fn success_rate(&self) -> f64 {
        if self.unique == 0 {
            0.0
        } else {
            self.valid as f64 / self.unique as f64 * 100.0
        }
    }
}
