use crate::article::ArticleRecord;
use crate::pool::ProxyEndpoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// The outcome of probing one candidate proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub endpoint: ProxyEndpoint,
    /// Whether the probe returned HTTP 200 within the timeout.
    pub alive: bool,
    /// Time until the response arrived, for live proxies.
    pub latency: Option<Duration>,
    /// First line of the failure, for dead proxies.
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn alive(endpoint: ProxyEndpoint, latency: Duration) -> Self {
        Self {
            endpoint,
            alive: true,
            latency: Some(latency),
            error: None,
        }
    }

    pub fn dead(endpoint: ProxyEndpoint, error: impl Into<String>) -> Self {
        Self {
            endpoint,
            alive: false,
            latency: None,
            error: Some(error.into()),
        }
    }
}

/// How a single extraction attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    ProxyFault,
    DataFault,
    Unexpected,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::ProxyFault => "proxy_fault",
            Self::DataFault => "data_fault",
            Self::Unexpected => "unexpected",
        };
        f.write_str(label)
    }
}

/// One iteration of the retry pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt index.
    pub attempt: u32,
    /// The proxy used, or `None` for a direct connection.
    pub proxy: Option<ProxyEndpoint>,
    pub outcome: AttemptOutcome,
    /// Error text for failed attempts.
    pub error: Option<String>,
    /// Whether the proxy was removed from the pool after this attempt.
    pub evicted: bool,
}

/// The terminal value of a pipeline run. Always produced, never raised.
#[derive(Debug, Clone)]
pub enum ExtractionResult {
    Success {
        record: ArticleRecord,
        /// Where the record was persisted.
        saved_to: PathBuf,
        attempts: Vec<AttemptRecord>,
    },
    Exhausted {
        /// The last failed attempt, or `None` if no attempt was allowed.
        last_failure: Option<AttemptRecord>,
        attempts: Vec<AttemptRecord>,
    },
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Success { attempts, .. } | Self::Exhausted { attempts, .. } => attempts,
        }
    }

    /// Number of proxies removed from the pool during the run.
    pub fn evictions(&self) -> usize {
        self.attempts().iter().filter(|a| a.evicted).count()
    }

    /// The error carried by a failed run.
    pub fn last_error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Exhausted { last_failure, .. } => Some(
                last_failure
                    .as_ref()
                    .and_then(|record| record.error.as_deref())
                    .unwrap_or("no attempts were made"),
            ),
        }
    }
}
