use crate::config::ScraperConfig;
use crate::pool::ProxyEndpoint;
use crate::prompt::PromptBuilder;
use crate::scraper::PageScraper;
use crate::{error_chain, Result, ScraperError};
use async_trait::async_trait;
use reqwest::{Client, Proxy, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Proxy failures the engine can identify from the transport error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyFailure {
    /// The request through the proxy timed out.
    Timeout,
    /// The connection to the proxy itself could not be established.
    ConnectFailed,
    /// The proxy refused to open a tunnel to the target.
    TunnelFailed,
    /// The proxy demanded credentials (HTTP 407).
    AuthRequired,
    /// The endpoint is not a usable proxy URL.
    Malformed,
}

impl fmt::Display for ProxyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::ConnectFailed => "proxy connection failed",
            Self::TunnelFailed => "tunnel connection failed",
            Self::AuthRequired => "proxy authentication required",
            Self::Malformed => "malformed proxy",
        };
        f.write_str(label)
    }
}

/// Why a single extraction call failed.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A failure known to come from the proxy.
    #[error("proxy failure ({kind}): {message}")]
    Proxy { kind: ProxyFailure, message: String },
    /// A network-layer failure only described by its text.
    #[error("network failure: {0}")]
    Network(String),
    /// Anything else, e.g. the model endpoint being down.
    #[error("{0}")]
    Other(String),
}

impl From<EngineError> for ScraperError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Other(message) => ScraperError::Unexpected(message),
            proxy_layer => ScraperError::ProxyFault(proxy_layer.to_string()),
        }
    }
}

/// The engine that fetches a page through a proxy and turns it into structured JSON.
#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    /// Extracts `url` through `proxy` (or directly when `None`).
    ///
    /// # Returns
    ///
    /// The raw extracted text, expected to be JSON following `schema`.
    async fn extract(
        &self,
        url: &str,
        proxy: Option<&ProxyEndpoint>,
        schema: &Value,
        instruction: &str,
    ) -> std::result::Result<String, EngineError>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// The `LlmExtractor` struct fetches pages through a proxy and asks an
/// Ollama-compatible model to extract the article.
#[derive(Debug)]
pub struct LlmExtractor {
    /// Client for the model endpoint; model calls never go through the pool.
    llm_client: Client,
    scraper: PageScraper,
    user_agent: String,
    page_timeout: Duration,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_page_chars: usize,
}

impl LlmExtractor {
    /// Creates a new `LlmExtractor` with the given configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `LlmExtractor` instance, or an error if the client could not be created.
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let llm = &config.llm_config;
        let llm_client = Client::builder()
            .timeout(Duration::from_secs(llm.request_timeout_secs))
            .build()
            .map_err(ScraperError::RequestError)?;

        Ok(Self {
            llm_client,
            scraper: PageScraper::default(),
            user_agent: config.user_agent.clone(),
            page_timeout: Duration::from_secs(llm.page_timeout_secs),
            endpoint: llm.endpoint.clone(),
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            max_page_chars: llm.max_page_chars,
        })
    }

    /// Builds a client that routes both HTTP and HTTPS traffic through `proxy`.
    fn page_client(&self, proxy: Option<&ProxyEndpoint>) -> std::result::Result<Client, EngineError> {
        let builder = Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.page_timeout)
            .danger_accept_invalid_certs(true)
            .gzip(true);

        let builder = match proxy {
            Some(proxy) => builder.proxy(Proxy::all(proxy.as_str()).map_err(|e| {
                EngineError::Proxy {
                    kind: ProxyFailure::Malformed,
                    message: error_chain(&e),
                }
            })?),
            None => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|e| EngineError::Other(format!("cannot build page client: {}", error_chain(&e))))
    }

    #[instrument(skip(self, proxy), fields(proxy = proxy.map(|p| p.as_str()).unwrap_or("none")))]
    async fn fetch_page(
        &self,
        url: &str,
        proxy: Option<&ProxyEndpoint>,
    ) -> std::result::Result<String, EngineError> {
        let client = self.page_client(proxy)?;

        let response = client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await
            .map_err(|e| classify_transport_error(e, proxy.is_some()))?;

        let status = response.status();
        debug!("Page response status: {}", status);

        if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err(EngineError::Proxy {
                kind: ProxyFailure::AuthRequired,
                message: format!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(EngineError::Network(format!("page returned HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| classify_transport_error(e, proxy.is_some()))
    }

    async fn generate(&self, prompt: String, schema: &Value) -> std::result::Result<String, EngineError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": schema,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });

        let response = self
            .llm_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Other(format!("LLM request failed: {}", error_chain(&e))))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Other(format!(
                "LLM endpoint returned HTTP {}: {}",
                status,
                crate::summarize(&text, crate::ATTEMPT_ERROR_SUMMARY_LEN)
            )));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Other(format!("LLM response unreadable: {}", error_chain(&e))))?;

        Ok(generated.response)
    }
}

#[async_trait]
impl ExtractionEngine for LlmExtractor {
    async fn extract(
        &self,
        url: &str,
        proxy: Option<&ProxyEndpoint>,
        schema: &Value,
        instruction: &str,
    ) -> std::result::Result<String, EngineError> {
        let html = self.fetch_page(url, proxy).await?;
        let page = self.scraper.digest(&html);
        debug!(chars = page.text.len(), images = page.images.len(), "Digested page");

        let prompt = PromptBuilder::new(instruction)
            .with_schema(schema)
            .with_page(url, page)
            .with_max_chars(self.max_page_chars)
            .build();

        self.generate(prompt, schema).await
    }
}

/// Maps a transport error on the page fetch to an `EngineError`.
///
/// Timeouts are reported structurally, and so is a failed connect when a proxy is set,
/// since the only connection opened is the one to the proxy. reqwest only describes a
/// refused CONNECT in its message, so that one is recognized by text. Everything else
/// keeps its text so the pipeline can look for proxy signatures in it. The target URL
/// is stripped first so it can never match a signature.
fn classify_transport_error(err: reqwest::Error, via_proxy: bool) -> EngineError {
    let err = err.without_url();
    let message = error_chain(&err);
    if err.is_timeout() {
        EngineError::Proxy {
            kind: ProxyFailure::Timeout,
            message,
        }
    } else if via_proxy && err.is_connect() {
        EngineError::Proxy {
            kind: ProxyFailure::ConnectFailed,
            message,
        }
    } else if message.contains("unsuccessful tunnel") {
        EngineError::Proxy {
            kind: ProxyFailure::TunnelFailed,
            message,
        }
    } else {
        EngineError::Network(message)
    }
}
