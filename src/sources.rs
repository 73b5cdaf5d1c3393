use crate::config::ScraperConfig;
use crate::{error_chain, summarize, Result, ScraperError};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

static IP_PORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}:\d{1,5}\b").unwrap());

/// How a source presents its proxy list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFormat {
    /// Any text; every `ip:port` occurrence counts.
    PlainText,
    /// An HTML table whose rows start with an IP cell followed by a port cell.
    HtmlTable { row_selector: String },
    /// An HTML page with the list inside a read-only `<textarea>`.
    HtmlTextarea,
    /// The geonode JSON API (`data[].ip`, `data[].port`, `data[].protocols`).
    GeonodeJson,
}

/// A website that publishes free proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSource {
    pub name: String,
    pub url: String,
    pub format: SourceFormat,
}

impl CandidateSource {
    pub fn new(name: &str, url: &str, format: SourceFormat) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            format,
        }
    }

    /// Extracts raw `ip:port` strings from a fetched body.
    pub fn parse(&self, body: &str) -> Result<Vec<String>> {
        match &self.format {
            SourceFormat::PlainText => Ok(parse_plain_text(body)),
            SourceFormat::HtmlTable { row_selector } => parse_html_table(body, row_selector),
            SourceFormat::HtmlTextarea => Ok(parse_html_textarea(body)),
            SourceFormat::GeonodeJson => parse_geonode(body),
        }
    }
}

/// The public proxy lists queried when no candidate file is given.
pub fn default_sources() -> Vec<CandidateSource> {
    let geonode = format!(
        "https://proxylist.geonode.com/api/proxy-list?protocols={}&limit=500&page=1&sort_by=lastChecked&sort_type=desc",
        urlencoding::encode("http,https")
    );

    vec![
        CandidateSource::new("spys.me", "https://spys.me/proxy.txt", SourceFormat::PlainText),
        CandidateSource::new(
            "free-proxy-list.net",
            "https://free-proxy-list.net/",
            SourceFormat::HtmlTable {
                row_selector: ".fpl-list .table tbody tr".to_string(),
            },
        ),
        CandidateSource::new("SSLProxies", "https://www.sslproxies.org/", SourceFormat::HtmlTextarea),
        CandidateSource::new("GeoNode", &geonode, SourceFormat::GeonodeJson),
        CandidateSource::new(
            "ProxyScrape",
            "https://api.proxyscrape.com/v3/free-proxy-list/get?request=displayproxies",
            SourceFormat::PlainText,
        ),
        CandidateSource::new(
            "HideMy",
            "https://hidemy.name/en/proxy-list/",
            SourceFormat::HtmlTable {
                row_selector: ".table_block table tr".to_string(),
            },
        ),
        CandidateSource::new("US-Proxy", "https://www.us-proxy.org/", SourceFormat::HtmlTextarea),
    ]
}

fn parse_plain_text(body: &str) -> Vec<String> {
    IP_PORT_REGEX
        .find_iter(body)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn parse_html_table(body: &str, row_selector: &str) -> Result<Vec<String>> {
    let rows = Selector::parse(row_selector)
        .map_err(|e| ScraperError::Unexpected(format!("bad row selector {:?}: {}", row_selector, e)))?;
    let cell = Selector::parse("td").expect("static selector");
    let document = Html::parse_document(body);

    Ok(document
        .select(&rows)
        .filter_map(|row| {
            let mut cells = row.select(&cell);
            let ip = cells.next()?.text().collect::<String>();
            let port = cells.next()?.text().collect::<String>();
            let candidate = format!("{}:{}", ip.trim(), port.trim());
            IP_PORT_REGEX.is_match(&candidate).then_some(candidate)
        })
        .collect())
}

fn parse_html_textarea(body: &str) -> Vec<String> {
    let textarea = Selector::parse("textarea[readonly]").expect("static selector");
    let document = Html::parse_document(body);

    document
        .select(&textarea)
        .next()
        .map(|element| {
            element
                .text()
                .collect::<String>()
                .lines()
                .map(str::trim)
                .filter(|line| IP_PORT_REGEX.is_match(line))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct GeonodeResponse {
    #[serde(default)]
    data: Vec<GeonodeProxy>,
}

#[derive(Debug, Deserialize)]
struct GeonodeProxy {
    ip: String,
    port: String,
    #[serde(default)]
    protocols: Vec<String>,
}

fn parse_geonode(body: &str) -> Result<Vec<String>> {
    let response: GeonodeResponse = serde_json::from_str(body)?;
    Ok(response
        .data
        .into_iter()
        .filter(|p| p.protocols.iter().any(|proto| proto == "http" || proto == "https"))
        .map(|p| format!("{}:{}", p.ip, p.port))
        .collect())
}

/// Candidates gathered from all sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Number of entries before de-duplication.
    pub total_scraped: usize,
    /// De-duplicated entries in first-seen order.
    pub unique: Vec<String>,
}

impl CollectionReport {
    /// Builds a report from raw entries, keeping the first occurrence of each.
    pub fn from_raw(raw: Vec<String>) -> Self {
        let total_scraped = raw.len();
        let mut seen = HashSet::new();
        let unique = raw
            .into_iter()
            .filter(|candidate| seen.insert(candidate.clone()))
            .collect();
        Self {
            total_scraped,
            unique,
        }
    }
}

/// The `CandidateCollector` struct gathers raw proxy candidates from public lists.
pub struct CandidateCollector {
    client: Client,
    /// Pause before each source, to stay polite.
    delay: Duration,
}

impl CandidateCollector {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.validator.source_timeout_secs))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            delay: Duration::from_millis(config.validator.source_delay_ms),
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fetches the sources one after another.
    ///
    /// A failing source is logged and contributes nothing; it never stops the others.
    #[instrument(skip(self, sources), fields(sources = sources.len()))]
    pub async fn collect(&self, sources: &[CandidateSource]) -> CollectionReport {
        let mut raw = Vec::new();

        for source in sources {
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }

            info!("Scraping {}...", source.name);
            match self.fetch(source).await {
                Ok(found) => {
                    info!(source = %source.name, "Found {} proxies", found.len());
                    raw.extend(found);
                }
                Err(e) => {
                    warn!(
                        source = %source.name,
                        "Failed to scrape: {}",
                        summarize(&error_chain(&e), 50)
                    );
                }
            }
        }

        let report = CollectionReport::from_raw(raw);
        info!(
            total = report.total_scraped,
            unique = report.unique.len(),
            "Collected proxy candidates"
        );
        report
    }

    async fn fetch(&self, source: &CandidateSource) -> Result<Vec<String>> {
        let body = self
            .client
            .get(&source.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        source.parse(&body)
    }
}
