use anyhow::Context;
use clap::{Parser, Subcommand};
use proxied_extract::{
    config::ScraperConfig,
    pool::{ProxyEndpoint, ProxyPool},
    sources::{default_sources, CandidateCollector, CollectionReport},
    store::{write_proxy_list, JsonFileSink},
    summarize,
    types::ExtractionResult,
    validator::{ProxyValidator, SweepSummary},
    LlmExtractor, RetryPipeline, ATTEMPT_ERROR_SUMMARY_LEN,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "proxied-extract", version, about = "Article extraction through rotating proxies")]
struct Cli {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract an article, retrying through the proxy pool
    Extract {
        /// URL to extract content from
        #[arg(long)]
        url: String,
        /// File with HTTP proxies (ip:port), one per line
        #[arg(long)]
        proxy_file: Option<PathBuf>,
        /// Max extraction attempts
        #[arg(long)]
        retries: Option<u32>,
    },
    /// Collect free proxies, check them and save the live ones
    CheckProxies {
        /// Read candidates from this file instead of the public lists
        #[arg(long)]
        input: Option<PathBuf>,
        /// Where to write the live proxies
        #[arg(long)]
        output: Option<PathBuf>,
        /// Checks in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// Per-check timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// URL requested through each proxy
        #[arg(long)]
        test_url: Option<String>,
    },
}

/// The main entry point of the application.
///
/// Initializes logging, loads the layered configuration and dispatches to the subcommand.
/// Extraction failures are reported as output, not as a failing exit status.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config =
        ScraperConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Extract {
            url,
            proxy_file,
            retries,
        } => {
            if let Some(retries) = retries {
                config.max_retries = retries;
            }
            extract(config, url, proxy_file).await
        }
        Command::CheckProxies {
            input,
            output,
            concurrency,
            timeout,
            test_url,
        } => {
            if let Some(output) = output {
                config.validator.output_file = output.to_string_lossy().into_owned();
            }
            if let Some(concurrency) = concurrency {
                config.concurrent_requests = concurrency;
            }
            if let Some(timeout) = timeout {
                config.timeout_secs = timeout;
            }
            if let Some(test_url) = test_url {
                config.validator.test_url = test_url;
            }
            check_proxies(config, input).await
        }
    }
}

async fn extract(config: ScraperConfig, url: String, proxy_file: Option<PathBuf>) -> anyhow::Result<()> {
    println!("\n=== Article Scraper ===");
    println!("Target URL: {}", url);
    println!("Max retries: {}", config.max_retries);
    println!(
        "Proxy file: {}\n",
        proxy_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );

    let (mut pool, engine) = match prepare(&config, proxy_file.as_deref()) {
        Ok(prepared) => prepared,
        Err(e) => {
            println!("\n=== Extraction Failed ===");
            println!("Error: {:#}", e);
            return Ok(());
        }
    };

    let sink = JsonFileSink::new(&config.articles_dir);
    info!("Articles will be saved under {}", sink.dir().display());
    let pipeline = RetryPipeline::new(engine, sink);

    let start_time = Instant::now();
    let result = pipeline.run(&url, &mut pool, config.max_retries).await;
    let elapsed = start_time.elapsed();

    match &result {
        ExtractionResult::Success {
            record, saved_to, ..
        } => {
            let article = &record.article;
            println!("\n=== Successful Extraction ===");
            println!("Title: {}", article.title);
            println!(
                "Date: {}",
                article.publish_date.as_deref().unwrap_or("Unknown")
            );
            println!("Content Preview: {}", summarize(&article.content, 200));
            println!("Images Found: {}", article.images.len());
            println!("Embeds Found: {}", article.embeds.len());
            println!("Proxy used: {}", record.metadata.proxy_used);
            println!("Saved to: {}", saved_to.display());
        }
        ExtractionResult::Exhausted { .. } => {
            println!("\n=== Extraction Failed ===");
            println!(
                "Error: {}",
                summarize(
                    result.last_error().unwrap_or_default(),
                    ATTEMPT_ERROR_SUMMARY_LEN
                )
            );
        }
    }

    println!("Attempts: {}", result.attempts().len());
    println!("Proxies evicted: {} ({} left)", result.evictions(), pool.len());
    println!("Processing time: {:.2?}", elapsed);
    Ok(())
}

/// Loads the proxy pool and builds the extractor.
///
/// A missing proxy file only means running without proxies; an unreadable one is an error.
fn prepare(config: &ScraperConfig, proxy_file: Option<&Path>) -> anyhow::Result<(ProxyPool, LlmExtractor)> {
    let pool = match proxy_file {
        Some(path) if path.exists() => ProxyPool::from_file(path)
            .with_context(|| format!("failed to read proxy file {}", path.display()))?,
        Some(path) => {
            error!("Proxy file {} not found, continuing without proxies", path.display());
            ProxyPool::new()
        }
        None => ProxyPool::new(),
    };

    let engine = LlmExtractor::new(config).context("failed to build the extractor")?;
    Ok((pool, engine))
}

async fn check_proxies(config: ScraperConfig, input: Option<PathBuf>) -> anyhow::Result<()> {
    println!("\n=== Proxy Scraper & Checker ===");

    let report = match &input {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            CollectionReport::from_raw(
                text.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        }
        None => {
            CandidateCollector::new(&config)?
                .collect(&default_sources())
                .await
        }
    };

    let candidates: Vec<ProxyEndpoint> = report
        .unique
        .iter()
        .filter_map(|raw| ProxyEndpoint::normalize(raw).ok())
        .collect();

    if candidates.is_empty() {
        println!("No proxies found. Exiting...");
        return Ok(());
    }
    info!("Total unique proxies found: {}", candidates.len());

    let start_time = Instant::now();
    let results = ProxyValidator::from_config(&config)
        .validate(&candidates)
        .await;

    let live: Vec<&ProxyEndpoint> = results
        .iter()
        .filter(|r| r.alive)
        .map(|r| &r.endpoint)
        .collect();
    write_proxy_list(&config.validator.output_file, live)?;

    let summary = SweepSummary::new(report.total_scraped, &results);
    println!("\n{}", "━".repeat(50));
    println!("Final Summary:");
    println!("   Total scraped proxies:  {}", summary.total_scraped);
    println!("   Unique proxies:         {}", summary.unique);
    println!("   Invalid proxies:        {}", summary.invalid);
    println!("   Valid proxies:          {}", summary.valid);
    println!("   Success rate:           {:.1}%", summary.success_rate());
    println!("   Checked in:             {:.2?}", start_time.elapsed());
    println!("{}", "━".repeat(50));
    println!("\nValid proxies saved to: {}", config.validator.output_file);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_proxy_file_runs_without_proxies() {
        let missing = std::env::temp_dir().join("proxied-no-such-proxies.txt");
        let (pool, _) = prepare(&ScraperConfig::default(), Some(missing.as_path())).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_unreadable_proxy_file_is_an_error() {
        // a directory exists but cannot be read as a proxy list
        let dir = std::env::temp_dir();
        let err = prepare(&ScraperConfig::default(), Some(dir.as_path())).unwrap_err();
        assert!(err.to_string().contains("failed to read proxy file"));
    }

    #[tokio::test]
    async fn test_extract_reports_setup_failure_as_output() {
        let result = extract(
            ScraperConfig::default(),
            "https://news.example.com/story".to_string(),
            Some(std::env::temp_dir()),
        )
        .await;
        assert!(result.is_ok());
    }
}
