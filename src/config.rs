use crate::Result;
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables that override configuration values,
/// e.g. `PROXIED_MAX_RETRIES=5` or `PROXIED_LLM_CONFIG__MODEL=llama3.2`.
pub const ENV_PREFIX: &str = "PROXIED";

/// The `ScraperConfig` struct holds the configuration settings for the scraper application.
/// It includes settings for the proxy validation sweep, the retry pipeline and the LLM used for extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// The number of proxy checks allowed in flight at once.
    pub concurrent_requests: usize,
    /// The per-probe timeout in seconds.
    pub timeout_secs: u64,
    /// The maximum number of extraction attempts per run.
    pub max_retries: u32,
    /// The user agent string to be used in HTTP requests.
    pub user_agent: String,
    /// Directory that receives one JSON file per extracted article.
    pub articles_dir: String,
    /// The proxy validation settings.
    pub validator: ValidatorConfig,
    /// The configuration settings for the Language Model (LLM).
    pub llm_config: LLMConfig,
}

/// The `ValidatorConfig` struct holds the settings for the proxy liveness sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// The URL requested through every candidate proxy.
    pub test_url: String,
    /// Where the newline-delimited list of live proxies is written.
    pub output_file: String,
    /// Pause between two candidate sources, in milliseconds.
    pub source_delay_ms: u64,
    /// Timeout for fetching a single candidate source, in seconds.
    pub source_timeout_secs: u64,
}

/// The `LLMConfig` struct holds the configuration settings for the Language Model (LLM).
/// It includes the endpoint URL, model, temperature, and maximum number of tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// The endpoint URL for the LLM API.
    pub endpoint: String,
    /// The model used for structured extraction.
    pub model: String,
    /// The temperature setting for the LLM, controlling the randomness of the output.
    pub temperature: f32,
    /// The maximum number of tokens allowed in the LLM response.
    pub max_tokens: u32,
    /// Upper bound on fetching the page through a proxy, in seconds.
    pub page_timeout_secs: u64,
    /// Upper bound on a single LLM call, in seconds.
    pub request_timeout_secs: u64,
    /// Maximum number of page characters forwarded to the model.
    pub max_page_chars: usize,
}

impl Default for ScraperConfig {
    /// Provides default values for the `ScraperConfig` struct.
    ///
    /// # Returns
    ///
    /// A `ScraperConfig` instance with default settings.
    fn default() -> Self {
        Self {
            concurrent_requests: crate::DEFAULT_CONCURRENT_REQUESTS,
            timeout_secs: crate::DEFAULT_TIMEOUT.as_secs(),
            max_retries: crate::DEFAULT_MAX_RETRIES,
            user_agent: String::from(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3",
            ),
            articles_dir: String::from("articles"),
            validator: ValidatorConfig {
                test_url: String::from(crate::DEFAULT_TEST_URL),
                output_file: String::from(crate::DEFAULT_VALID_PROXY_FILE),
                source_delay_ms: 1000,
                source_timeout_secs: 10,
            },
            llm_config: LLMConfig {
                endpoint: String::from("http://localhost:11434/api/generate"),
                model: String::from("llama3.2:latest"),
                temperature: 0.2,
                max_tokens: 8192,
                page_timeout_secs: 120,
                request_timeout_secs: 300,
                max_page_chars: 24_000,
            },
        }
    }
}

impl ScraperConfig {
    /// Loads the configuration from defaults, an optional file and the environment.
    ///
    /// Later layers win: built-in defaults, then `path` (TOML, JSON or YAML by extension)
    /// when given, then `PROXIED_*` environment variables with `__` separating nested keys.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to a configuration file. A missing file is an error.
    ///
    /// # Returns
    ///
    /// A `Result` containing the merged `ScraperConfig`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// The per-probe timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
