use crate::{Result, ScraperError};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Scheme prepended to candidates that arrive as a bare `host:port`.
pub const DEFAULT_SCHEME: &str = "http://";

/// A scheme-qualified proxy address such as `http://10.0.0.1:8080`.
///
/// Only [`ProxyEndpoint::normalize`] creates endpoints, so every value carries a scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyEndpoint(String);

impl ProxyEndpoint {
    /// Normalizes a raw candidate string into an endpoint.
    ///
    /// Surrounding whitespace is trimmed and `http://` is prepended when no scheme is present.
    /// Strings that already carry a scheme are kept as they are.
    ///
    /// # Errors
    ///
    /// `ScraperError::InvalidEndpoint` if the trimmed string is empty.
    pub fn normalize(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScraperError::InvalidEndpoint(raw.to_string()));
        }

        if trimmed.contains("://") {
            Ok(Self(trimmed.to_string()))
        } else {
            Ok(Self(format!("{}{}", DEFAULT_SCHEME, trimmed)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The endpoint without its scheme, as written to the valid-proxy list.
    pub fn address(&self) -> &str {
        self.0
            .split_once("://")
            .map(|(_, address)| address)
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `ProxyPool` struct holds the proxies an extraction run may draw from.
///
/// Membership is set once by [`ProxyPool::load`] and only shrinks afterwards through
/// [`ProxyPool::evict`].
#[derive(Debug, Clone, Default)]
pub struct ProxyPool {
    proxies: Vec<ProxyEndpoint>,
}

impl ProxyPool {
    /// Creates an empty pool. Drawing from it yields no proxy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool from raw candidate strings. See [`ProxyPool::load`].
    pub fn from_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut pool = Self::new();
        pool.load(candidates);
        pool
    }

    /// Creates a pool from a newline-delimited file of `ip:port` entries.
    ///
    /// # Arguments
    ///
    /// * `path` - The file to read. Blank lines are skipped.
    ///
    /// # Returns
    ///
    /// A `Result` containing the loaded pool, or an I/O error if the file cannot be read.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let pool = Self::from_candidates(text.lines());
        info!(
            path = %path.as_ref().display(),
            proxies = pool.len(),
            "Loaded proxy pool"
        );
        Ok(pool)
    }

    /// Replaces the pool membership with the given candidates.
    ///
    /// Candidates are normalized, invalid ones are dropped, duplicates are removed
    /// (first occurrence wins) and the result is shuffled.
    pub fn load<I, S>(&mut self, candidates: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut proxies = Vec::new();

        for raw in candidates {
            match ProxyEndpoint::normalize(raw.as_ref()) {
                Ok(endpoint) => {
                    if seen.insert(endpoint.clone()) {
                        proxies.push(endpoint);
                    }
                }
                Err(e) => debug!("Skipping candidate: {}", e),
            }
        }

        proxies.shuffle(&mut rand::thread_rng());
        self.proxies = proxies;
    }

    /// Returns a uniformly random member, or `None` if the pool is empty.
    ///
    /// Drawing does not remove the proxy; consecutive draws may return the same one.
    pub fn draw(&self) -> Option<ProxyEndpoint> {
        self.proxies.choose(&mut rand::thread_rng()).cloned()
    }

    /// Removes the given endpoint if present. Evicting an absent endpoint is a no-op.
    ///
    /// # Returns
    ///
    /// `true` if a member was removed.
    pub fn evict(&mut self, endpoint: &ProxyEndpoint) -> bool {
        match self.proxies.iter().position(|p| p == endpoint) {
            Some(index) => {
                self.proxies.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, endpoint: &ProxyEndpoint) -> bool {
        self.proxies.contains(endpoint)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn endpoints(&self) -> &[ProxyEndpoint] {
        &self.proxies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prepends_http() {
        let endpoint = ProxyEndpoint::normalize("10.0.0.1:8080").unwrap();
        assert_eq!(endpoint.as_str(), "http://10.0.0.1:8080");
        assert_eq!(endpoint.address(), "10.0.0.1:8080");
    }

    #[test]
    fn test_normalize_keeps_existing_scheme() {
        for raw in ["http://1.2.3.4:80", "https://1.2.3.4:443", "socks5://1.2.3.4:1080"] {
            assert_eq!(ProxyEndpoint::normalize(raw).unwrap().as_str(), raw);
        }
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(matches!(
            ProxyEndpoint::normalize("   "),
            Err(ScraperError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_load_deduplicates_and_skips_blank_lines() {
        let pool = ProxyPool::from_candidates([
            "1.1.1.1:80",
            "",
            "http://1.1.1.1:80",
            "2.2.2.2:3128",
            "  2.2.2.2:3128 ",
        ]);

        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&ProxyEndpoint::normalize("1.1.1.1:80").unwrap()));
        assert!(pool.contains(&ProxyEndpoint::normalize("2.2.2.2:3128").unwrap()));
    }

    #[test]
    fn test_load_replaces_membership() {
        let mut pool = ProxyPool::from_candidates(["1.1.1.1:80"]);
        pool.load(["3.3.3.3:80"]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.endpoints()[0].as_str(), "http://3.3.3.3:80");
    }

    #[test]
    fn test_draw_on_empty_pool_is_none() {
        assert!(ProxyPool::new().draw().is_none());
    }

    #[test]
    fn test_draw_returns_a_member() {
        let pool = ProxyPool::from_candidates(["1.1.1.1:80", "2.2.2.2:80"]);
        for _ in 0..20 {
            let drawn = pool.draw().unwrap();
            assert!(pool.contains(&drawn));
        }
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_evict_is_idempotent() {
        let mut pool = ProxyPool::from_candidates(["1.1.1.1:80", "2.2.2.2:80"]);
        let endpoint = ProxyEndpoint::normalize("1.1.1.1:80").unwrap();

        assert!(pool.evict(&endpoint));
        assert!(!pool.evict(&endpoint));
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&endpoint));

        let absent = ProxyEndpoint::normalize("9.9.9.9:80").unwrap();
        assert!(!pool.evict(&absent));
        assert_eq!(pool.len(), 1);
    }
}
