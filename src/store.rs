use crate::article::ArticleRecord;
use crate::pool::ProxyEndpoint;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Destination for successful extractions.
pub trait ArticleSink: Send + Sync {
    /// Persists one record and returns where it ended up.
    fn save(&self, record: &ArticleRecord) -> Result<PathBuf>;
}

/// Writes each record as pretty-printed JSON to `<dir>/article_<timestamp>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Picks a file name from the extraction time, adding a counter if that name is taken.
    fn next_path(&self, record: &ArticleRecord) -> PathBuf {
        let stamp = record.metadata.extracted_at.format("%Y-%m-%dT%H-%M-%S");
        let mut path = self.dir.join(format!("article_{}.json", stamp));
        let mut counter = 1;
        while path.exists() {
            path = self.dir.join(format!("article_{}_{}.json", stamp, counter));
            counter += 1;
        }
        path
    }
}

impl ArticleSink for JsonFileSink {
    fn save(&self, record: &ArticleRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.next_path(record);
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&path, json)?;
        info!(path = %path.display(), "Saved article");
        Ok(path)
    }
}

/// Overwrites `path` with the addresses of the given proxies, one per line.
pub fn write_proxy_list<'a>(
    path: impl AsRef<Path>,
    proxies: impl IntoIterator<Item = &'a ProxyEndpoint>,
) -> Result<usize> {
    let lines: Vec<&str> = proxies.into_iter().map(ProxyEndpoint::address).collect();
    fs::write(path.as_ref(), lines.join("\n"))?;
    info!(path = %path.as_ref().display(), count = lines.len(), "Wrote valid proxy list");
    Ok(lines.len())
}
