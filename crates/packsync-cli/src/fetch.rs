use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use packsync_core::RemoteConfig;
use packsync_engine::ConfigSource;

const HTTP_USER_AGENT: &str = concat!("packsync/", env!("CARGO_PKG_VERSION"));

pub struct HttpConfigSource {
    url: Option<String>,
    cache_path: PathBuf,
}

impl HttpConfigSource {
    pub fn new(url: Option<String>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            url,
            cache_path: cache_path.into(),
        }
    }

    pub(crate) fn store_cached(&self, body: &str) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&self.cache_path, body.as_bytes()).with_context(|| {
            format!(
                "failed to write cached remote config: {}",
                self.cache_path.display()
            )
        })
    }

    fn read_cached(&self) -> Option<RemoteConfig> {
        let raw = fs::read_to_string(&self.cache_path).ok()?;
        RemoteConfig::from_json_str(&raw).ok()
    }
}

impl ConfigSource for HttpConfigSource {
    // unreachable or unparsable remote falls back to the cached copy and
    // no cache either means None; a local cache-write failure is an error,
    // otherwise the offline fallback goes stale with no hint
    fn fetch(&self) -> Result<Option<RemoteConfig>> {
        if let Some(url) = &self.url {
            if let Ok(body) = fetch_text(url) {
                if let Ok(config) = RemoteConfig::from_json_str(&body) {
                    self.store_cached(&body)?;
                    return Ok(Some(config));
                }
            }
        }

        Ok(self.read_cached())
    }
}

pub(crate) fn fetch_text(url: &str) -> Result<String> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(HTTP_USER_AGENT)
        .build()
        .context("failed to build http client")?;
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("request failed: {url}"))?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "request to {url} failed with status {}",
            response.status()
        ));
    }

    response
        .text()
        .with_context(|| format!("failed to read response body: {url}"))
}
