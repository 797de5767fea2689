use std::io::Read;

use anyhow::{Context, Result};
use gitdeps_domain::Pack;
use reqwest::blocking::Client;

/// Source of compressed pack bodies.
pub trait PackFetcher: Send + Sync {
    /// Opens the compressed body of `pack` for streaming.
    fn open(&self, pack: &Pack) -> Result<Box<dyn Read + Send>>;
}

/// Fetches packs from `BaseUrl/RemotePath/Hash` over HTTP.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl PackFetcher for HttpFetcher {
    fn open(&self, pack: &Pack) -> Result<Box<dyn Read + Send>> {
        let url = pack.remote_url();
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("unexpected response for {url}"))?;
        Ok(Box::new(response))
    }
}
