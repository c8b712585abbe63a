//! Tag source interface - where runtime versions come from.
//!
//! A [`TagSource`] lists the tag names of an image. That's it.
//! [`RegistryClient`] asks a Docker registry over HTTP; tests hand in a
//! fixed list instead.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Registry queried when no other base URL is configured.
pub const DEFAULT_REGISTRY: &str = "https://registry.hub.docker.com";

const USER_AGENT: &str = concat!("kite-matrix/", env!("CARGO_PKG_VERSION"));

/// Lists every tag name published for an image.
pub trait TagSource {
    fn tags(&self, image: &str) -> Result<Vec<String>>;
}

impl TagSource for Vec<String> {
    fn tags(&self, _image: &str) -> Result<Vec<String>> {
        Ok(self.clone())
    }
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// Blocking HTTP client for the registry's "list tags" endpoint.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    timeout: Option<Duration>,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: None,
        }
    }

    /// Bounds each request. Unset by default: a hung registry hangs the run.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// URL of the tag list for `image`.
    pub fn tags_url(&self, image: &str) -> String {
        format!("{}/v1/repositories/{}/tags", self.base_url, image)
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY)
    }
}

impl TagSource for RegistryClient {
    fn tags(&self, image: &str) -> Result<Vec<String>> {
        let url = self.tags_url(image);
        debug!(%url, "fetching image tags");

        let mut builder = reqwest::blocking::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let fetch_err = |source| Error::Fetch {
            url: url.clone(),
            source,
        };
        let client = builder.build().map_err(fetch_err)?;

        let body = client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(fetch_err)?;

        let tags = parse_tag_list(&body).map_err(|source| Error::Decode {
            url: url.clone(),
            source,
        })?;

        info!(image, count = tags.len(), "fetched image tags");
        Ok(tags)
    }
}

/// Extracts the `name` of every entry in a registry tag list.
pub fn parse_tag_list(body: &str) -> std::result::Result<Vec<String>, serde_json::Error> {
    let entries: Vec<TagEntry> = serde_json::from_str(body)?;
    Ok(entries.into_iter().map(|e| e.name).collect())
}
