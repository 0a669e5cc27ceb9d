//! Emote catalog
//!
//! Fetched once at startup from the chat CDN. Maps raw token text (the emote
//! prefix) to its descriptor; the prefix is also the canonical aggregation
//! key. Read-only after load.
//!
//! Endpoint returns an array of:
//! `{prefix, twitch | twitchAlias, theme, image | images: [{url, name, mime, height, width}]}`

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoteImage {
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoteDescriptor {
    pub prefix: String,
    #[serde(default, rename = "twitchAlias", alias = "twitch")]
    pub twitch_alias: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default, alias = "image")]
    pub images: Vec<EmoteImage>,
}

#[derive(Debug)]
pub enum CatalogError {
    Http(reqwest::Error),
    Status(reqwest::StatusCode),
    Decode(serde_json::Error),
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        CatalogError::Http(err)
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Decode(err)
    }
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Http(e) => write!(f, "Catalog request failed: {}", e),
            CatalogError::Status(status) => write!(f, "Catalog endpoint returned {}", status),
            CatalogError::Decode(e) => write!(f, "Catalog payload is not valid JSON: {}", e),
        }
    }
}

impl std::error::Error for CatalogError {}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    emotes: HashMap<String, EmoteDescriptor>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: Vec<EmoteDescriptor>) -> Self {
        let emotes = descriptors
            .into_iter()
            .filter(|d| !d.prefix.is_empty())
            .map(|d| (d.prefix.clone(), d))
            .collect();
        Self { emotes }
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let descriptors: Vec<EmoteDescriptor> = serde_json::from_str(json)?;
        Ok(Self::from_descriptors(descriptors))
    }

    /// Canonical key for a raw token, if it names a known emote
    pub fn canonical_key(&self, token: &str) -> Option<&str> {
        self.emotes.get(token).map(|d| d.prefix.as_str())
    }

    pub fn get(&self, token: &str) -> Option<&EmoteDescriptor> {
        self.emotes.get(token)
    }

    pub fn len(&self) -> usize {
        self.emotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emotes.is_empty()
    }
}

/// Fetch the catalog once
///
/// A `_=<unix nanos>` query parameter is appended so CDN caches never serve a
/// stale list.
pub async fn fetch_catalog(url: &str) -> Result<Catalog, CatalogError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let cache_buster = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let response = client
        .get(url)
        .query(&[("_", cache_buster.to_string())])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(CatalogError::Status(response.status()));
    }

    let body = response.text().await?;
    let catalog = Catalog::from_json(&body)?;

    log::info!("📚 Loaded {} emotes from catalog", catalog.len());
    Ok(catalog)
}
