//! Fetching and decoding source assets
//!
//! An [`AssetLoader`] turns an asset identifier into fully decoded samples.
//! [`SourceLoader`] does so by pulling raw bytes from an [`AssetSource`]
//! (local files or HTTP) and decoding them with symphonia.

use crate::decoder::{AssetDecoder, DecoderError};
use crate::models::DecodedAsset;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP {status} fetching {url}")]
    Http { status: u16, url: String },
    #[error("Decode error: {0}")]
    Decode(#[from] DecoderError),
    #[error("Loader error: {0}")]
    Other(String),
}

/// Trait for resolving an asset identifier into decoded samples
#[async_trait::async_trait]
pub trait AssetLoader: Send + Sync {
    async fn load(&self, asset: &str) -> Result<DecodedAsset, LoadError>;
}

/// Trait for fetching the raw encoded bytes of an asset
#[async_trait::async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, asset: &str) -> Result<Vec<u8>, LoadError>;
}

/// Reads assets from the local filesystem, relative to an optional root
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    root: Option<PathBuf>,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, asset: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(asset),
            None => PathBuf::from(asset),
        }
    }
}

#[async_trait::async_trait]
impl AssetSource for FileSource {
    async fn fetch(&self, asset: &str) -> Result<Vec<u8>, LoadError> {
        let path = self.resolve(asset);
        Ok(tokio::fs::read(&path).await?)
    }
}

/// Fetches assets over HTTP, as `{base_url}/{asset}`
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, asset: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), asset)
    }
}

#[async_trait::async_trait]
impl AssetSource for HttpSource {
    async fn fetch(&self, asset: &str) -> Result<Vec<u8>, LoadError> {
        let url = self.url_for(asset);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(LoadError::Http {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Loader that fetches bytes from a source and decodes them off the async runtime
#[derive(Debug, Clone)]
pub struct SourceLoader<S> {
    source: S,
}

impl<S: AssetSource> SourceLoader<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl<S: AssetSource> AssetLoader for SourceLoader<S> {
    async fn load(&self, asset: &str) -> Result<DecodedAsset, LoadError> {
        let bytes = self.source.fetch(asset).await?;
        info!("Fetched {} bytes for asset {}", bytes.len(), asset);

        let extension = Path::new(asset)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        // Decoding a whole asset is CPU-bound
        let decoded = tokio::task::spawn_blocking(move || {
            AssetDecoder::new(bytes, extension.as_deref())?.decode_all()
        })
        .await
        .map_err(|e| LoadError::Other(format!("Decode task failed: {}", e)))??;

        info!(
            "Decoded asset {}: {:.3}s, {} channels @ {} Hz",
            asset,
            decoded.duration(),
            decoded.channel_count(),
            decoded.sample_rate
        );
        Ok(decoded)
    }
}
