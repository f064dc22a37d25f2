use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::ConfigError;

/// Source of update artifacts.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Download `url` into the file at `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, String>;
}

/// Plain HTTP(S) GET via reqwest. Non-2xx responses are errors.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("iot-commands-receiver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ConfigError::HttpClient)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, String> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;

        let mut file = File::create(dest)
            .await
            .map_err(|e| format!("Failed to create {}: {e}", dest.display()))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("Failed to write {}: {e}", dest.display()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| format!("Failed to flush {}: {e}", dest.display()))?;

        debug!("Fetched {} bytes from {}", written, url);
        Ok(written)
    }
}
