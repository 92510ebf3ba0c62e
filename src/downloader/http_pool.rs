use std::time::Duration;
use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder, Proxy};
use tokio::io::AsyncWriteExt;
use crate::downloader::{ProgressFn, Transfer};
use crate::errors::{AppError, Result};

const USER_AGENT: &str = concat!("tvkaista-offline/", env!("CARGO_PKG_VERSION"));

/// Streams recordings over HTTP with a shared connection pool.
///
/// Only connecting is time-limited; a body transfer runs until it completes,
/// fails, or is cancelled by dropping the future.
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new(max_connections: usize) -> Result<Self> {
        let client = Self::builder(max_connections).build()?;
        Ok(Self { client })
    }

    pub fn with_proxy(max_connections: usize, proxy_url: &str) -> Result<Self> {
        let proxy = Proxy::all(proxy_url)?;
        let client = Self::builder(max_connections).proxy(proxy).build()?;
        Ok(Self { client })
    }

    fn builder(max_connections: usize) -> ClientBuilder {
        ClientBuilder::new()
            .pool_max_idle_per_host(max_connections)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .connect_timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}

#[async_trait::async_trait]
impl Transfer for HttpTransfer {
    async fn fetch(&self, url: &str, file: &mut tokio::fs::File, progress: &ProgressFn) -> Result<u64> {
        let target = redacted(url);
        log::debug!("[HTTP] Starting transfer: {}", target);

        // Recording URLs carry signed query strings; keep them out of errors.
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Http(e.without_url()))?;

        if !response.status().is_success() {
            return Err(AppError::Download(format!("HTTP error: {}", response.status())));
        }

        let total_size = response.content_length();
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        progress(downloaded, total_size);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::Http(e.without_url()))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded, total_size);
        }

        file.flush().await?;

        if let Some(total) = total_size {
            if downloaded != total {
                return Err(AppError::Download(format!(
                    "Connection closed after {} of {} bytes",
                    downloaded, total
                )));
            }
        }

        log::debug!("[HTTP] Transfer complete: {} bytes from {}", downloaded, target);
        Ok(downloaded)
    }

    fn get_name(&self) -> &str {
        "http"
    }
}

/// Scheme, host and path of `url`, without credentials or query string.
fn redacted(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default(),
            parsed.path()
        ),
        Err(_) => "<invalid url>".to_string(),
    }
}
