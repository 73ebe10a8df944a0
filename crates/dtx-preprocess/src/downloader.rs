//! Image download
//!
//! Each hop connects only to the addresses the validator resolved (the
//! client's DNS is overridden per hop), redirects are followed by hand so
//! every target is re-validated, and the body is streamed so the size cap
//! aborts the transfer instead of buffering it.

use crate::error::DownloadError;
use crate::validator::{ImageValidator, ValidatedUrl};
use dtx_core::{DownloadConfig, ImageFormat};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use std::sync::Arc;
use url::Url;

/// Fetched payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    pub bytes: Vec<u8>,
    /// Format named by the `Content-Type` header
    pub declared: ImageFormat,
    /// URL after redirects
    pub final_url: Url,
}

/// HTTP image fetcher
#[derive(Debug, Clone)]
pub struct ImageDownloader {
    config: DownloadConfig,
    validator: Arc<ImageValidator>,
}

impl ImageDownloader {
    #[must_use]
    pub fn new(config: DownloadConfig, validator: Arc<ImageValidator>) -> Self {
        Self { config, validator }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download a validated URL, retrying 5xx and network failures
    ///
    /// # Errors
    /// Returns the last [`DownloadError`] once retries are exhausted or on
    /// the first non-retryable failure.
    pub async fn download(&self, target: &ValidatedUrl) -> Result<DownloadedImage, DownloadError> {
        self.config
            .retry
            .run("download", |attempt| {
                tracing::debug!(url = %target.url, attempt, "downloading");
                self.fetch(target)
            })
            .await
    }

    /// One attempt, following redirects
    async fn fetch(&self, target: &ValidatedUrl) -> Result<DownloadedImage, DownloadError> {
        let mut current = target.clone();
        let mut hops = 0;
        loop {
            let client = self.client_for(&current)?;
            let response = client
                .get(current.url.clone())
                .send()
                .await
                .map_err(|e| self.map_transport(&e))?;
            let status = response.status();

            if status.is_redirection() {
                hops += 1;
                if hops > self.config.max_redirects {
                    return Err(DownloadError::TooManyRedirects(self.config.max_redirects));
                }
                let next = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|location| current.url.join(location).ok())
                    .ok_or(DownloadError::BadRedirect)?;
                tracing::debug!(from = %current.url, to = %next, hops, "following redirect");
                current = self
                    .validator
                    .validate_url(next)
                    .await
                    .map_err(DownloadError::RedirectRejected)?;
                continue;
            }

            if !status.is_success() {
                return Err(DownloadError::Status(status.as_u16()));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let declared = ImageFormat::from_mime(&content_type).ok_or_else(|| {
                DownloadError::UnsupportedContentType(if content_type.is_empty() {
                    "<missing>".into()
                } else {
                    content_type.clone()
                })
            })?;

            let bytes = self.read_capped(response).await?;
            return Ok(DownloadedImage {
                bytes,
                declared,
                final_url: current.url,
            });
        }
    }

    fn client_for(&self, target: &ValidatedUrl) -> Result<reqwest::Client, DownloadError> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(self.config.timeout())
            .user_agent(self.config.user_agent.as_str());
        if !target.literal {
            builder = builder.resolve_to_addrs(&target.host, &target.addrs);
        }
        builder
            .build()
            .map_err(|e| DownloadError::Transport(e.to_string()))
    }

    async fn read_capped(&self, mut response: reqwest::Response) -> Result<Vec<u8>, DownloadError> {
        let limit = self.config.max_bytes;
        let declared_len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        if declared_len.is_some_and(|len| len > limit) {
            return Err(DownloadError::TooLarge { limit });
        }

        let capacity = declared_len.unwrap_or(0).min(limit);
        let mut body = Vec::with_capacity(usize::try_from(capacity).unwrap_or(0));
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.map_transport(&e))?
        {
            if (body.len() + chunk.len()) as u64 > limit {
                tracing::warn!(limit, "aborting oversized download");
                return Err(DownloadError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    fn map_transport(&self, err: &reqwest::Error) -> DownloadError {
        if err.is_timeout() {
            DownloadError::Timeout(self.config.timeout())
        } else {
            DownloadError::Transport(err.to_string())
        }
    }
}
