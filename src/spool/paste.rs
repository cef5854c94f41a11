//! Paste-service escalation for oversized replies.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Upload failures. All of them surface to the channel as a refusal.
#[derive(Debug, Error)]
pub enum PasteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("paste service answered {0}")]
    BadStatus(reqwest::StatusCode),

    #[error("paste service returned an empty body")]
    EmptyBody,
}

/// Somewhere to upload text that is too long for the channel.
#[async_trait]
pub trait PasteSink: Send + Sync {
    /// Upload `text` and return its public URL.
    async fn upload(&self, text: &str) -> Result<String, PasteError>;
}

/// dpaste.org-compatible client.
///
/// Uploads are throttled: consecutive calls wait out a grace period so a
/// burst of oversized replies cannot hammer the service.
pub struct DpasteClient {
    http: reqwest::Client,
    api_url: String,
    grace: Duration,
    last_upload: tokio::sync::Mutex<Option<Instant>>,
}

impl DpasteClient {
    /// Client against `api_url`, pausing `grace` between uploads.
    pub fn new(api_url: &str, grace: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("slircb/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        DpasteClient {
            http,
            api_url: api_url.to_string(),
            grace,
            last_upload: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl PasteSink for DpasteClient {
    async fn upload(&self, text: &str) -> Result<String, PasteError> {
        // Hold the lock across the upload so concurrent callers queue.
        let mut last = self.last_upload.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.grace {
                tokio::time::sleep(self.grace - elapsed).await;
            }
        }

        let response = self
            .http
            .post(&self.api_url)
            .form(&[
                ("format", "url"),
                ("expires", "3600"),
                ("content", text),
            ])
            .send()
            .await?;
        *last = Some(Instant::now());

        if !response.status().is_success() {
            return Err(PasteError::BadStatus(response.status()));
        }
        let url = response.text().await?.trim().to_string();
        if url.is_empty() {
            return Err(PasteError::EmptyBody);
        }
        debug!(url = %url, "uploaded paste");
        Ok(url)
    }
}
