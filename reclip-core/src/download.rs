use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_LENGTH, COOKIE, ORIGIN, REFERER, USER_AGENT};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DownloadSection;
use crate::locator::LocatedMedia;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("fetch failed with status {status_code}")]
    FetchFailed { status_code: u16 },
    #[error("response carried no body")]
    EmptyBody,
    #[error("network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => DownloadError::FetchFailed {
                status_code: status.as_u16(),
            },
            None => DownloadError::Network(error.to_string()),
        }
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;

/// Upper bound on the buffer reserved from a `Content-Length` header.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Whole media file held in memory; belongs to one request only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedMedia {
    pub bytes: Vec<u8>,
    pub size_bytes: u64,
}

impl DownloadedMedia {
    pub fn new(bytes: Vec<u8>) -> Self {
        let size_bytes = bytes.len() as u64;
        Self { bytes, size_bytes }
    }
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn milestone(&self, percent: u8);
}

/// Discards every notification.
#[derive(Debug, Default)]
pub struct SilentProgress;

#[async_trait]
impl ProgressSink for SilentProgress {
    async fn milestone(&self, _percent: u8) {}
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(
        &self,
        media: &LocatedMedia,
        progress: &dyn ProgressSink,
    ) -> DownloadResult<DownloadedMedia>;
}

/// Turns byte counts into coarse milestones so a chat message is edited a
/// handful of times instead of once per chunk.
#[derive(Debug, Clone)]
pub struct MilestoneTracker {
    step: u8,
    last: u8,
}

impl MilestoneTracker {
    pub fn new(step: u8) -> Self {
        Self {
            step: step.clamp(1, 100),
            last: 0,
        }
    }

    pub fn observe(&mut self, received: u64, total: u64) -> Option<u8> {
        if total == 0 {
            return None;
        }
        let percent = ((received.min(total) * 100) / total) as u8;
        let milestone = percent - percent % self.step;
        if milestone > self.last {
            self.last = milestone;
            Some(milestone)
        } else {
            None
        }
    }
}

pub fn render_progress_bar(percent: u8) -> String {
    const WIDTH: usize = 30;
    let percent = percent.min(100);
    let filled = usize::from(percent) * WIDTH / 100;
    format!(
        "[{}{}] {percent}%",
        "+".repeat(filled),
        "-".repeat(WIDTH - filled)
    )
}

#[derive(Debug, Clone)]
pub struct StreamDownloader {
    client: Client,
    config: Arc<DownloadSection>,
}

impl StreamDownloader {
    pub fn new(config: Arc<DownloadSection>) -> DownloadResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|err| DownloadError::Network(err.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl MediaFetcher for StreamDownloader {
    async fn fetch(
        &self,
        media: &LocatedMedia,
        progress: &dyn ProgressSink,
    ) -> DownloadResult<DownloadedMedia> {
        let response = self
            .client
            .get(&media.cdn_url)
            .header(COOKIE, &media.cookie_header)
            .header(USER_AGENT, &self.config.user_agent)
            .header(REFERER, &media.page_url)
            .header(ORIGIN, &self.config.origin)
            .header(ACCEPT, "*/*")
            .header(ACCEPT_LANGUAGE, &self.config.accept_language)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::FetchFailed {
                status_code: status.as_u16(),
            });
        }
        let total = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        if total == Some(0) {
            return Err(DownloadError::EmptyBody);
        }

        let mut tracker = MilestoneTracker::new(self.config.progress_step_percent);
        let mut buffer = Vec::with_capacity(initial_capacity(total));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            if let Some(total) = total {
                if let Some(percent) = tracker.observe(buffer.len() as u64, total) {
                    debug!(percent, received = buffer.len(), "download milestone");
                    progress.milestone(percent).await;
                }
            }
        }
        if buffer.is_empty() {
            return Err(DownloadError::EmptyBody);
        }
        info!(size_bytes = buffer.len(), "media downloaded");
        Ok(DownloadedMedia::new(buffer))
    }
}

fn initial_capacity(content_length: Option<u64>) -> usize {
    content_length.unwrap_or(0).min(MAX_PREALLOCATION) as usize
}
