use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::dedup::{request_fingerprint, DedupCache};
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::request::ParsedCommand;
use crate::transport::{ChatTransport, InboundUpdate, TransportResult};

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum UpdateDisposition {
    /// No URL, or a host outside the accepted list.
    Ignored,
    Duplicate,
    Completed { outcome: PipelineOutcome },
    Failed { reason: String },
}

/// Poll loop owning the pipeline and the dedup cache.
pub struct BotService {
    transport: Arc<dyn ChatTransport>,
    pipeline: Pipeline,
    dedup: Mutex<DedupCache>,
    accepted_hosts: Vec<String>,
}

impl BotService {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        pipeline: Pipeline,
        dedup: DedupCache,
        accepted_hosts: Vec<String>,
    ) -> Self {
        Self {
            transport,
            pipeline,
            dedup: Mutex::new(dedup),
            accepted_hosts,
        }
    }

    /// Polls until `shutdown` resolves. An in-flight request is dropped at
    /// that point; its scratch files are removed by their guards.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(hosts = ?self.accepted_hosts, "bot service started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("bot service stopping");
                    break;
                }
                result = self.tick() => {
                    if let Err(err) = result {
                        error!(error = %err, "polling failed");
                        sleep(POLL_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }

    /// One poll round; every update is handled to completion before the next.
    pub async fn tick(&self) -> TransportResult<Vec<UpdateDisposition>> {
        let updates = self.transport.poll_updates().await?;
        let mut dispositions = Vec::with_capacity(updates.len());
        for update in updates {
            dispositions.push(self.handle_update(update).await);
        }
        Ok(dispositions)
    }

    pub async fn handle_update(&self, update: InboundUpdate) -> UpdateDisposition {
        let command = ParsedCommand::parse(&update.text);
        let Some(url) = command.url.as_deref() else {
            debug!(update = update.update_id, "message without url");
            return UpdateDisposition::Ignored;
        };
        if !self.accepts(url) {
            debug!(update = update.update_id, url, "host not accepted");
            return UpdateDisposition::Ignored;
        }
        let key = request_fingerprint(url, update.update_id);
        if !self.lock_dedup().insert_if_absent(&key) {
            info!(update = update.update_id, "duplicate request skipped");
            return UpdateDisposition::Duplicate;
        }
        let Some(request) = command.into_request(None) else {
            return UpdateDisposition::Ignored;
        };
        info!(
            chat = update.chat_id,
            update = update.update_id,
            url = %request.source_url,
            gif = request.as_gif,
            crop = request.wants_crop(),
            "handling request"
        );
        match self.pipeline.handle(update.chat_id, request).await {
            Ok(outcome) => UpdateDisposition::Completed { outcome },
            Err(err) => {
                warn!(chat = update.chat_id, error = %err, "request aborted");
                UpdateDisposition::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn accepts(&self, raw_url: &str) -> bool {
        if self.accepted_hosts.is_empty() {
            return true;
        }
        let Ok(parsed) = Url::parse(raw_url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.accepted_hosts
            .iter()
            .any(|accepted| host.contains(&accepted.to_ascii_lowercase()))
    }

    fn lock_dedup(&self) -> std::sync::MutexGuard<'_, DedupCache> {
        self.dedup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
