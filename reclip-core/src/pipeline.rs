use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ConversationSection;
use crate::conversation::{
    CancelReason, ConfirmationOutcome, ConversationController, ConversationError,
};
use crate::download::{render_progress_bar, DownloadError, MediaFetcher, ProgressSink};
use crate::locator::{LocatorError, MediaLocator};
use crate::planner::{FilterPlanner, OutputKind};
use crate::request::MediaRequest;
use crate::transcoder::{EncodeError, EncodedMedia, Transcoder};
use crate::transport::{ChatId, ChatTransport, MessageId, TransportError};

pub const FINDING_VIDEO: &str = "finding video...";
pub const DOWNLOADING_VIDEO: &str = "downloading video...";
pub const ENCODING_VIDEO: &str = "encoding your video...";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Locator(#[from] LocatorError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PipelineError {
    /// Text shown in place of the progress message.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Locator(LocatorError::NotFound) => {
                "Couldn't find a video on that page.".to_string()
            }
            PipelineError::Locator(LocatorError::AuthRequired) => {
                "That video is behind a login, can't fetch it.".to_string()
            }
            PipelineError::Locator(LocatorError::NavigationTimeout(_)) => {
                "The page took too long to load.".to_string()
            }
            PipelineError::Locator(_) => "Couldn't open that page.".to_string(),
            PipelineError::Download(DownloadError::FetchFailed { status_code }) => {
                format!("Download failed (HTTP {status_code}).")
            }
            PipelineError::Download(_) => "Download failed.".to_string(),
            PipelineError::Encode(EncodeError::AllAttemptsFailed { .. }) => {
                "Couldn't get the GIF under the size limit. Try a shorter -duration.".to_string()
            }
            PipelineError::Encode(EncodeError::SizeCeilingExceeded { .. }) => {
                "The result is too large to send. Try a shorter -duration.".to_string()
            }
            PipelineError::Encode(err) => format!("Encoding failed: {err}"),
            PipelineError::Conversation(ConversationError::Preview(err)) => {
                format!("Couldn't render the crop preview, check the -top/-bot values: {err}")
            }
            PipelineError::Conversation(err @ ConversationError::AlreadyAwaiting(_)) => {
                err.to_string()
            }
            PipelineError::Conversation(_) | PipelineError::Transport(_) => {
                "Something went wrong, please try again.".to_string()
            }
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Delivered {
        kind: OutputKind,
        size_bytes: u64,
        message: MessageId,
    },
    Cancelled {
        reason: CancelReason,
    },
}

/// The four processing stages, usable with or without a chat attached.
#[derive(Clone)]
pub struct MediaStages {
    pub locator: Arc<dyn MediaLocator>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub planner: FilterPlanner,
    pub transcoder: Transcoder,
}

impl MediaStages {
    /// Locate, download, plan and encode in one go; no confirmation.
    pub async fn produce(
        &self,
        request: &MediaRequest,
        progress: &dyn ProgressSink,
    ) -> PipelineResult<EncodedMedia> {
        let located = self.locator.locate(&request.source_url).await?;
        let media = self.fetcher.fetch(&located, progress).await?;
        let plan = self.planner.plan(request, media.size_bytes);
        Ok(self.transcoder.encode(&media.bytes, &plan).await?)
    }
}

/// Per-process composition of the stages, the chat transport and the
/// confirmation controller. Requests run one at a time, start to finish.
pub struct Pipeline {
    stages: MediaStages,
    transport: Arc<dyn ChatTransport>,
    conversation: ConversationController,
}

impl Pipeline {
    pub fn new(
        stages: MediaStages,
        transport: Arc<dyn ChatTransport>,
        conversation: Arc<ConversationSection>,
    ) -> Self {
        let conversation = ConversationController::new(
            Arc::clone(&transport),
            stages.transcoder.clone(),
            stages.planner.clone(),
            conversation,
        );
        Self {
            stages,
            transport,
            conversation,
        }
    }

    pub fn conversation(&self) -> &ConversationController {
        &self.conversation
    }

    pub async fn handle(&self, chat: ChatId, request: MediaRequest) -> PipelineResult<PipelineOutcome> {
        let status = self.transport.send_text(chat, FINDING_VIDEO).await?;
        let mut garbage = Vec::new();
        match self.drive(chat, status, request, &mut garbage).await {
            Ok(outcome) => {
                garbage.push(status);
                self.discard(chat, &garbage).await;
                info!(chat, outcome = ?outcome, "request finished");
                Ok(outcome)
            }
            Err(err) => {
                warn!(chat, error = %err, "request failed");
                self.discard(chat, &garbage).await;
                if let Err(edit_err) = self
                    .transport
                    .edit_text(chat, status, &err.user_message())
                    .await
                {
                    warn!(chat, error = %edit_err, "failed to report error to chat");
                }
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        chat: ChatId,
        status: MessageId,
        request: MediaRequest,
        garbage: &mut Vec<MessageId>,
    ) -> PipelineResult<PipelineOutcome> {
        let located = self.stages.locator.locate(&request.source_url).await?;
        self.set_status(chat, status, DOWNLOADING_VIDEO).await;
        let progress = MessageProgress {
            transport: self.transport.as_ref(),
            chat,
            message: status,
        };
        let media = self.stages.fetcher.fetch(&located, &progress).await?;

        let plan = if request.wants_crop() {
            let run = self
                .conversation
                .confirm(chat, request, &media, garbage)
                .await?;
            match run.outcome {
                ConfirmationOutcome::Committed { plan, .. } => plan,
                ConfirmationOutcome::Cancelled(reason) => {
                    return Ok(PipelineOutcome::Cancelled { reason });
                }
            }
        } else {
            self.stages.planner.plan(&request, media.size_bytes)
        };

        self.set_status(chat, status, ENCODING_VIDEO).await;
        let encoded = self.stages.transcoder.encode(&media.bytes, &plan).await?;
        let size_bytes = encoded.bytes.len() as u64;
        let kind = encoded.kind;
        let message = match kind {
            OutputKind::Gif => {
                self.transport
                    .send_document(chat, encoded.bytes, &encoded.suggested_filename)
                    .await?
            }
            OutputKind::Mp4 => {
                self.transport
                    .send_video(chat, encoded.bytes, &encoded.suggested_filename)
                    .await?
            }
            OutputKind::Jpg => {
                self.transport
                    .send_photo(chat, encoded.bytes, &encoded.suggested_filename)
                    .await?
            }
        };
        Ok(PipelineOutcome::Delivered {
            kind,
            size_bytes,
            message,
        })
    }

    async fn set_status(&self, chat: ChatId, status: MessageId, text: &str) {
        if let Err(err) = self.transport.edit_text(chat, status, text).await {
            warn!(chat, error = %err, "failed to update progress message");
        }
    }

    async fn discard(&self, chat: ChatId, messages: &[MessageId]) {
        for &message in messages {
            if let Err(err) = self.transport.delete_message(chat, message).await {
                warn!(chat, message, error = %err, "failed to delete message");
            }
        }
    }
}

struct MessageProgress<'a> {
    transport: &'a dyn ChatTransport,
    chat: ChatId,
    message: MessageId,
}

#[async_trait]
impl<'a> ProgressSink for MessageProgress<'a> {
    async fn milestone(&self, percent: u8) {
        let text = format!("{DOWNLOADING_VIDEO}\n{}", render_progress_bar(percent));
        if let Err(err) = self.transport.edit_text(self.chat, self.message, &text).await {
            warn!(chat = self.chat, error = %err, "failed to update progress bar");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn user_messages_name_the_failure() {
        let not_found = PipelineError::from(LocatorError::NotFound);
        assert!(not_found.user_message().contains("Couldn't find"));

        let status = PipelineError::from(DownloadError::FetchFailed { status_code: 403 });
        assert_eq!(status.user_message(), "Download failed (HTTP 403).");

        let timeout = PipelineError::from(LocatorError::NavigationTimeout(Duration::from_secs(30)));
        assert!(timeout.user_message().contains("too long"));

        let gif = PipelineError::from(EncodeError::AllAttemptsFailed { attempts: 6 });
        assert!(gif.user_message().contains("GIF"));
    }

    #[test]
    fn preview_failure_shows_encoder_diagnostic() {
        let err = PipelineError::from(ConversationError::Preview(EncodeError::Encoder {
            diagnostic: "Invalid too big or non positive size for height '-40'".into(),
        }));
        let text = err.user_message();
        assert!(text.contains("-top/-bot"));
        assert!(text.contains("height '-40'"));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = PipelineOutcome::Cancelled {
            reason: CancelReason::Rejected,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "cancelled");
    }
}
