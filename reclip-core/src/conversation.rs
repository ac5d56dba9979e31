use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ConversationSection;
use crate::download::DownloadedMedia;
use crate::planner::{FilterPlan, FilterPlanner};
use crate::request::{MediaRequest, ParsedCommand};
use crate::transcoder::{EncodeError, Transcoder};
use crate::transport::{ChatId, ChatTransport, MessageId, TransportError};

pub const CONFIRMATION_PROMPT: &str =
    "Do you like this crop? Reply 'yes' or 'like' to confirm, or send new crop values.";
pub const REJECTED_NOTICE: &str = "Okay, cancelled. Nothing will be sent.";
pub const REPLAN_LIMIT_NOTICE: &str = "Too many crop changes, cancelled. Send the link again to start over.";

const PREVIEW_FILENAME: &str = "preview.jpg";

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("preview failed: {0}")]
    Preview(#[from] EncodeError),
    #[error("chat transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("chat {0} already has a crop waiting for an answer; reply to it first")]
    AlreadyAwaiting(ChatId),
}

pub type ConversationResult<T> = Result<T, ConversationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConversationState {
    Planning,
    AwaitingConfirmation,
    Replanning,
    Committed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancelReason {
    Rejected,
    ReplanLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyVerdict {
    Reject,
    Replan(ParsedCommand),
    Confirm,
}

/// Rejection keywords must make up the whole reply; anything carrying a
/// flag is a new plan; everything else confirms.
pub fn classify_reply(text: &str, rejection_keywords: &[String]) -> ReplyVerdict {
    let normalized = text.trim().to_lowercase();
    if rejection_keywords
        .iter()
        .any(|keyword| normalized == keyword.to_lowercase())
    {
        return ReplyVerdict::Reject;
    }
    let parsed = ParsedCommand::parse(text);
    if parsed.has_directives() {
        ReplyVerdict::Replan(parsed)
    } else {
        ReplyVerdict::Confirm
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    Committed {
        request: MediaRequest,
        plan: FilterPlan,
    },
    Cancelled(CancelReason),
}

#[derive(Debug, Clone)]
pub struct ConfirmationRun {
    pub outcome: ConfirmationOutcome,
    pub transitions: Vec<ConversationState>,
    pub replans: u32,
}

pub struct ConversationController {
    transport: Arc<dyn ChatTransport>,
    transcoder: Transcoder,
    planner: FilterPlanner,
    settings: Arc<ConversationSection>,
    awaiting: Mutex<HashSet<ChatId>>,
}

impl ConversationController {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        transcoder: Transcoder,
        planner: FilterPlanner,
        settings: Arc<ConversationSection>,
    ) -> Self {
        Self {
            transport,
            transcoder,
            planner,
            settings,
            awaiting: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_awaiting(&self, chat: ChatId) -> bool {
        lock(&self.awaiting).contains(&chat)
    }

    /// Runs the preview/confirm loop for a cropped request until the user
    /// commits, rejects, or runs out of re-plans.
    ///
    /// Every preview and prompt sent is pushed onto `garbage` as soon as it
    /// exists, so the caller can remove them even when the loop fails.
    pub async fn confirm(
        &self,
        chat: ChatId,
        request: MediaRequest,
        media: &DownloadedMedia,
        garbage: &mut Vec<MessageId>,
    ) -> ConversationResult<ConfirmationRun> {
        let _slot = AwaitingSlot::claim(&self.awaiting, chat)?;
        let mut run = ConfirmationRun {
            outcome: ConfirmationOutcome::Cancelled(CancelReason::Rejected),
            transitions: Vec::new(),
            replans: 0,
        };
        let mut request = request;
        let mut plan = self.planner.plan(&request, media.size_bytes);

        loop {
            if !request.wants_crop() {
                // A re-plan that dropped the crop has nothing left to preview.
                break;
            }
            run.transitions.push(ConversationState::Planning);
            let frame = self
                .transcoder
                .extract_preview_frame(&media.bytes, &plan)
                .await?;
            let photo = self
                .transport
                .send_photo(chat, frame, PREVIEW_FILENAME)
                .await?;
            garbage.push(photo);
            let prompt = self.transport.send_text(chat, CONFIRMATION_PROMPT).await?;
            garbage.push(prompt);

            run.transitions.push(ConversationState::AwaitingConfirmation);
            let wait = self.settings.confirmation_timeout();
            let reply = self.transport.await_next_reply(chat, wait).await?;
            let Some(reply) = reply else {
                info!(chat, wait_seconds = wait.as_secs(), "no reply, taking crop as confirmed");
                break;
            };
            match classify_reply(&reply.text, &self.settings.rejection_keywords) {
                ReplyVerdict::Reject => {
                    info!(chat, "crop rejected");
                    return self
                        .cancel(chat, run, CancelReason::Rejected, REJECTED_NOTICE)
                        .await;
                }
                ReplyVerdict::Confirm => {
                    debug!(chat, "crop confirmed");
                    break;
                }
                ReplyVerdict::Replan(command) => {
                    run.replans += 1;
                    if run.replans > self.settings.max_replans {
                        warn!(chat, replans = run.replans, "re-plan limit reached");
                        return self
                            .cancel(chat, run, CancelReason::ReplanLimit, REPLAN_LIMIT_NOTICE)
                            .await;
                    }
                    run.transitions.push(ConversationState::Replanning);
                    // The media is already downloaded; a link in the reply is ignored.
                    request = command.into_request_on(&request.source_url);
                    plan = self.planner.plan(&request, media.size_bytes);
                    debug!(chat, crop = ?plan.crop, "re-planned from reply");
                }
            }
        }

        run.transitions.push(ConversationState::Committed);
        run.outcome = ConfirmationOutcome::Committed { request, plan };
        Ok(run)
    }

    async fn cancel(
        &self,
        chat: ChatId,
        mut run: ConfirmationRun,
        reason: CancelReason,
        notice: &str,
    ) -> ConversationResult<ConfirmationRun> {
        run.transitions.push(ConversationState::Cancelled);
        run.outcome = ConfirmationOutcome::Cancelled(reason);
        if let Err(err) = self.transport.send_text(chat, notice).await {
            warn!(chat, error = %err, "failed to send cancellation notice");
        }
        Ok(run)
    }
}

/// Marks a chat as waiting for an answer until dropped.
struct AwaitingSlot<'a> {
    set: &'a Mutex<HashSet<ChatId>>,
    chat: ChatId,
}

impl<'a> AwaitingSlot<'a> {
    fn claim(set: &'a Mutex<HashSet<ChatId>>, chat: ChatId) -> ConversationResult<Self> {
        if !lock(set).insert(chat) {
            return Err(ConversationError::AlreadyAwaiting(chat));
        }
        Ok(Self { set, chat })
    }
}

impl Drop for AwaitingSlot<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.chat);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords() -> Vec<String> {
        vec!["no".into(), "dislike".into()]
    }

    #[test]
    fn rejection_is_case_insensitive() {
        assert_eq!(classify_reply("NO", &keywords()), ReplyVerdict::Reject);
        assert_eq!(classify_reply(" Dislike ", &keywords()), ReplyVerdict::Reject);
    }

    #[test]
    fn rejection_word_inside_sentence_confirms() {
        assert_eq!(
            classify_reply("no problem, looks great", &keywords()),
            ReplyVerdict::Confirm
        );
        assert_eq!(classify_reply("yes", &keywords()), ReplyVerdict::Confirm);
        assert_eq!(classify_reply("like", &keywords()), ReplyVerdict::Confirm);
    }

    #[test]
    fn flags_trigger_replan() {
        match classify_reply("-top 10 -bot 5", &keywords()) {
            ReplyVerdict::Replan(command) => {
                assert_eq!(command.crop_top, Some(10));
                assert_eq!(command.crop_bottom, Some(5));
            }
            other => panic!("expected replan, got {other:?}"),
        }
    }

    #[test]
    fn slot_blocks_second_claim_until_dropped() {
        let set = Mutex::new(HashSet::new());
        let first = AwaitingSlot::claim(&set, 7).unwrap();
        assert!(matches!(
            AwaitingSlot::claim(&set, 7),
            Err(ConversationError::AlreadyAwaiting(7))
        ));
        assert!(AwaitingSlot::claim(&set, 8).is_ok());
        drop(first);
        assert!(AwaitingSlot::claim(&set, 7).is_ok());
    }
}
