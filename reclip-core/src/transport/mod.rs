mod telegram;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use telegram::TelegramTransport;

pub type ChatId = i64;
pub type MessageId = i64;

/// A text message pulled from the update feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundUpdate {
    pub update_id: i64,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),
    #[error("{method} rejected: {description}")]
    Api { method: String, description: String },
    #[error("unexpected {method} response: {reason}")]
    Decode { method: String, reason: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        // Bot URLs embed the token.
        TransportError::Http(error.without_url().to_string())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Next batch of updates, oldest first.
    async fn poll_updates(&self) -> TransportResult<Vec<InboundUpdate>>;

    async fn send_text(&self, chat: ChatId, text: &str) -> TransportResult<MessageId>;

    async fn edit_text(&self, chat: ChatId, message: MessageId, text: &str) -> TransportResult<()>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> TransportResult<()>;

    async fn send_video(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> TransportResult<MessageId>;

    async fn send_document(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> TransportResult<MessageId>;

    async fn send_photo(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> TransportResult<MessageId>;

    /// First message from `chat` within `timeout`, or `None` once it lapses.
    /// Messages from other chats seen meanwhile must not be lost.
    async fn await_next_reply(
        &self,
        chat: ChatId,
        timeout: Duration,
    ) -> TransportResult<Option<InboundUpdate>>;
}
