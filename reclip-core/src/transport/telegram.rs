use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, trace};

use super::{ChatId, ChatTransport, InboundUpdate, MessageId, TransportError, TransportResult};
use crate::config::TelegramSection;

/// Extra slack on top of the long-poll window before the HTTP request gives up.
const REQUEST_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    message_id: i64,
    chat: RawChat,
    text: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Bot API client. Keeps the update offset and a buffer of updates that
/// arrived while waiting for a reply in another chat.
#[derive(Debug)]
pub struct TelegramTransport {
    client: Client,
    endpoint: String,
    poll_timeout: Duration,
    poll_interval: Duration,
    offset: Mutex<i64>,
    pending: Mutex<VecDeque<InboundUpdate>>,
}

impl TelegramTransport {
    pub fn new(config: &TelegramSection, token: &str) -> TransportResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{}", config.api_base.trim_end_matches('/'), token),
            poll_timeout: Duration::from_secs(config.poll_timeout_seconds),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            offset: Mutex::new(0),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        request_timeout: Option<Duration>,
    ) -> TransportResult<T> {
        let mut request = self.client.post(self.url(method)).json(&body);
        if let Some(limit) = request_timeout {
            request = request.timeout(limit);
        }
        let response = request.send().await?;
        decode(method, &response.bytes().await?)
    }

    async fn upload(
        &self,
        method: &str,
        field: &str,
        chat: ChatId,
        bytes: Vec<u8>,
        filename: &str,
        mime: &str,
    ) -> TransportResult<MessageId> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)?;
        let form = Form::new()
            .text("chat_id", chat.to_string())
            .part(field.to_string(), part);
        let response = self
            .client
            .post(self.url(method))
            .multipart(form)
            .send()
            .await?;
        let sent: SentMessage = decode(method, &response.bytes().await?)?;
        debug!(chat, method, message = sent.message_id, "upload delivered");
        Ok(sent.message_id)
    }

    /// One `getUpdates` round; the offset advances past everything returned,
    /// including updates that carry no text.
    async fn fetch_updates(&self, wait: Duration) -> TransportResult<Vec<InboundUpdate>> {
        let offset = *lock(&self.offset);
        let raw: Vec<RawUpdate> = self
            .call(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": wait.as_secs(),
                    "allowed_updates": ["message"],
                }),
                Some(wait + REQUEST_GRACE),
            )
            .await?;
        let (updates, next_offset) = convert_updates(raw);
        if let Some(next) = next_offset {
            let mut current = lock(&self.offset);
            if next > *current {
                *current = next;
            }
        }
        trace!(count = updates.len(), "updates fetched");
        Ok(updates)
    }

    fn take_pending_for(&self, chat: ChatId) -> Option<InboundUpdate> {
        let mut pending = lock(&self.pending);
        let index = pending.iter().position(|update| update.chat_id == chat)?;
        pending.remove(index)
    }

    fn defer(&self, updates: impl IntoIterator<Item = InboundUpdate>) {
        lock(&self.pending).extend(updates);
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn poll_updates(&self) -> TransportResult<Vec<InboundUpdate>> {
        let buffered: Vec<InboundUpdate> = lock(&self.pending).drain(..).collect();
        if !buffered.is_empty() {
            return Ok(buffered);
        }
        let updates = self.fetch_updates(self.poll_timeout).await?;
        if updates.is_empty() {
            sleep(self.poll_interval).await;
        }
        Ok(updates)
    }

    async fn send_text(&self, chat: ChatId, text: &str) -> TransportResult<MessageId> {
        let sent: SentMessage = self
            .call("sendMessage", json!({ "chat_id": chat, "text": text }), None)
            .await?;
        Ok(sent.message_id)
    }

    async fn edit_text(&self, chat: ChatId, message: MessageId, text: &str) -> TransportResult<()> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                json!({ "chat_id": chat, "message_id": message, "text": text }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> TransportResult<()> {
        let _: bool = self
            .call(
                "deleteMessage",
                json!({ "chat_id": chat, "message_id": message }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn send_video(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> TransportResult<MessageId> {
        self.upload("sendVideo", "video", chat, bytes, filename, "video/mp4")
            .await
    }

    async fn send_document(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> TransportResult<MessageId> {
        let mime = if filename.ends_with(".gif") {
            "image/gif"
        } else {
            "application/octet-stream"
        };
        self.upload("sendDocument", "document", chat, bytes, filename, mime)
            .await
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> TransportResult<MessageId> {
        self.upload("sendPhoto", "photo", chat, bytes, filename, "image/jpeg")
            .await
    }

    async fn await_next_reply(
        &self,
        chat: ChatId,
        timeout: Duration,
    ) -> TransportResult<Option<InboundUpdate>> {
        if let Some(update) = self.take_pending_for(chat) {
            return Ok(Some(update));
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let wait = remaining.min(self.poll_timeout);
            let updates = match timeout_at(deadline, self.fetch_updates(wait)).await {
                Ok(result) => result?,
                Err(_) => return Ok(None),
            };
            let (mut mine, others): (Vec<_>, Vec<_>) =
                updates.into_iter().partition(|update| update.chat_id == chat);
            self.defer(others);
            if !mine.is_empty() {
                let reply = mine.remove(0);
                self.defer(mine);
                return Ok(Some(reply));
            }
            if wait.as_secs() == 0 {
                sleep(self.poll_interval.min(remaining)).await;
            }
        }
    }
}

fn decode<T: DeserializeOwned>(method: &str, body: &[u8]) -> TransportResult<T> {
    let response: ApiResponse<T> =
        serde_json::from_slice(body).map_err(|err| TransportError::Decode {
            method: method.to_string(),
            reason: err.to_string(),
        })?;
    if !response.ok {
        return Err(TransportError::Api {
            method: method.to_string(),
            description: response
                .description
                .unwrap_or_else(|| "no description".to_string()),
        });
    }
    response.result.ok_or_else(|| TransportError::Decode {
        method: method.to_string(),
        reason: "missing result".to_string(),
    })
}

fn convert_updates(raw: Vec<RawUpdate>) -> (Vec<InboundUpdate>, Option<i64>) {
    let next_offset = raw.iter().map(|update| update.update_id + 1).max();
    let updates = raw
        .into_iter()
        .filter_map(|update| {
            let message = update.message?;
            let text = message.text.or(message.caption)?;
            Some(InboundUpdate {
                update_id: update.update_id,
                chat_id: message.chat.id,
                message_id: message.message_id,
                text,
            })
        })
        .collect();
    (updates, next_offset)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
