#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use reclip_core::config::{ConversationSection, EncoderSection};
use reclip_core::download::{DownloadResult, DownloadedMedia, MediaFetcher, ProgressSink};
use reclip_core::locator::{LocatedMedia, LocatorError, LocatorResult, MediaLocator};
use reclip_core::pipeline::{MediaStages, Pipeline};
use reclip_core::planner::FilterPlanner;
use reclip_core::scratch::ScratchNamer;
use reclip_core::transcoder::{CommandExecutor, Transcoder};
use reclip_core::transport::{
    ChatId, ChatTransport, InboundUpdate, MessageId, TransportResult,
};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
#[cfg(windows)]
use std::os::windows::process::ExitStatusExt;

pub const MIB: usize = 1024 * 1024;
pub const PAGE_URL: &str = "https://www.tiktok.com/@someone/video/7301";

fn exit_status(code: i32) -> ExitStatus {
    #[cfg(unix)]
    {
        ExitStatus::from_raw(code << 8)
    }
    #[cfg(windows)]
    {
        ExitStatus::from_raw(code as u32)
    }
}

/// Pretends to be ffmpeg: writes an output file whose size depends on the
/// requested gif frame rate and records every argument list.
#[derive(Default)]
pub struct ScriptedExecutor {
    gif_sizes: HashMap<u32, usize>,
    failing_fps: HashSet<u32>,
    default_size: usize,
    fail_everything: Option<String>,
    preview_failure: Option<(usize, String)>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new(default_size: usize) -> Self {
        Self {
            default_size,
            ..Self::default()
        }
    }

    pub fn gif_size(mut self, fps: u32, size: usize) -> Self {
        self.gif_sizes.insert(fps, size);
        self
    }

    pub fn failing_fps(mut self, fps: u32) -> Self {
        self.failing_fps.insert(fps);
        self
    }

    pub fn failing(mut self, diagnostic: &str) -> Self {
        self.fail_everything = Some(diagnostic.to_string());
        self
    }

    /// Lets the first `succeeding` preview frames through, then fails the rest.
    pub fn failing_preview_after(mut self, succeeding: usize, diagnostic: &str) -> Self {
        self.preview_failure = Some((succeeding, diagnostic.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn gif_attempts(&self) -> Vec<u32> {
        self.calls().iter().filter_map(|args| fps_of(args)).collect()
    }

    pub fn preview_calls(&self) -> usize {
        self.calls().iter().filter(|args| is_preview(args)).count()
    }

    pub fn mp4_calls(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|args| args.last().map(|out| out.ends_with(".mp4")).unwrap_or(false))
            .collect()
    }
}

fn is_preview(args: &[String]) -> bool {
    args.iter().any(|arg| arg == "image2")
}

fn fps_of(args: &[String]) -> Option<u32> {
    let filter = args
        .iter()
        .position(|arg| arg == "-vf")
        .and_then(|index| args.get(index + 1))?;
    let start = filter.find("fps=")? + 4;
    let digits: String = filter[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, _program: &Path, args: &[String]) -> std::io::Result<Output> {
        self.calls.lock().unwrap().push(args.to_vec());
        let failure = |diagnostic: &str| Output {
            status: exit_status(1),
            stdout: Vec::new(),
            stderr: diagnostic.as_bytes().to_vec(),
        };
        if let Some(diagnostic) = &self.fail_everything {
            return Ok(failure(diagnostic));
        }
        if let Some((succeeding, diagnostic)) = &self.preview_failure {
            if is_preview(args) && self.preview_calls() > *succeeding {
                return Ok(failure(diagnostic));
            }
        }
        let fps = fps_of(args);
        if let Some(fps) = fps {
            if self.failing_fps.contains(&fps) {
                return Ok(failure("Error while filtering: Cannot allocate memory"));
            }
        }
        let size = fps
            .and_then(|fps| self.gif_sizes.get(&fps).copied())
            .unwrap_or(self.default_size);
        let output = PathBuf::from(args.last().expect("output path"));
        std::fs::write(&output, vec![0u8; size])?;
        Ok(Output {
            status: exit_status(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text { message: MessageId, text: String },
    Edit { message: MessageId, text: String },
    Delete { message: MessageId },
    Video { filename: String, size: usize },
    Document { filename: String, size: usize },
    Photo { message: MessageId, size: usize },
}

/// Records every outbound call; replies are scripted, `None` meaning the
/// wait ran out.
#[derive(Default)]
pub struct MockTransport {
    next_id: AtomicI64,
    log: Mutex<Vec<Sent>>,
    replies: Mutex<VecDeque<Option<String>>>,
    batches: Mutex<VecDeque<Vec<InboundUpdate>>>,
    waits: Mutex<Vec<Duration>>,
}

impl MockTransport {
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let transport = Self::default();
        transport
            .replies
            .lock()
            .unwrap()
            .extend(replies.into_iter().map(|reply| reply.map(Into::into)));
        transport
    }

    pub fn push_batch(&self, batch: Vec<InboundUpdate>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn log(&self) -> Vec<Sent> {
        self.log.lock().unwrap().clone()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        self.log()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Delete { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn deliveries(&self) -> usize {
        self.log()
            .iter()
            .filter(|sent| matches!(sent, Sent::Video { .. } | Sent::Document { .. }))
            .count()
    }

    fn record(&self, sent: Sent) {
        self.log.lock().unwrap().push(sent);
    }

    fn allocate(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 100
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn poll_updates(&self) -> TransportResult<Vec<InboundUpdate>> {
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn send_text(&self, _chat: ChatId, text: &str) -> TransportResult<MessageId> {
        let message = self.allocate();
        self.record(Sent::Text {
            message,
            text: text.to_string(),
        });
        Ok(message)
    }

    async fn edit_text(&self, _chat: ChatId, message: MessageId, text: &str) -> TransportResult<()> {
        self.record(Sent::Edit {
            message,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, _chat: ChatId, message: MessageId) -> TransportResult<()> {
        self.record(Sent::Delete { message });
        Ok(())
    }

    async fn send_video(
        &self,
        _chat: ChatId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> TransportResult<MessageId> {
        self.record(Sent::Video {
            filename: filename.to_string(),
            size: bytes.len(),
        });
        Ok(self.allocate())
    }

    async fn send_document(
        &self,
        _chat: ChatId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> TransportResult<MessageId> {
        self.record(Sent::Document {
            filename: filename.to_string(),
            size: bytes.len(),
        });
        Ok(self.allocate())
    }

    async fn send_photo(
        &self,
        _chat: ChatId,
        bytes: Vec<u8>,
        _filename: &str,
    ) -> TransportResult<MessageId> {
        let message = self.allocate();
        self.record(Sent::Photo {
            message,
            size: bytes.len(),
        });
        Ok(message)
    }

    async fn await_next_reply(
        &self,
        chat: ChatId,
        timeout: Duration,
    ) -> TransportResult<Option<InboundUpdate>> {
        self.waits.lock().unwrap().push(timeout);
        let reply = self.replies.lock().unwrap().pop_front().flatten();
        Ok(reply.map(|text| InboundUpdate {
            update_id: 0,
            chat_id: chat,
            message_id: self.allocate(),
            text,
        }))
    }
}

pub struct FakeLocator {
    error: Mutex<Option<LocatorError>>,
    calls: AtomicUsize,
}

impl FakeLocator {
    pub fn found() -> Self {
        Self {
            error: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: LocatorError) -> Self {
        Self {
            error: Mutex::new(Some(error)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaLocator for FakeLocator {
    async fn locate(&self, page_url: &str) -> LocatorResult<LocatedMedia> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(LocatedMedia {
            cdn_url: "https://v16-webapp-prime.tiktok.com/video/tos/clip.mp4".to_string(),
            cookie_header: "tt_chain_token=abc".to_string(),
            page_url: page_url.to_string(),
        })
    }
}

pub struct FakeFetcher {
    size: usize,
}

impl FakeFetcher {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(
        &self,
        _media: &LocatedMedia,
        progress: &dyn ProgressSink,
    ) -> DownloadResult<DownloadedMedia> {
        progress.milestone(50).await;
        progress.milestone(100).await;
        Ok(DownloadedMedia::new(vec![7u8; self.size]))
    }
}

pub fn encoder_settings(scratch: &TempDir) -> Arc<EncoderSection> {
    Arc::new(EncoderSection {
        scratch_dir: Some(scratch.path().to_path_buf()),
        ..EncoderSection::default()
    })
}

pub fn planner(settings: &Arc<EncoderSection>) -> FilterPlanner {
    FilterPlanner::new(Arc::clone(settings), ScratchNamer::new(settings.scratch_root()))
}

pub fn transcoder(settings: &Arc<EncoderSection>, executor: &Arc<ScriptedExecutor>) -> Transcoder {
    let executor: Arc<dyn CommandExecutor> = executor.clone();
    Transcoder::new(Arc::clone(settings), Some(executor))
}

pub struct Harness {
    pub scratch: TempDir,
    pub executor: Arc<ScriptedExecutor>,
    pub transport: Arc<MockTransport>,
    pub locator: Arc<FakeLocator>,
    pub pipeline: Pipeline,
}

pub fn harness(
    executor: ScriptedExecutor,
    transport: MockTransport,
    locator: FakeLocator,
    conversation: ConversationSection,
) -> Harness {
    let scratch = tempfile::tempdir().unwrap();
    let settings = encoder_settings(&scratch);
    let executor = Arc::new(executor);
    let transport = Arc::new(transport);
    let locator = Arc::new(locator);
    let stages = MediaStages {
        locator: locator.clone(),
        fetcher: Arc::new(FakeFetcher::new(4096)),
        planner: planner(&settings),
        transcoder: transcoder(&settings, &executor),
    };
    let chat_transport: Arc<dyn ChatTransport> = transport.clone();
    let pipeline = Pipeline::new(stages, chat_transport, Arc::new(conversation));
    Harness {
        scratch,
        executor,
        transport,
        locator,
        pipeline,
    }
}

pub fn scratch_is_empty(dir: &TempDir) -> bool {
    std::fs::read_dir(dir.path())
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
