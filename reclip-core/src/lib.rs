pub mod config;
pub mod conversation;
pub mod dedup;
pub mod download;
pub mod error;
pub mod locator;
pub mod pipeline;
pub mod planner;
pub mod request;
pub mod scratch;
pub mod service;
pub mod transcoder;
pub mod transport;

pub use config::{
    load_config, BrowserSection, ConversationSection, DedupSection, DownloadSection,
    EncoderSection, LoggingSection, ReclipConfig, TelegramSection,
};
pub use conversation::{
    classify_reply, CancelReason, ConfirmationOutcome, ConfirmationRun, ConversationController,
    ConversationError, ConversationResult, ConversationState, ReplyVerdict,
};
pub use dedup::{request_fingerprint, DedupCache};
pub use download::{
    render_progress_bar, DownloadError, DownloadResult, DownloadedMedia, MediaFetcher,
    MilestoneTracker, ProgressSink, SilentProgress, StreamDownloader,
};
pub use error::{ConfigError, Result};
pub use locator::{
    BrowserLauncher, BrowserMediaLocator, BrowserSession, LocatedMedia, LocatorError,
    LocatorResult, MediaLocator, RequestClass, RequestClassifier, RequestWatch,
};
pub use pipeline::{MediaStages, Pipeline, PipelineError, PipelineOutcome, PipelineResult};
pub use planner::{
    adaptive_quality, normalize_timecode, CropGeometry, FilterPlan, FilterPlanner, OutputKind,
    QualityParams, ScaleTarget,
};
pub use request::{MediaRequest, ParsedCommand};
pub use scratch::{sweep_stale_scratch, ScratchGuard, ScratchNamer};
pub use service::{BotService, UpdateDisposition};
pub use transcoder::{
    CommandExecutor, EncodeError, EncodeResult, EncodedMedia, SystemCommandExecutor, Transcoder,
};
pub use transport::{
    ChatId, ChatTransport, InboundUpdate, MessageId, TelegramTransport, TransportError,
    TransportResult,
};
