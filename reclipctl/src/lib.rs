mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use reclip_core::{
    load_config, sweep_stale_scratch, BotService, BrowserMediaLocator, ChatTransport, ConfigError,
    DedupCache, DownloadError, FilterPlan, FilterPlanner, MediaRequest, MediaStages, OutputKind,
    ParsedCommand, Pipeline, PipelineError, ProgressSink, ReclipConfig, ScratchNamer,
    StreamDownloader, TelegramTransport, Transcoder, TransportError,
};

pub use logging::init_logging;

pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("download client error: {0}")]
    Download(#[from] DownloadError),
    #[error("no bot token; pass --token or set TELEGRAM_BOT_TOKEN")]
    MissingToken,
    #[error("message has no link: {0:?}")]
    NoLink(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Short-video clipping bot", long_about = None)]
pub struct Cli {
    /// Path to reclip.toml
    #[arg(long, default_value = "configs/reclip.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the chat bot until interrupted
    Serve(ServeArgs),
    /// Process one message locally and write the result to disk
    Fetch(FetchArgs),
    /// Show the filter plan a message would produce
    Plan(PlanArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Bot token (falls back to TELEGRAM_BOT_TOKEN)
    #[arg(long)]
    pub token: Option<String>,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Chat-style message: link plus optional flags
    pub message: String,
    /// Where to write the encoded file
    #[arg(long, short)]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Chat-style message: link plus optional flags
    pub message: String,
    /// Size of the downloaded source, in bytes
    #[arg(long, default_value_t = 0)]
    pub source_bytes: u64,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    init_logging(&config.logging);

    match &cli.command {
        Commands::Serve(args) => serve(&config, args).await,
        Commands::Fetch(args) => {
            let report = fetch(&config, args).await?;
            render(&report, cli.format)
        }
        Commands::Plan(args) => {
            let report = plan_report(&config, args)?;
            render(&report, cli.format)
        }
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

fn resolve_token(flag: Option<&str>) -> Result<String> {
    flag.map(str::to_string)
        .or_else(|| std::env::var(TOKEN_ENV).ok())
        .filter(|token| !token.trim().is_empty())
        .ok_or(AppError::MissingToken)
}

fn build_stages(config: &ReclipConfig) -> Result<MediaStages> {
    let encoder = Arc::new(config.encoder.clone());
    let namer = ScratchNamer::new(encoder.scratch_root());
    Ok(MediaStages {
        locator: Arc::new(BrowserMediaLocator::new(Arc::new(config.browser.clone()))),
        fetcher: Arc::new(StreamDownloader::new(Arc::new(config.download.clone()))?),
        planner: FilterPlanner::new(Arc::clone(&encoder), namer),
        transcoder: Transcoder::new(encoder, None),
    })
}

fn sweep_scratch(config: &ReclipConfig) {
    let root = config.encoder.scratch_root();
    match sweep_stale_scratch(&root, config.encoder.stale_after()) {
        Ok(0) => {}
        Ok(removed) => info!(removed, root = %root.display(), "removed stale scratch files"),
        Err(err) => warn!(error = %err, root = %root.display(), "scratch sweep failed"),
    }
}

async fn serve(config: &ReclipConfig, args: &ServeArgs) -> Result<()> {
    let token = resolve_token(args.token.as_deref())?;
    sweep_scratch(config);

    let transport: Arc<dyn ChatTransport> =
        Arc::new(TelegramTransport::new(&config.telegram, &token)?);
    let pipeline = Pipeline::new(
        build_stages(config)?,
        Arc::clone(&transport),
        Arc::new(config.conversation.clone()),
    );
    let service = BotService::new(
        transport,
        pipeline,
        DedupCache::from_config(&config.dedup),
        config.telegram.accepted_hosts.clone(),
    );
    service
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

fn parse_message(message: &str) -> Result<MediaRequest> {
    ParsedCommand::parse(message)
        .into_request(None)
        .ok_or_else(|| AppError::NoLink(message.to_string()))
}

struct LogProgress;

#[async_trait]
impl ProgressSink for LogProgress {
    async fn milestone(&self, percent: u8) {
        info!(percent, "download progress");
    }
}

#[derive(Debug, Serialize)]
pub struct FetchReport {
    pub source_url: String,
    pub output: PathBuf,
    pub kind: OutputKind,
    pub size_bytes: u64,
}

impl DisplayFallback for FetchReport {
    fn display(&self) -> String {
        format!(
            "{} -> {} ({:?}, {} bytes)",
            self.source_url,
            self.output.display(),
            self.kind,
            self.size_bytes
        )
    }
}

async fn fetch(config: &ReclipConfig, args: &FetchArgs) -> Result<FetchReport> {
    let request = parse_message(&args.message)?;
    sweep_scratch(config);
    let stages = build_stages(config)?;
    let encoded = stages.produce(&request, &LogProgress).await?;
    write_output(&args.output, &encoded.bytes).await?;
    Ok(FetchReport {
        source_url: request.source_url,
        output: args.output.clone(),
        kind: encoded.kind,
        size_bytes: encoded.bytes.len() as u64,
    })
}

async fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub request: MediaRequest,
    pub source_bytes: u64,
    pub video_filter: String,
    pub quality_args: Vec<String>,
    pub plan: FilterPlan,
}

impl DisplayFallback for PlanReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Source: {}", self.request.source_url),
            format!("Output: {:?}", self.plan.output_kind),
            format!("Filter: {}", self.video_filter),
        ];
        if let Some(start) = &self.plan.trim_start {
            lines.push(format!("Start: {start}"));
        }
        if let Some(duration) = &self.plan.trim_duration {
            lines.push(format!("Duration: {duration}"));
        }
        if self.quality_args.is_empty() {
            lines.push("Quality: encoder defaults".to_string());
        } else {
            lines.push(format!("Quality: {}", self.quality_args.join(" ")));
        }
        if self.plan.strip_audio {
            lines.push("Audio: removed".to_string());
        }
        lines.join("\n")
    }
}

pub fn plan_report(config: &ReclipConfig, args: &PlanArgs) -> Result<PlanReport> {
    let request = parse_message(&args.message)?;
    let encoder = Arc::new(config.encoder.clone());
    let planner = FilterPlanner::new(Arc::clone(&encoder), ScratchNamer::new(encoder.scratch_root()));
    let plan = planner.plan(&request, args.source_bytes);
    Ok(PlanReport {
        video_filter: plan.video_filter(),
        quality_args: plan
            .quality
            .map(|quality| quality.to_args())
            .unwrap_or_default(),
        source_bytes: args.source_bytes,
        request,
        plan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK: &str = "https://www.tiktok.com/@someone/video/7301";

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from([
            "reclipctl",
            "--format",
            "json",
            "plan",
            "https://www.tiktok.com/@a/video/1 -top 40",
            "--source-bytes",
            "20000000",
        ])
        .unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
        assert_eq!(cli.config, PathBuf::from("configs/reclip.toml"));
        match cli.command {
            Commands::Plan(args) => assert_eq!(args.source_bytes, 20_000_000),
            other => panic!("unexpected command {other:?}"),
        }

        let fetch = Cli::try_parse_from(["reclipctl", "fetch", LINK, "-o", "out.mp4"]).unwrap();
        assert!(matches!(fetch.command, Commands::Fetch(_)));
    }

    #[test]
    fn plan_report_reflects_flags() {
        let args = PlanArgs {
            message: format!("{LINK} -top 40 -bot 20 -na"),
            source_bytes: 20_000_000,
        };
        let report = plan_report(&ReclipConfig::default(), &args).unwrap();
        assert_eq!(
            report.video_filter,
            "crop=in_w:in_h-60:0:40,scale=720:-2:flags=lanczos"
        );
        assert!(report.quality_args.contains(&"-crf".to_string()));
        let text = report.display();
        assert!(text.contains("Audio: removed"));
        assert!(text.contains(LINK));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["plan"]["output_kind"], "mp4");
    }

    #[test]
    fn gif_plan_skips_quality() {
        let args = PlanArgs {
            message: format!("{LINK} -gif"),
            source_bytes: 20_000_000,
        };
        let report = plan_report(&ReclipConfig::default(), &args).unwrap();
        assert!(report.quality_args.is_empty());
        assert!(report.display().contains("encoder defaults"));
    }

    #[test]
    fn message_without_link_is_rejected() {
        let args = PlanArgs {
            message: "-top 40".into(),
            source_bytes: 0,
        };
        assert!(matches!(
            plan_report(&ReclipConfig::default(), &args),
            Err(AppError::NoLink(_))
        ));
    }

    #[test]
    fn explicit_token_wins() {
        assert_eq!(resolve_token(Some("123:abc")).unwrap(), "123:abc");
        assert!(matches!(resolve_token(Some("  ")), Err(AppError::MissingToken)));
    }

    #[tokio::test]
    async fn output_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("clip.mp4");
        write_output(&target, b"bytes").await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"bytes");
    }
}
