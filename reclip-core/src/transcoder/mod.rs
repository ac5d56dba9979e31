mod error;
mod executor;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::EncoderSection;
use crate::planner::{FilterPlan, OutputKind};
use crate::scratch::ScratchGuard;

pub use error::{EncodeError, EncodeResult};
pub use executor::{CommandExecutor, SystemCommandExecutor};

const DIAGNOSTIC_LINES: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMedia {
    pub bytes: Vec<u8>,
    pub suggested_filename: String,
    pub kind: OutputKind,
}

impl EncodedMedia {
    fn new(bytes: Vec<u8>, kind: OutputKind) -> Self {
        Self {
            bytes,
            suggested_filename: format!("video.{}", kind.extension()),
            kind,
        }
    }
}

#[derive(Clone)]
pub struct Transcoder {
    settings: Arc<EncoderSection>,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcoder")
            .field("settings", &self.settings)
            .finish()
    }
}

impl Transcoder {
    pub fn new(settings: Arc<EncoderSection>, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Self { settings, executor }
    }

    pub async fn encode(&self, buffer: &[u8], plan: &FilterPlan) -> EncodeResult<EncodedMedia> {
        match plan.output_kind {
            OutputKind::Gif => self.encode_gif(buffer, plan).await,
            OutputKind::Mp4 => self.encode_video(buffer, plan).await,
            OutputKind::Jpg => Err(EncodeError::UnsupportedKind(OutputKind::Jpg)),
        }
    }

    /// Single attempt; encoder diagnostics are surfaced verbatim.
    pub async fn encode_video(&self, buffer: &[u8], plan: &FilterPlan) -> EncodeResult<EncodedMedia> {
        let _scratch = ScratchGuard::new([plan.input_path.clone(), plan.output_path.clone()]);
        stage_input(buffer, &plan.input_path).await?;

        let mut args = self.base_args();
        push_input(&mut args, plan);
        args.extend([
            "-vf".to_string(),
            plan.video_filter(),
            "-c:v".to_string(),
            self.settings.video_codec.clone(),
            "-c:a".to_string(),
            self.settings.audio_codec.clone(),
            "-preset".to_string(),
            self.settings.preset.clone(),
            "-pix_fmt".to_string(),
            self.settings.pix_fmt.clone(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]);
        if let Some(quality) = &plan.quality {
            args.extend(quality.to_args());
        }
        if plan.strip_audio {
            args.push("-an".to_string());
        }
        args.push(path_arg(&plan.output_path));

        self.run(&args).await?;
        let bytes = read_output(&plan.output_path).await?;
        let limit = self.settings.mp4_upload_limit_bytes;
        if bytes.len() as u64 > limit {
            return Err(EncodeError::SizeCeilingExceeded {
                size_bytes: bytes.len() as u64,
                limit_bytes: limit,
            });
        }
        info!(size_bytes = bytes.len(), quality = ?plan.quality, "mp4 encoded");
        Ok(EncodedMedia::new(bytes, OutputKind::Mp4))
    }

    /// Walks the fps ladder from highest to lowest and keeps the first
    /// result under the size ceiling.
    pub async fn encode_gif(&self, buffer: &[u8], plan: &FilterPlan) -> EncodeResult<EncodedMedia> {
        let _scratch = ScratchGuard::new([plan.input_path.clone(), plan.output_path.clone()]);
        stage_input(buffer, &plan.input_path).await?;

        let ladder = &self.settings.gif_fps_ladder;
        for &fps in ladder {
            match self.try_gif(plan, fps).await {
                Ok(bytes) => {
                    info!(fps, size_bytes = bytes.len(), "gif encoded");
                    return Ok(EncodedMedia::new(bytes, OutputKind::Gif));
                }
                Err(err) => warn!(fps, error = %err, "gif attempt rejected"),
            }
        }
        Err(EncodeError::AllAttemptsFailed {
            attempts: ladder.len(),
        })
    }

    /// One JPEG frame with the plan's crop, for the confirmation prompt.
    pub async fn extract_preview_frame(&self, buffer: &[u8], plan: &FilterPlan) -> EncodeResult<Vec<u8>> {
        let preview = plan.as_preview(self.settings.preview_scale_width);
        let _scratch = ScratchGuard::new([preview.input_path.clone(), preview.output_path.clone()]);
        stage_input(buffer, &preview.input_path).await?;

        let mut args = self.base_args();
        push_input(&mut args, &preview);
        args.extend([
            "-vf".to_string(),
            preview.video_filter(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "image2".to_string(),
            path_arg(&preview.output_path),
        ]);
        self.run(&args).await?;
        let bytes = read_output(&preview.output_path).await?;
        debug!(size_bytes = bytes.len(), "preview frame extracted");
        Ok(bytes)
    }

    async fn try_gif(&self, plan: &FilterPlan, fps: u32) -> EncodeResult<Vec<u8>> {
        remove_if_present(&plan.output_path).await?;
        let mut args = self.base_args();
        push_input(&mut args, plan);
        args.extend([
            "-vf".to_string(),
            gif_filter(plan, fps),
            "-an".to_string(),
            "-f".to_string(),
            "gif".to_string(),
            path_arg(&plan.output_path),
        ]);
        self.run(&args).await?;
        let bytes = read_output(&plan.output_path).await?;
        let limit = self.settings.gif_size_limit_bytes;
        if bytes.len() as u64 >= limit {
            return Err(EncodeError::SizeCeilingExceeded {
                size_bytes: bytes.len() as u64,
                limit_bytes: limit,
            });
        }
        Ok(bytes)
    }

    async fn run(&self, args: &[String]) -> EncodeResult<()> {
        let program = &self.settings.ffmpeg_path;
        debug!(program = %program.display(), args = ?args, "running encoder");
        let output = self
            .executor
            .run(program, args)
            .await
            .map_err(|source| EncodeError::Spawn {
                source,
                program: program.clone(),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostic = tail_lines(&stderr, DIAGNOSTIC_LINES);
        if diagnostic.is_empty() {
            diagnostic = format!("exited with status {:?}", output.status.code());
        }
        Err(EncodeError::Encoder { diagnostic })
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
        ]
    }
}

/// Crop first so pixel offsets refer to the source frame, then resample
/// and build a palette from the same frames.
fn gif_filter(plan: &FilterPlan, fps: u32) -> String {
    let mut chain: Vec<String> = plan.crop.filter().into_iter().collect();
    chain.push(format!("fps={fps}"));
    chain.push(plan.scale.filter());
    chain.push("split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse".to_string());
    chain.join(",")
}

fn push_input(args: &mut Vec<String>, plan: &FilterPlan) {
    if let Some(start) = &plan.trim_start {
        args.push("-ss".to_string());
        args.push(start.clone());
    }
    args.push("-i".to_string());
    args.push(path_arg(&plan.input_path));
    if let Some(duration) = &plan.trim_duration {
        args.push("-t".to_string());
        args.push(duration.clone());
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

async fn stage_input(buffer: &[u8], path: &Path) -> EncodeResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| EncodeError::Io {
                source,
                path: parent.to_path_buf(),
            })?;
    }
    fs::write(path, buffer)
        .await
        .map_err(|source| EncodeError::Io {
            source,
            path: path.to_path_buf(),
        })
}

async fn read_output(path: &Path) -> EncodeResult<Vec<u8>> {
    fs::read(path).await.map_err(|source| EncodeError::Io {
        source,
        path: path.to_path_buf(),
    })
}

async fn remove_if_present(path: &Path) -> EncodeResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(EncodeError::Io {
            source,
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{CropGeometry, ScaleTarget};
    use std::path::PathBuf;

    fn plan(crop: CropGeometry) -> FilterPlan {
        FilterPlan {
            crop,
            scale: ScaleTarget { width: 320 },
            quality: None,
            trim_start: Some("00:00:05".into()),
            trim_duration: Some("3".into()),
            strip_audio: false,
            input_path: PathBuf::from("/tmp/1_0_input.mp4"),
            output_path: PathBuf::from("/tmp/1_0_output.gif"),
            output_kind: OutputKind::Gif,
        }
    }

    #[test]
    fn gif_filter_crops_before_palette() {
        let filter = gif_filter(&plan(CropGeometry { top: 40, bottom: 20 }), 25);
        assert_eq!(
            filter,
            "crop=in_w:in_h-60:0:40,fps=25,scale=320:-2:flags=lanczos,split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse"
        );
        let uncropped = gif_filter(&plan(CropGeometry::default()), 10);
        assert!(uncropped.starts_with("fps=10,"));
    }

    #[test]
    fn trim_wraps_the_input() {
        let mut args = Vec::new();
        push_input(&mut args, &plan(CropGeometry::default()));
        assert_eq!(
            args,
            vec!["-ss", "00:00:05", "-i", "/tmp/1_0_input.mp4", "-t", "3"]
        );
    }

    #[tokio::test]
    async fn jpg_plans_are_not_encoded() {
        let transcoder = Transcoder::new(Arc::new(EncoderSection::default()), None);
        let mut still = plan(CropGeometry::default());
        still.output_kind = OutputKind::Jpg;

        let err = transcoder.encode(b"frames", &still).await.unwrap_err();

        assert!(matches!(err, EncodeError::UnsupportedKind(OutputKind::Jpg)));
    }

    #[test]
    fn diagnostic_keeps_last_lines() {
        let stderr = "a\n\nb\nc\nd\n";
        assert_eq!(tail_lines(stderr, 2), "c\nd");
        assert_eq!(tail_lines("", 2), "");
    }
}
