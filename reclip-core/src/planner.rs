use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::EncoderSection;
use crate::request::MediaRequest;
use crate::scratch::ScratchNamer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Mp4,
    Gif,
    Jpg,
}

impl OutputKind {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputKind::Mp4 => "mp4",
            OutputKind::Gif => "gif",
            OutputKind::Jpg => "jpg",
        }
    }
}

/// Rows removed from the top and bottom of the frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CropGeometry {
    pub top: u32,
    pub bottom: u32,
}

impl CropGeometry {
    pub fn is_empty(&self) -> bool {
        self.top == 0 && self.bottom == 0
    }

    pub fn removed_rows(&self) -> u32 {
        self.top.saturating_add(self.bottom)
    }

    /// Height left after cropping, or `None` when nothing would remain.
    pub fn output_height(&self, source_height: u32) -> Option<u32> {
        source_height
            .checked_sub(self.removed_rows())
            .filter(|height| *height > 0)
    }

    pub fn filter(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(format!(
            "crop=in_w:in_h-{}:0:{}",
            self.removed_rows(),
            self.top
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleTarget {
    pub width: u32,
}

impl ScaleTarget {
    /// `-2` keeps the aspect ratio and rounds the height to an even number.
    pub fn filter(&self) -> String {
        format!("scale={}:-2:flags=lanczos", self.width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityParams {
    pub crf: u8,
    pub bitrate_kbps: u32,
    pub maxrate_kbps: u32,
    pub bufsize_kbps: u32,
}

impl QualityParams {
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "-crf".into(),
            self.crf.to_string(),
            "-b:v".into(),
            format!("{}k", self.bitrate_kbps),
            "-maxrate".into(),
            format!("{}k", self.maxrate_kbps),
            "-bufsize".into(),
            format!("{}k", self.bufsize_kbps),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterPlan {
    pub crop: CropGeometry,
    pub scale: ScaleTarget,
    pub quality: Option<QualityParams>,
    pub trim_start: Option<String>,
    pub trim_duration: Option<String>,
    pub strip_audio: bool,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub output_kind: OutputKind,
}

impl FilterPlan {
    /// Crop followed by scale, the `-vf` chain for video and still output.
    pub fn video_filter(&self) -> String {
        self.crop
            .filter()
            .into_iter()
            .chain(std::iter::once(self.scale.filter()))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Single-frame variant: same crop and start, narrower scale, no
    /// quality overrides, no duration.
    pub fn as_preview(&self, width: u32) -> FilterPlan {
        FilterPlan {
            crop: self.crop,
            scale: ScaleTarget { width },
            quality: None,
            trim_start: self.trim_start.clone(),
            trim_duration: None,
            strip_audio: true,
            input_path: self.input_path.clone(),
            output_path: self.output_path.with_extension(OutputKind::Jpg.extension()),
            output_kind: OutputKind::Jpg,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterPlanner {
    settings: Arc<EncoderSection>,
    namer: ScratchNamer,
}

impl FilterPlanner {
    pub fn new(settings: Arc<EncoderSection>, namer: ScratchNamer) -> Self {
        Self { settings, namer }
    }

    pub fn settings(&self) -> &EncoderSection {
        &self.settings
    }

    pub fn plan(&self, request: &MediaRequest, source_size_bytes: u64) -> FilterPlan {
        let output_kind = if request.as_gif {
            OutputKind::Gif
        } else {
            OutputKind::Mp4
        };
        let width = match output_kind {
            OutputKind::Mp4 => self.settings.mp4_scale_width,
            OutputKind::Gif => self.settings.gif_scale_width,
            OutputKind::Jpg => self.settings.preview_scale_width,
        };
        let quality = match output_kind {
            OutputKind::Mp4 => adaptive_quality(source_size_bytes, &self.settings),
            OutputKind::Gif | OutputKind::Jpg => None,
        };
        let (input_path, output_path) = self.namer.next_pair(output_kind.extension());
        FilterPlan {
            crop: CropGeometry {
                top: request.crop_top.unwrap_or(0),
                bottom: request.crop_bottom.unwrap_or(0),
            },
            scale: ScaleTarget { width },
            quality,
            trim_start: request.start_time.as_deref().map(normalize_timecode),
            trim_duration: request.duration.as_deref().map(normalize_timecode),
            strip_audio: request.no_audio,
            input_path,
            output_path,
            output_kind,
        }
    }
}

/// Lowers quality in proportion to how far the source overshoots the safe
/// threshold. Below the threshold the encoder keeps its defaults.
pub fn adaptive_quality(source_size_bytes: u64, settings: &EncoderSection) -> Option<QualityParams> {
    let threshold = settings.safe_threshold_bytes;
    if threshold == 0 || source_size_bytes <= threshold {
        return None;
    }
    let ratio = source_size_bytes as f64 / threshold as f64;
    let raised = settings.base_crf as f64 + ((ratio - 1.0) * settings.crf_slope).floor();
    let crf = raised.min(settings.crf_ceiling as f64).max(settings.base_crf as f64) as u8;
    let bitrate_kbps = ((settings.base_bitrate_kbps as f64 / ratio).floor() as u32)
        .max(settings.bitrate_floor_kbps);
    Some(QualityParams {
        crf,
        bitrate_kbps,
        maxrate_kbps: (bitrate_kbps as f64 * settings.maxrate_factor).round() as u32,
        bufsize_kbps: (bitrate_kbps as f64 * settings.bufsize_factor).round() as u32,
    })
}

/// Large second counts become `HH:MM:SS`; colon forms get every component
/// zero-padded. Anything else passes through untouched.
pub fn normalize_timecode(raw: &str) -> String {
    let raw = raw.trim();
    if !raw.contains(':') {
        let (whole, fraction) = split_fraction(raw);
        return match whole.parse::<u64>() {
            Ok(seconds) if seconds > 60 => {
                let clock = format!(
                    "{:02}:{:02}:{:02}",
                    seconds / 3600,
                    (seconds % 3600) / 60,
                    seconds % 60
                );
                match fraction {
                    Some(fraction) => format!("{clock}.{fraction}"),
                    None => clock,
                }
            }
            _ => raw.to_string(),
        };
    }
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [hours, minutes, seconds] => format!(
            "{}:{}:{}",
            pad2(hours),
            pad2(minutes),
            pad_seconds(seconds)
        ),
        [minutes, seconds] => format!("00:{}:{}", pad2(minutes), pad_seconds(seconds)),
        _ => raw.to_string(),
    }
}

fn split_fraction(value: &str) -> (&str, Option<&str>) {
    match value.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (value, None),
    }
}

fn pad2(component: &str) -> String {
    format!("{component:0>2}")
}

fn pad_seconds(seconds: &str) -> String {
    match split_fraction(seconds) {
        (whole, Some(fraction)) => format!("{}.{fraction}", pad2(whole)),
        (whole, None) => pad2(whole),
    }
}
