use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// What a user asked for, fixed once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaRequest {
    pub source_url: String,
    pub start_time: Option<String>,
    pub duration: Option<String>,
    pub crop_top: Option<u32>,
    pub crop_bottom: Option<u32>,
    pub as_gif: bool,
    pub no_audio: bool,
}

impl MediaRequest {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            start_time: None,
            duration: None,
            crop_top: None,
            crop_bottom: None,
            as_gif: false,
            no_audio: false,
        }
    }

    pub fn wants_crop(&self) -> bool {
        self.crop_top.is_some() || self.crop_bottom.is_some()
    }
}

/// Chat text broken into its flags. The URL is optional because replies
/// inside a confirmation loop usually carry only new crop values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedCommand {
    pub url: Option<String>,
    pub start_time: Option<String>,
    pub duration: Option<String>,
    pub crop_top: Option<u32>,
    pub crop_bottom: Option<u32>,
    pub as_gif: bool,
    pub no_audio: bool,
}

impl ParsedCommand {
    pub fn parse(text: &str) -> Self {
        let patterns = patterns();
        let capture = |regex: &Regex| {
            regex
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        };
        let pixels = |regex: &Regex| capture(regex).and_then(|value| parse_pixels(&value));

        let vertical = pixels(&patterns.vertical);
        Self {
            url: patterns.url.find(text).map(|m| m.as_str().to_string()),
            start_time: capture(&patterns.start),
            duration: capture(&patterns.duration),
            crop_top: pixels(&patterns.top).or(vertical),
            crop_bottom: pixels(&patterns.bottom).or(vertical),
            as_gif: patterns.gif.is_match(text),
            no_audio: patterns.no_audio.is_match(text),
        }
    }

    pub fn has_directives(&self) -> bool {
        self.start_time.is_some()
            || self.duration.is_some()
            || self.crop_top.is_some()
            || self.crop_bottom.is_some()
            || self.as_gif
            || self.no_audio
    }

    /// Builds a request, taking the URL from `fallback_url` when the text had none.
    pub fn into_request(self, fallback_url: Option<&str>) -> Option<MediaRequest> {
        let source_url = self.url.clone().or_else(|| fallback_url.map(str::to_string))?;
        Some(self.with_source(source_url))
    }

    /// Builds a request for `source_url`, ignoring any URL in the text.
    pub fn into_request_on(self, source_url: &str) -> MediaRequest {
        self.with_source(source_url.to_string())
    }

    fn with_source(self, source_url: String) -> MediaRequest {
        MediaRequest {
            source_url,
            start_time: self.start_time,
            duration: self.duration,
            crop_top: self.crop_top,
            crop_bottom: self.crop_bottom,
            as_gif: self.as_gif,
            no_audio: self.no_audio,
        }
    }
}

struct Patterns {
    url: Regex,
    start: Regex,
    duration: Regex,
    top: Regex,
    bottom: Regex,
    vertical: Regex,
    gif: Regex,
    no_audio: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("static pattern compiles");
        Patterns {
            url: compile(r"https?://\S+"),
            start: compile(r"-start\s+([0-9:.]+)"),
            duration: compile(r"-duration\s+([0-9:.]+)"),
            top: compile(r"-top\s+([0-9.]+)"),
            bottom: compile(r"-bot\s+([0-9.]+)"),
            vertical: compile(r"-vertical\s+([0-9.]+)"),
            gif: compile(r"-gif\b"),
            no_audio: compile(r"-na\b"),
        }
    })
}

fn parse_pixels(value: &str) -> Option<u32> {
    let parsed: f64 = value.parse().ok()?;
    if parsed.is_finite() && parsed >= 0.0 {
        Some(parsed.floor() as u32)
    } else {
        None
    }
}
