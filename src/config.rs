// SPDX-License-Identifier: GPL-3.0-only

//! Daemon configuration
//!
//! A single immutable [`Config`] made of named sections. It is assembled once
//! by [`ConfigBuilder`] from, lowest priority first:
//!
//! 1. built-in defaults
//! 2. the TOML config file
//! 3. command line overrides
//! 4. settings persisted by FIFO commands
//!
//! Each encoding path then works from its own snapshot ([`PathOptions`],
//! [`StillOptions`]) cloned out of the config when the session starts.

use crate::backends::camera::{CameraControls, Size, StreamRole};
use crate::constants;
use crate::control::settings::PersistedSettings;
use crate::errors::{AppResult, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Video/preview codec
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// H.264 through GStreamer, falls back to MJPEG when not compiled in
    #[default]
    H264,
    /// Motion JPEG, one JPEG per frame
    Mjpeg,
    /// Raw YUV420 frames, no compression
    Yuv420,
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" => Ok(Codec::H264),
            "mjpeg" => Ok(Codec::Mjpeg),
            "yuv420" => Ok(Codec::Yuv420),
            other => Err(format!("unknown codec {}", other)),
        }
    }
}

/// Still image file encoding
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StillEncoding {
    #[default]
    Jpg,
    Png,
    Bmp,
    Yuv420,
}

impl StillEncoding {
    pub fn extension(&self) -> &'static str {
        match self {
            StillEncoding::Jpg => "jpg",
            StillEncoding::Png => "png",
            StillEncoding::Bmp => "bmp",
            StillEncoding::Yuv420 => "yuv",
        }
    }
}

/// How a still capture obtains its frame
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StillPolicy {
    /// Stop everything, reconfigure for the still, then restore
    #[default]
    Teardown,
    /// Save straight from a stream that is already running
    NoTeardown,
}

/// Which stream the still path saves from
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StillSource {
    /// Dedicated full resolution still stream
    #[default]
    Still,
    /// Raw sensor stream, saved as DNG
    Raw,
    /// The video recording stream
    Video,
    /// The lores preview stream
    Lores,
}

impl StillSource {
    pub fn role(&self) -> StreamRole {
        match self {
            StillSource::Still => StreamRole::StillCapture,
            StillSource::Raw => StreamRole::Raw,
            StillSource::Video => StreamRole::VideoRecording,
            StillSource::Lores => StreamRole::Viewfinder,
        }
    }
}

/// What drives state changes in the dispatcher
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Commands from the control FIFO
    #[default]
    Interactive,
    /// Fixed timed cycle through preview, video and stills
    Demo,
}

/// Camera sensor and stream geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    /// Video stream width, 0 for the driver default
    pub width: u32,
    pub height: u32,
    pub framerate: f32,
    /// 0 keeps the built-in count
    pub buffer_count: u32,
    /// 0 or 180
    pub rotation: u32,
    pub hflip: bool,
    pub vflip: bool,
    /// Stop after this long, 0 to run until told otherwise
    pub timeout_ms: u64,
    /// Stop after this many frames, 0 for no limit; takes precedence over `timeout_ms`
    pub frames: u64,
    /// Longest wait for one frame before the camera is restarted
    pub camera_timeout_ms: u64,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            framerate: constants::video::FRAMERATE,
            buffer_count: 0,
            rotation: 0,
            hflip: false,
            vflip: false,
            timeout_ms: 0,
            frames: 0,
            camera_timeout_ms: constants::CAMERA_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Video recording path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSection {
    /// Filename template or `udp://` / `tcp://` target
    pub output: String,
    pub codec: Codec,
    /// Bits per second, 0 for the encoder default
    pub bitrate: u32,
    /// MJPEG quality when the video codec is MJPEG
    pub quality: u8,
    /// Keyframe interval in frames, 0 for the encoder default
    pub intra: u32,
    /// Start a new numbered file every N ms, 0 for one file
    pub segment_ms: u32,
    /// Restart the recording every N seconds, 0 to disable
    pub split_secs: u32,
    /// JSON-lines metadata file written alongside the recording
    pub metadata: Option<PathBuf>,
    /// Listen instead of connecting for `tcp://` targets
    pub listen: bool,
}

impl Default for VideoSection {
    fn default() -> Self {
        Self {
            output: constants::DEFAULT_VIDEO_TEMPLATE.to_string(),
            codec: Codec::H264,
            bitrate: 0,
            quality: constants::lores::QUALITY,
            intra: 0,
            segment_ms: 0,
            split_secs: 0,
            metadata: None,
            listen: false,
        }
    }
}

/// Lores preview path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSection {
    pub width: u32,
    pub height: u32,
    pub output: String,
    pub quality: u8,
    pub metadata: Option<PathBuf>,
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            width: constants::lores::WIDTH,
            height: constants::lores::HEIGHT,
            output: constants::DEFAULT_PREVIEW_OUTPUT.to_string(),
            quality: constants::lores::QUALITY,
            metadata: None,
        }
    }
}

/// Still capture path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StillSection {
    /// Filename template
    pub output: String,
    /// Still size, 0 for full sensor
    pub width: u32,
    pub height: u32,
    pub encoding: StillEncoding,
    pub quality: u8,
    /// Also capture the raw stream and save stills from it as DNG
    pub raw: bool,
    /// Symlink refreshed to point at the newest still
    pub latest: Option<PathBuf>,
    pub policy: StillPolicy,
    pub source: StillSource,
    /// Name stills `MMDDhhmmss.<ext>` inside the output folder
    pub datetime: bool,
    /// Name stills `<unix seconds>.<ext>` inside the output folder
    pub timestamp: bool,
    /// Wrap the image counter at this value, 0 to never wrap
    pub wrap: u32,
}

impl Default for StillSection {
    fn default() -> Self {
        Self {
            output: constants::DEFAULT_IMAGE_TEMPLATE.to_string(),
            width: 0,
            height: 0,
            encoding: StillEncoding::Jpg,
            quality: constants::still::QUALITY,
            raw: false,
            latest: None,
            policy: StillPolicy::Teardown,
            source: StillSource::Still,
            datetime: false,
            timestamp: false,
            wrap: 0,
        }
    }
}

/// Control channel, signals and loop mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSection {
    /// Command FIFO, `None` disables it
    pub fifo: Option<PathBuf>,
    pub fifo_interval_ms: u64,
    /// Read Enter / `x` from stdin
    pub keypress: bool,
    /// Honour SIGUSR1 / SIGUSR2 / SIGPIPE
    pub signals: bool,
    /// Where FIFO settings commands are persisted
    pub settings_file: Option<PathBuf>,
    pub mode: LoopMode,
    /// Demo cycle phase length
    pub demo_phase_ms: u64,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            fifo: Some(PathBuf::from(constants::DEFAULT_FIFO_PATH)),
            fifo_interval_ms: constants::FIFO_POLL_INTERVAL.as_millis() as u64,
            keypress: false,
            signals: true,
            settings_file: None,
            mode: LoopMode::Interactive,
            demo_phase_ms: constants::DEMO_PHASE.as_millis() as u64,
        }
    }
}

/// Motion detection on the lores stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSection {
    pub enabled: bool,
    /// Per-pixel luma difference ignored as noise
    pub noise: u8,
    /// Changed pixels per thousand that count as motion
    pub threshold: u32,
    /// Frames ignored after start while exposure settles
    pub init_frames: u32,
    /// Consecutive motion frames before an event starts
    pub start_frames: u32,
    /// Consecutive quiet frames before an event ends
    pub stop_frames: u32,
    /// FIFO receiving `1` / `0` event lines
    pub pipe: PathBuf,
}

impl Default for MotionSection {
    fn default() -> Self {
        Self {
            enabled: false,
            noise: constants::motion::NOISE,
            threshold: constants::motion::THRESHOLD,
            init_frames: constants::motion::INIT_FRAMES,
            start_frames: constants::motion::START_FRAMES,
            stop_frames: constants::motion::STOP_FRAMES,
            pipe: PathBuf::from(constants::DEFAULT_MOTION_PIPE),
        }
    }
}

/// Image tuning applied on camera start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningSection {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub sharpness: f32,
    /// Fixed shutter in microseconds, 0 for auto exposure
    pub shutter_us: u32,
}

impl Default for TuningSection {
    fn default() -> Self {
        let c = CameraControls::default();
        Self {
            brightness: c.brightness,
            contrast: c.contrast,
            saturation: c.saturation,
            sharpness: c.sharpness,
            shutter_us: c.shutter_us,
        }
    }
}

/// Complete daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for relative output templates and persisted counters
    pub media_path: PathBuf,
    pub capture: CaptureSection,
    pub video: VideoSection,
    pub preview: PreviewSection,
    pub still: StillSection,
    pub control: ControlSection,
    pub motion: MotionSection,
    pub tuning: TuningSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media_path: PathBuf::from(constants::DEFAULT_MEDIA_PATH),
            capture: CaptureSection::default(),
            video: VideoSection::default(),
            preview: PreviewSection::default(),
            still: StillSection::default(),
            control: ControlSection::default(),
            motion: MotionSection::default(),
            tuning: TuningSection::default(),
        }
    }
}

/// Snapshot driving one encoder path
#[derive(Debug, Clone, PartialEq)]
pub struct PathOptions {
    /// Requested stream size, zero fields keep the driver default
    pub size: Size,
    pub buffer_count: u32,
    pub framerate: f32,
    pub codec: Codec,
    pub quality: u8,
    pub bitrate: u32,
    pub intra: u32,
    /// Output template or network target
    pub output: String,
    pub segment_ms: u32,
    /// Overwrite one file per frame through a temporary name
    pub replace_each_frame: bool,
    pub metadata: Option<PathBuf>,
    pub listen: bool,
    pub media_path: PathBuf,
}

/// Snapshot driving the still path
#[derive(Debug, Clone, PartialEq)]
pub struct StillOptions {
    pub size: Size,
    pub output: String,
    pub encoding: StillEncoding,
    pub quality: u8,
    pub raw: bool,
    pub latest: Option<PathBuf>,
    pub policy: StillPolicy,
    pub source: StillSource,
    pub datetime: bool,
    pub timestamp: bool,
    pub wrap: u32,
    pub media_path: PathBuf,
}

impl Config {
    /// Options for the video recording path
    pub fn video_options(&self) -> PathOptions {
        PathOptions {
            size: Size::new(self.capture.width, self.capture.height),
            buffer_count: self.capture.buffer_count,
            framerate: self.capture.framerate,
            codec: self.video.codec,
            quality: self.video.quality,
            bitrate: self.video.bitrate,
            intra: self.video.intra,
            output: self.video.output.clone(),
            segment_ms: self.video.segment_ms,
            replace_each_frame: false,
            metadata: self.video.metadata.clone(),
            listen: self.video.listen,
            media_path: self.media_path.clone(),
        }
    }

    /// Options for the lores MJPEG preview path
    pub fn lores_options(&self) -> PathOptions {
        PathOptions {
            size: Size::new(self.preview.width, self.preview.height),
            buffer_count: self.capture.buffer_count,
            framerate: self.capture.framerate,
            codec: Codec::Mjpeg,
            quality: self.preview.quality,
            bitrate: 0,
            intra: 0,
            output: self.preview.output.clone(),
            segment_ms: 0,
            replace_each_frame: true,
            metadata: self.preview.metadata.clone(),
            listen: false,
            media_path: self.media_path.clone(),
        }
    }

    /// Options for still capture
    pub fn still_options(&self) -> StillOptions {
        StillOptions {
            size: Size::new(self.still.width, self.still.height),
            output: self.still.output.clone(),
            encoding: self.still.encoding,
            quality: self.still.quality,
            raw: self.still.raw || self.still.source == StillSource::Raw,
            latest: self.still.latest.clone(),
            policy: self.still.policy,
            source: self.still.source,
            datetime: self.still.datetime,
            timestamp: self.still.timestamp,
            wrap: self.still.wrap,
            media_path: self.media_path.clone(),
        }
    }

    /// Controls handed to the camera on every start
    pub fn camera_controls(&self) -> CameraControls {
        CameraControls {
            brightness: self.tuning.brightness,
            contrast: self.tuning.contrast,
            saturation: self.tuning.saturation,
            sharpness: self.tuning.sharpness,
            shutter_us: self.tuning.shutter_us,
            framerate: self.capture.framerate,
        }
    }

    pub fn camera_timeout(&self) -> Duration {
        Duration::from_millis(self.capture.camera_timeout_ms.max(1))
    }

    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(constants::CONFIG_DIR_NAME)
                .join(constants::CONFIG_FILE_NAME)
        })
    }

    /// Default location of the FIFO settings file
    pub fn default_settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(constants::CONFIG_DIR_NAME)
                .join(constants::SETTINGS_FILE_NAME)
        })
    }

    /// Settings file in effect, configured or default
    pub fn settings_path(&self) -> Option<PathBuf> {
        self.control
            .settings_file
            .clone()
            .or_else(Self::default_settings_path)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        fn invalid(field: &'static str, message: impl Into<String>) -> ConfigurationError {
            ConfigurationError::InvalidValue {
                field,
                message: message.into(),
            }
        }

        if !constants::ranges::ROTATIONS.contains(&self.capture.rotation) {
            return Err(invalid(
                "capture.rotation",
                format!("{} (only 0 and 180 are supported)", self.capture.rotation),
            ));
        }
        if !(self.capture.framerate > 0.0) {
            return Err(invalid("capture.framerate", "must be positive"));
        }
        for (field, q) in [
            ("video.quality", self.video.quality),
            ("preview.quality", self.preview.quality),
            ("still.quality", self.still.quality),
        ] {
            if !(1..=100).contains(&q) {
                return Err(invalid(field, format!("{} not in 1..=100", q)));
            }
        }
        if self.preview.width == 0 || self.preview.height == 0 {
            return Err(invalid("preview", "lores size must be non-zero"));
        }
        if self.still.policy == StillPolicy::NoTeardown && self.still.source == StillSource::Still
        {
            // The dedicated still stream only exists in the teardown layout
            return Err(ConfigurationError::StillSourceUnavailable(
                StreamRole::StillCapture,
            ));
        }
        if self.control.mode == LoopMode::Demo && self.control.demo_phase_ms == 0 {
            return Err(invalid("control.demo_phase_ms", "must be positive"));
        }
        Ok(())
    }
}

/// Layered configuration builder
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue layering on top of an already assembled config
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Merge a TOML config file over the current values
    ///
    /// A missing file is an error only when `required` is set.
    pub fn with_file(mut self, path: &Path, required: bool) -> AppResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(self);
            }
            Err(e) => {
                return Err(ConfigurationError::File {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
                .into());
            }
        };

        let file_value: toml::Value =
            toml::from_str(&text).map_err(|e| ConfigurationError::File {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let mut merged = toml::Value::try_from(&self.config).map_err(|e| {
            ConfigurationError::File {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        merge_toml(&mut merged, file_value);
        self.config = merged.try_into().map_err(|e: toml::de::Error| {
            ConfigurationError::File {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;

        info!(path = %path.display(), "Loaded config file");
        Ok(self)
    }

    /// Apply programmatic overrides (command line flags)
    pub fn with_overrides(mut self, apply: impl FnOnce(&mut Config)) -> Self {
        apply(&mut self.config);
        self
    }

    /// Apply settings persisted by FIFO commands
    pub fn with_settings(mut self, settings: &PersistedSettings) -> Self {
        settings.apply(&mut self.config);
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> AppResult<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Recursive table merge, `overlay` wins
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
