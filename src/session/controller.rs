// SPDX-License-Identifier: GPL-3.0-only

//! Capture session controller
//!
//! Owns the camera, the one live stream layout and the encoder paths bound to
//! it. The ordering rules it enforces:
//!
//! - a layout is only committed while the camera is stopped and no layout is live
//! - a path is only started once its stream is part of the live layout
//! - every path is dropped (encoder joined, buffers released) before teardown
//!
//! ```text
//!            configure_streams          start_camera
//! (no layout) ───────────────▶ Configured ───────────▶ Streaming
//!      ▲                        │  ▲  start_path/stop_path │
//!      └──────── teardown ──────┘  └───── stop_camera ─────┘
//! ```

use crate::backends::camera::{
    CameraConfiguration, CameraControls, CameraDriver, CameraMsg, ColorSpace, CompletedRequest,
    CompletedRequestPtr, PixelFormat, Size, StreamId, StreamInfo, StreamRole, Transform,
};
use crate::config::{Config, PathOptions, StillOptions, StillPolicy, StillSource};
use crate::constants;
use crate::errors::{AppResult, BufferError, CameraError, ConfigurationError, SessionError};
use crate::media::encoders::{EncoderContext, EncoderFactory};
use crate::media::outputs::{create_output, shared};
use crate::naming::{self, NameContext};
use crate::pipelines::encode_path::{EncoderAdapter, FaultSlot, PendingEncodeQueue};
use crate::pipelines::photo::{ImageSaver, StillFrame, advance_counter};
use crate::storage::{CounterStore, MediaCounters};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Encoding paths that hold camera buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodePath {
    Video,
    Lores,
}

impl EncodePath {
    pub fn stream_role(&self) -> StreamRole {
        match self {
            EncodePath::Video => StreamRole::VideoRecording,
            EncodePath::Lores => StreamRole::Viewfinder,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            EncodePath::Video => "video",
            EncodePath::Lores => "lores",
        }
    }
}

/// Which set of roles a layout was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// Video + lores (+ raw), used while streaming
    Steady,
    /// Reconfigured for a single still
    Still,
}

/// The committed camera configuration
#[derive(Debug, Clone)]
pub struct StreamLayout {
    pub kind: LayoutKind,
    pub config: CameraConfiguration,
}

impl StreamLayout {
    pub fn stream(&self, role: StreamRole) -> Option<StreamId> {
        self.config.stream_for(role).map(|(id, _)| id)
    }

    pub fn roles(&self) -> Vec<StreamRole> {
        self.config.roles()
    }
}

/// A running path bound to its stream
pub struct StreamBinding {
    pub path: EncodePath,
    adapter: EncoderAdapter,
}

impl StreamBinding {
    pub fn stream(&self) -> StreamId {
        self.adapter.stream()
    }

    pub fn pending(&self) -> usize {
        self.adapter.pending()
    }
}

/// Lifecycle counts, mostly for tests and the exit summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub configurations: u32,
    pub teardowns: u32,
    pub camera_starts: u32,
    pub camera_stops: u32,
    pub camera_restarts: u32,
    pub video_starts: u32,
    pub video_stops: u32,
    pub lores_starts: u32,
    pub lores_stops: u32,
    pub stills_saved: u32,
}

pub struct CaptureSession<C: CameraDriver> {
    camera: C,
    factory: Box<dyn EncoderFactory>,
    video_options: PathOptions,
    lores_options: PathOptions,
    still_options: StillOptions,
    controls: CameraControls,
    transform: Transform,
    camera_timeout: Duration,
    saver: ImageSaver,
    layout: Option<StreamLayout>,
    // Paths are dropped before the layout they are bound to
    video: Option<StreamBinding>,
    lores: Option<StreamBinding>,
    video_started: Option<Instant>,
    still_pending: bool,
    store: CounterStore,
    counters: MediaCounters,
    faults: FaultSlot,
    stats: SessionStats,
}

impl<C: CameraDriver> CaptureSession<C> {
    /// Build a session from `config`; nothing touches the camera yet
    pub fn new(camera: C, factory: Box<dyn EncoderFactory>, config: &Config) -> AppResult<Self> {
        let store = CounterStore::new(&config.media_path);
        let counters = store.load();
        info!(
            video = counters.video,
            image = counters.image,
            path = %store.path().display(),
            "Counters loaded"
        );
        let still_options = config.still_options();
        let saver = ImageSaver::new(still_options.clone(), camera.camera_model());
        let session = Self {
            camera,
            factory,
            video_options: config.video_options(),
            lores_options: config.lores_options(),
            still_options,
            controls: config.camera_controls(),
            transform: transform_for(config)?,
            camera_timeout: config.camera_timeout(),
            saver,
            layout: None,
            video: None,
            lores: None,
            video_started: None,
            still_pending: false,
            store,
            counters,
            faults: FaultSlot::new(),
            stats: SessionStats::default(),
        };
        session.validate_still_source()?;
        Ok(session)
    }

    /// A no-teardown still must come from a stream of the steady layout
    fn validate_still_source(&self) -> Result<(), ConfigurationError> {
        if self.still_options.policy != StillPolicy::NoTeardown {
            return Ok(());
        }
        let role = self.still_options.source.role();
        if self.steady_roles().contains(&role) {
            Ok(())
        } else {
            Err(ConfigurationError::StillSourceUnavailable(role))
        }
    }

    // ===== Accessors =====

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }

    pub fn counters(&self) -> MediaCounters {
        self.counters
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn layout(&self) -> Option<&StreamLayout> {
        self.layout.as_ref()
    }

    pub fn is_running(&self, path: EncodePath) -> bool {
        self.binding(path).is_some()
    }

    pub fn binding(&self, path: EncodePath) -> Option<&StreamBinding> {
        match path {
            EncodePath::Video => self.video.as_ref(),
            EncodePath::Lores => self.lores.as_ref(),
        }
    }

    pub fn is_still_pending(&self) -> bool {
        self.still_pending
    }

    /// How long the current recording has been running
    pub fn video_elapsed(&self) -> Option<Duration> {
        self.video_started.map(|t| t.elapsed())
    }

    pub fn camera_timeout(&self) -> Duration {
        self.camera_timeout
    }

    fn slot(&mut self, path: EncodePath) -> &mut Option<StreamBinding> {
        match path {
            EncodePath::Video => &mut self.video,
            EncodePath::Lores => &mut self.lores,
        }
    }

    // ===== Layout =====

    /// Roles of the layout used while streaming
    pub fn steady_roles(&self) -> Vec<StreamRole> {
        let mut roles = vec![StreamRole::VideoRecording, StreamRole::Viewfinder];
        if self.still_options.raw {
            roles.push(StreamRole::Raw);
        }
        roles
    }

    /// Roles of the layout a teardown still is captured with
    pub fn still_roles(&self) -> Vec<StreamRole> {
        let mut roles = match self.still_options.source {
            StillSource::Still => vec![StreamRole::StillCapture],
            StillSource::Raw => vec![StreamRole::Raw],
            StillSource::Video => vec![StreamRole::VideoRecording],
            StillSource::Lores => vec![StreamRole::VideoRecording, StreamRole::Viewfinder],
        };
        if self.still_options.raw && !roles.contains(&StreamRole::Raw) {
            roles.push(StreamRole::Raw);
        }
        roles
    }

    fn buffer_count(&self) -> u32 {
        match self.video_options.buffer_count {
            0 => constants::video::BUFFER_COUNT,
            n => n,
        }
    }

    /// Generate, adjust and commit a configuration for `roles`
    pub fn configure_streams(&mut self, roles: &[StreamRole], kind: LayoutKind) -> AppResult<()> {
        if self.layout.is_some() {
            return Err(SessionError::InvalidTransition {
                operation: "configure streams",
                reason: "a configuration is already live".into(),
            }
            .into());
        }
        if self.camera.is_running() {
            return Err(SessionError::InvalidTransition {
                operation: "configure streams",
                reason: "camera is running".into(),
            }
            .into());
        }

        let label = match kind {
            LayoutKind::Steady => "steady",
            LayoutKind::Still => "still",
        };
        let mut config = self
            .camera
            .generate_configuration(roles)
            .ok_or(ConfigurationError::GenerateFailed(label))?;

        let buffer_count = self.buffer_count();
        if let Some(video) = config.stream_mut(StreamRole::VideoRecording) {
            video.pixel_format = PixelFormat::Yuv420;
            video.buffer_count = buffer_count;
            let requested = self.video_options.size;
            if requested.width > 0 {
                video.size.width = requested.width;
            }
            if requested.height > 0 {
                video.size.height = requested.height;
            }
            video.color_space = Some(
                if video.size.width >= constants::video::HD_WIDTH
                    || video.size.height >= constants::video::HD_HEIGHT
                {
                    ColorSpace::Rec709
                } else {
                    ColorSpace::Smpte170m
                },
            );
        }

        let video_size = config
            .stream_for(StreamRole::VideoRecording)
            .map(|(_, s)| s.size);
        if let Some(lores) = config.stream_mut(StreamRole::Viewfinder) {
            let size = self.lores_options.size.aligned_down(2);
            if let Some(video_size) = video_size
                && size.exceeds(&video_size)
            {
                return Err(ConfigurationError::LoresLargerThanVideo {
                    lores: size,
                    video: video_size,
                }
                .into());
            }
            lores.pixel_format = PixelFormat::Yuv420;
            lores.size = size;
            lores.buffer_count = buffer_count;
            lores.color_space = Some(ColorSpace::Sycc);
        }

        let still_size = self.still_options.size;
        if let Some(still) = config.stream_mut(StreamRole::StillCapture) {
            if !still_size.is_empty() {
                still.size = still_size;
            }
            still.color_space = Some(ColorSpace::Sycc);
        }
        let mut sensor_size = None;
        if let Some(raw) = config.stream_mut(StreamRole::Raw) {
            if !still_size.is_empty() {
                raw.size = still_size;
            }
            raw.pixel_format = PixelFormat::RawGrbg10;
            raw.color_space = Some(ColorSpace::Raw);
            raw.buffer_count = buffer_count;
            sensor_size = Some(raw.size);
        }
        config.sensor_size = sensor_size;

        config.transform = self.transform;

        self.camera
            .configure(&mut config)
            .map_err(|e| ConfigurationError::Invalid(e.to_string()))?;
        info!(layout = label, roles = ?config.roles(), "Streams configured");
        for stream in &config.streams {
            debug!(
                role = %stream.role,
                size = %stream.size,
                format = %stream.pixel_format,
                buffers = stream.buffer_count,
                stride = stream.stride,
                "Stream"
            );
        }
        self.layout = Some(StreamLayout { kind, config });
        self.stats.configurations += 1;
        Ok(())
    }

    fn stream_info(&self, role: StreamRole) -> Result<(StreamId, StreamInfo), ConfigurationError> {
        let layout = self
            .layout
            .as_ref()
            .ok_or(ConfigurationError::StreamNotConfigured(role))?;
        let id = layout
            .stream(role)
            .ok_or(ConfigurationError::StreamNotConfigured(role))?;
        let info = self
            .camera
            .stream_info(id)
            .filter(StreamInfo::is_configured)
            .ok_or(ConfigurationError::StreamNotConfigured(role))?;
        Ok((id, info))
    }

    /// Release the live configuration
    ///
    /// Video and lores must already be stopped, and the camera too.
    pub fn teardown(&mut self) -> AppResult<()> {
        let running: Vec<&str> = [&self.video, &self.lores]
            .into_iter()
            .flatten()
            .map(|b| b.path.label())
            .collect();
        if !running.is_empty() {
            return Err(SessionError::InvalidTransition {
                operation: "tear down",
                reason: format!("{} still running", running.join(" and ")),
            }
            .into());
        }
        if self.camera.is_running() {
            return Err(SessionError::InvalidTransition {
                operation: "tear down",
                reason: "camera still running".into(),
            }
            .into());
        }
        self.camera.teardown()?;
        if self.layout.take().is_some() {
            self.stats.teardowns += 1;
            debug!("Configuration released");
        }
        Ok(())
    }

    /// Stop whatever is running, then release the configuration
    pub fn teardown_all(&mut self) -> AppResult<()> {
        self.stop_all()?;
        self.teardown()
    }

    // ===== Camera =====

    pub fn start_camera(&mut self) -> AppResult<()> {
        if self.layout.is_none() {
            return Err(SessionError::InvalidTransition {
                operation: "start camera",
                reason: "no configuration".into(),
            }
            .into());
        }
        self.camera.start(&self.controls)?;
        self.stats.camera_starts += 1;
        Ok(())
    }

    /// Stop the camera if it is running
    pub fn stop_camera(&mut self) -> AppResult<()> {
        if self.camera.is_running() {
            self.camera.stop()?;
            self.stats.camera_stops += 1;
        }
        Ok(())
    }

    /// Hardware timeout recovery: stop and start, layout unchanged
    pub fn restart_camera(&mut self) -> AppResult<()> {
        self.stop_camera()?;
        self.start_camera()?;
        self.stats.camera_restarts += 1;
        Ok(())
    }

    pub fn wait(&mut self, timeout: Duration) -> CameraMsg {
        self.camera.wait(timeout)
    }

    // ===== Paths =====

    /// Create the encoder for `path` on its stream of the live layout
    ///
    /// # Panics
    ///
    /// If the path is already running.
    pub fn start_path(&mut self, path: EncodePath) -> AppResult<()> {
        assert!(
            !self.is_running(path),
            "{} path started while already running",
            path.label()
        );
        let role = path.stream_role();
        let (stream, info) = self.stream_info(role)?;
        let options = match path {
            EncodePath::Video => &self.video_options,
            EncodePath::Lores => &self.lores_options,
        };

        let resolved = naming::resolve(
            &options.output,
            &options.media_path,
            &NameContext::now(self.counters.video, self.counters.image),
        );
        if let Some(parent) = resolved.parent()
            && !parent.as_os_str().is_empty()
            && !options.output.contains("://")
            && options.output != "-"
        {
            std::fs::create_dir_all(parent)?;
        }
        let sink = shared(create_output(options, &resolved)?);
        let queue = Arc::new(PendingEncodeQueue::default());
        let callbacks = EncoderAdapter::callbacks(
            role,
            &queue,
            &sink,
            options.metadata.is_some(),
            &self.faults,
        );
        let ctx = EncoderContext {
            callbacks,
            sink: Arc::clone(&sink),
        };
        let encoder = self.factory.create(role, options, &info, ctx)?;
        let adapter = EncoderAdapter::new(role, stream, info, queue, encoder, sink);

        info!(
            path = path.label(),
            output = %resolved.display(),
            size = %Size::new(info.width, info.height),
            "Path started"
        );
        *self.slot(path) = Some(StreamBinding { path, adapter });
        match path {
            EncodePath::Video => {
                self.video_started = Some(Instant::now());
                self.stats.video_starts += 1;
            }
            EncodePath::Lores => self.stats.lores_starts += 1,
        }
        Ok(())
    }

    /// Drop the encoder for `path`, flushing its output
    pub fn stop_path(&mut self, path: EncodePath) -> AppResult<()> {
        let binding = self
            .slot(path)
            .take()
            .ok_or(SessionError::NotRunning(path.label()))?;
        drop(binding);
        info!(path = path.label(), "Path stopped");

        match path {
            EncodePath::Video => {
                self.video_started = None;
                self.stats.video_stops += 1;
                self.counters.video += 1;
                self.persist_counters();
            }
            EncodePath::Lores => self.stats.lores_stops += 1,
        }
        Ok(())
    }

    fn stop_paths(&mut self) -> AppResult<()> {
        for path in [EncodePath::Video, EncodePath::Lores] {
            if self.is_running(path) {
                self.stop_path(path)?;
            }
        }
        Ok(())
    }

    /// Stop the camera, then every running path
    pub fn stop_all(&mut self) -> AppResult<()> {
        self.stop_camera()?;
        self.stop_paths()?;
        self.saver.stop();
        Ok(())
    }

    /// Configure the steady layout and start lores and the camera
    pub fn start(&mut self) -> AppResult<()> {
        let roles = self.steady_roles();
        self.configure_streams(&roles, LayoutKind::Steady)?;
        self.start_path(EncodePath::Lores)?;
        self.start_camera()
    }

    /// Full restart with a new configuration, used by `RU 1`
    pub fn restart_session(&mut self, config: &Config) -> AppResult<()> {
        info!("Restarting session");
        self.teardown_all()?;
        self.video_options = config.video_options();
        self.lores_options = config.lores_options();
        self.still_options = config.still_options();
        self.controls = config.camera_controls();
        self.camera_timeout = config.camera_timeout();
        self.transform = transform_for(config)?;
        self.saver = ImageSaver::new(self.still_options.clone(), self.camera.camera_model());
        self.still_pending = false;
        self.validate_still_source()?;
        self.start()
    }

    // ===== Per frame =====

    /// Hand `request` to lores (unless a still is pending) and to video
    pub fn route_request(&mut self, request: &CompletedRequestPtr) -> AppResult<()> {
        if !self.still_pending
            && let Some(lores) = self.lores.as_mut()
        {
            lores.adapter.encode_buffer(request)?;
        }
        if let Some(video) = self.video.as_mut() {
            video.adapter.encode_buffer(request)?;
        }
        Ok(())
    }

    /// Lores luma view of `request`, for motion analysis
    pub fn lores_view<'r>(&self, request: &'r CompletedRequest) -> Option<(&'r [u8], StreamInfo)> {
        let layout = self.layout.as_ref()?;
        let id = layout.stream(StreamRole::Viewfinder)?;
        let info = self.camera.stream_info(id)?;
        Some((request.buffer(id)?.span(), info))
    }

    pub fn toggle_video_pause(&mut self) {
        match self.video.as_ref() {
            Some(video) => video.adapter.signal(),
            None => debug!("Pause toggle ignored, video not running"),
        }
    }

    /// Surface the first error raised on an encoder thread
    pub fn check_faults(&self) -> AppResult<()> {
        match self.faults.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ===== Stills =====

    pub fn request_still_capture(&mut self) {
        if self.still_pending {
            debug!("Still capture already pending");
        }
        self.still_pending = true;
    }

    /// Perform the pending still under the configured policy
    pub fn capture_still(&mut self, current: &CompletedRequestPtr) -> AppResult<PathBuf> {
        self.still_pending = false;
        match self.still_options.policy {
            StillPolicy::NoTeardown => self.save_still(current),
            StillPolicy::Teardown => self.capture_still_with_teardown(),
        }
    }

    fn capture_still_with_teardown(&mut self) -> AppResult<PathBuf> {
        let resume_video = self.is_running(EncodePath::Video);
        info!(resume_video, "Reconfiguring for still capture");

        self.stop_camera()?;
        self.stop_paths()?;
        self.teardown()?;

        let roles = self.still_roles();
        self.configure_streams(&roles, LayoutKind::Still)?;
        self.start_camera()?;
        let request = self.wait_for_frame()?;
        let saved = self.save_still(&request);
        drop(request);
        self.stop_camera()?;
        self.teardown()?;

        let roles = self.steady_roles();
        self.configure_streams(&roles, LayoutKind::Steady)?;
        self.start_path(EncodePath::Lores)?;
        if resume_video {
            self.start_path(EncodePath::Video)?;
        }
        self.start_camera()?;
        saved
    }

    /// Block for one frame, restarting the camera on hardware timeouts
    fn wait_for_frame(&mut self) -> AppResult<CompletedRequestPtr> {
        loop {
            match self.camera.wait(self.camera_timeout) {
                CameraMsg::RequestComplete(request) => return Ok(request),
                CameraMsg::Timeout => {
                    error!("Device timeout during still capture, restarting camera");
                    self.restart_camera()?;
                }
                CameraMsg::Quit => return Err(CameraError::Disconnected.into()),
            }
        }
    }

    fn still_frame(
        &self,
        request: &CompletedRequest,
        role: StreamRole,
    ) -> AppResult<StillFrame> {
        let (id, info) = self.stream_info(role)?;
        let buffer = request.buffer(id).ok_or(BufferError::Missing(role))?;
        if buffer.span().is_empty() {
            return Err(BufferError::Unmapped(role).into());
        }
        // Shares the plane memory; the request buffer is only read
        Ok(StillFrame::new(
            Arc::clone(&buffer.data),
            buffer.bytes_used,
            info,
            request.metadata.clone(),
        ))
    }

    fn save_still(&mut self, request: &CompletedRequest) -> AppResult<PathBuf> {
        let role = self.still_options.source.role();
        let frame = self.still_frame(request, role)?;
        let raw = if self.still_options.raw && role != StreamRole::Raw {
            match self.still_frame(request, StreamRole::Raw) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!(error = %e, "Raw companion frame unavailable");
                    None
                }
            }
        } else {
            None
        };

        let path = self
            .saver
            .save(frame, raw, self.counters.video, self.counters.image)?;
        self.counters.image = advance_counter(self.counters.image, self.still_options.wrap);
        self.stats.stills_saved += 1;
        self.persist_counters();
        Ok(path)
    }

    fn persist_counters(&self) {
        if let Err(w) = self.store.save(&self.counters) {
            warn!("{}", w);
        }
    }
}

fn transform_for(config: &Config) -> Result<Transform, ConfigurationError> {
    let capture = &config.capture;
    Transform::from_options(capture.rotation, capture.hflip, capture.vflip).ok_or(
        ConfigurationError::InvalidValue {
            field: "capture.rotation",
            message: format!("{} (only 0 and 180 are supported)", capture.rotation),
        },
    )
}

impl<C: CameraDriver> Drop for CaptureSession<C> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown_all() {
            warn!(error = %e, "Session did not shut down cleanly");
        }
    }
}
