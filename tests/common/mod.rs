// SPDX-License-Identifier: MPL-2.0

//! Collaborators shared by the integration tests
//!
//! [`MockCamera`] wraps the synthetic driver, counts lifecycle calls and can
//! be scripted to report hardware timeouts. [`CountingFactory`] wraps the
//! default encoder factory and counts encoder creation and drops.

#![allow(dead_code)]

use picam_mjpeg::backends::camera::{
    BackendResult, CameraConfiguration, CameraControls, CameraDriver, CameraMsg, StreamId,
    StreamInfo, StreamRole, SyntheticCamera,
};
use picam_mjpeg::config::{Codec, Config, PathOptions};
use picam_mjpeg::errors::EncoderError;
use picam_mjpeg::media::encoders::{
    DefaultEncoderFactory, EncodeInput, Encoder, EncoderContext, EncoderFactory,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Lifecycle calls seen by [`MockCamera`]
#[derive(Debug, Default, Clone)]
pub struct CameraLog {
    pub configures: u32,
    pub teardowns: u32,
    pub starts: u32,
    pub stops: u32,
    pub waits: u32,
    pub injected_timeouts: u32,
    /// Role sets in configure order
    pub layouts: Vec<Vec<StreamRole>>,
}

pub struct MockCamera {
    inner: SyntheticCamera,
    log: Arc<Mutex<CameraLog>>,
    /// 1-based wait calls answered with a timeout
    timeouts_at: BTreeSet<u32>,
}

impl MockCamera {
    pub fn new() -> Self {
        Self {
            inner: SyntheticCamera::new(),
            log: Arc::default(),
            timeouts_at: BTreeSet::new(),
        }
    }

    pub fn with_timeout_at(mut self, wait: u32) -> Self {
        self.timeouts_at.insert(wait);
        self
    }

    /// Handle to the call log that survives moving the camera into a session
    pub fn log(&self) -> Arc<Mutex<CameraLog>> {
        Arc::clone(&self.log)
    }
}

impl CameraDriver for MockCamera {
    fn camera_model(&self) -> &str {
        self.inner.camera_model()
    }

    fn generate_configuration(&mut self, roles: &[StreamRole]) -> Option<CameraConfiguration> {
        self.inner.generate_configuration(roles)
    }

    fn configure(&mut self, config: &mut CameraConfiguration) -> BackendResult<()> {
        self.inner.configure(config)?;
        let mut log = self.log.lock().unwrap();
        log.configures += 1;
        log.layouts.push(config.roles());
        Ok(())
    }

    fn teardown(&mut self) -> BackendResult<()> {
        self.inner.teardown()?;
        self.log.lock().unwrap().teardowns += 1;
        Ok(())
    }

    fn stream_info(&self, stream: StreamId) -> Option<StreamInfo> {
        self.inner.stream_info(stream)
    }

    fn start(&mut self, controls: &CameraControls) -> BackendResult<()> {
        self.inner.start(controls)?;
        self.log.lock().unwrap().starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        self.inner.stop()?;
        self.log.lock().unwrap().stops += 1;
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> CameraMsg {
        let wait = {
            let mut log = self.log.lock().unwrap();
            log.waits += 1;
            log.waits
        };
        if self.timeouts_at.contains(&wait) {
            self.log.lock().unwrap().injected_timeouts += 1;
            return CameraMsg::Timeout;
        }
        self.inner.wait(timeout)
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

/// Encoder creations and drops per role
#[derive(Debug, Default)]
pub struct EncoderCounts {
    pub video_created: AtomicU32,
    pub video_dropped: AtomicU32,
    pub lores_created: AtomicU32,
    pub lores_dropped: AtomicU32,
    /// Creations that saw a stream without geometry
    pub unconfigured: AtomicU32,
}

impl EncoderCounts {
    pub fn video(&self) -> (u32, u32) {
        (
            self.video_created.load(Ordering::SeqCst),
            self.video_dropped.load(Ordering::SeqCst),
        )
    }

    pub fn lores(&self) -> (u32, u32) {
        (
            self.lores_created.load(Ordering::SeqCst),
            self.lores_dropped.load(Ordering::SeqCst),
        )
    }
}

pub struct CountingFactory {
    inner: DefaultEncoderFactory,
    counts: Arc<EncoderCounts>,
}

impl CountingFactory {
    pub fn new() -> (Self, Arc<EncoderCounts>) {
        let counts = Arc::new(EncoderCounts::default());
        (
            Self {
                inner: DefaultEncoderFactory,
                counts: Arc::clone(&counts),
            },
            counts,
        )
    }
}

struct CountedEncoder {
    inner: Box<dyn Encoder>,
    dropped: Arc<EncoderCounts>,
    role: StreamRole,
}

impl Encoder for CountedEncoder {
    fn encode(&mut self, input: EncodeInput) -> Result<(), EncoderError> {
        self.inner.encode(input)
    }
}

impl Drop for CountedEncoder {
    fn drop(&mut self) {
        let counter = match self.role {
            StreamRole::VideoRecording => &self.dropped.video_dropped,
            _ => &self.dropped.lores_dropped,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

impl EncoderFactory for CountingFactory {
    fn create(
        &self,
        role: StreamRole,
        options: &PathOptions,
        info: &StreamInfo,
        ctx: EncoderContext,
    ) -> Result<Box<dyn Encoder>, EncoderError> {
        if !info.is_configured() {
            self.counts.unconfigured.fetch_add(1, Ordering::SeqCst);
        }
        let inner = self.inner.create(role, options, info, ctx)?;
        let counter = match role {
            StreamRole::VideoRecording => &self.counts.video_created,
            _ => &self.counts.lores_created,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountedEncoder {
            inner,
            dropped: Arc::clone(&self.counts),
            role,
        }))
    }
}

/// Small, fast configuration writing everything under `dir`
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.media_path = dir.to_path_buf();
    config.capture.width = 320;
    config.capture.height = 240;
    config.capture.framerate = 100.0;
    config.capture.buffer_count = 4;
    config.capture.camera_timeout_ms = 2000;
    config.preview.width = 160;
    config.preview.height = 120;
    config.preview.output = dir.join("preview/cam.jpg").to_string_lossy().into_owned();
    config.video.codec = Codec::Mjpeg;
    config.video.output = "vi_%v.mjpeg".into();
    config.still.output = "im_%i.jpg".into();
    config.still.width = 320;
    config.still.height = 240;
    config.control.fifo = None;
    config.control.fifo_interval_ms = 0;
    config.control.signals = false;
    config.control.settings_file = Some(dir.join("settings.toml"));
    config
}

/// Sorted names of regular files in `dir` with the given extension
pub fn files_with_extension(dir: &Path, ext: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().extension().is_some_and(|x| x == ext))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
