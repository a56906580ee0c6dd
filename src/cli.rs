// SPDX-License-Identifier: GPL-3.0-only

//! Command line startup
//!
//! Folds the flags into the layered config and drives one capture run.

use crate::Cli;
use picam_mjpeg::backends::camera::SyntheticCamera;
use picam_mjpeg::config::{Config, ConfigBuilder};
use picam_mjpeg::control::settings::PersistedSettings;
use picam_mjpeg::control::{FifoChannel, signals};
use picam_mjpeg::errors::AppResult;
use picam_mjpeg::event_loop::{EventLoop, LoopExit};
use picam_mjpeg::media::encoders::DefaultEncoderFactory;
use picam_mjpeg::session::CaptureSession;
use picam_mjpeg::storage;
use tracing::{info, warn};

/// Default filter for the `-v` count
pub fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

impl Cli {
    /// Write every flag that was given over `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.media_path {
            config.media_path = path.clone();
        }

        let capture = &mut config.capture;
        if let Some(v) = self.width {
            capture.width = v;
        }
        if let Some(v) = self.height {
            capture.height = v;
        }
        if let Some(v) = self.framerate {
            capture.framerate = v;
        }
        if let Some(v) = self.buffer_count {
            capture.buffer_count = v;
        }
        if let Some(v) = self.rotation {
            capture.rotation = v;
        }
        capture.hflip |= self.hflip;
        capture.vflip |= self.vflip;
        if let Some(v) = self.timeout_ms {
            capture.timeout_ms = v;
        }
        if let Some(v) = self.frames {
            capture.frames = v;
        }

        if let Some(v) = self.lores_width {
            config.preview.width = v;
        }
        if let Some(v) = self.lores_height {
            config.preview.height = v;
        }
        if let Some(v) = &self.mjpeg_output {
            config.preview.output = v.clone();
        }
        if let Some(q) = self.quality {
            config.preview.quality = q;
            config.video.quality = q;
        }

        let video = &mut config.video;
        if let Some(v) = &self.video_output {
            video.output = v.clone();
        }
        if let Some(v) = self.codec {
            video.codec = v;
        }
        if let Some(v) = self.bitrate {
            video.bitrate = v;
        }
        if let Some(v) = self.split_secs {
            video.split_secs = v;
        }
        if let Some(v) = &self.metadata {
            video.metadata = Some(v.clone());
        }
        video.listen |= self.listen;

        let still = &mut config.still;
        if let Some(v) = &self.image_output {
            still.output = v.clone();
        }
        if let Some(v) = self.image_quality {
            still.quality = v;
        }
        if let Some(v) = self.encoding {
            still.encoding = v;
        }
        still.raw |= self.raw;
        if let Some(v) = &self.latest {
            still.latest = Some(v.clone());
        }
        if let Some(v) = self.still_policy {
            still.policy = v;
        }
        if let Some(v) = self.still_source {
            still.source = v;
        }

        let control = &mut config.control;
        if let Some(v) = &self.fifo {
            control.fifo = Some(v.clone());
        }
        if let Some(v) = self.fifo_interval_ms {
            control.fifo_interval_ms = v;
        }
        control.keypress |= self.keypress;
        if let Some(v) = self.mode {
            control.mode = v;
        }
        if let Some(v) = self.demo_phase_ms {
            control.demo_phase_ms = v;
        }
    }

    /// Defaults, config file and flags, without persisted settings
    pub fn base_config(&self) -> AppResult<Config> {
        let mut builder = ConfigBuilder::new();
        match (&self.config, Config::default_path()) {
            (Some(path), _) => builder = builder.with_file(path, true)?,
            (None, Some(path)) => builder = builder.with_file(&path, false)?,
            (None, None) => {}
        }
        builder.with_overrides(|c| self.apply(c)).build()
    }
}

/// Assemble the config and run the capture loop to completion
pub fn run(cli: &Cli) -> AppResult<LoopExit> {
    let base = cli.base_config()?;
    let mut builder = ConfigBuilder::from_config(base.clone());
    if let Some(path) = base.settings_path() {
        builder = builder.with_settings(&PersistedSettings::load(&path));
    }
    let config = builder.build()?;

    if config.control.signals {
        signals::install()?;
    }
    storage::ensure_media_path(&config.media_path);

    let camera = SyntheticCamera::new();
    let session = CaptureSession::new(camera, Box::new(DefaultEncoderFactory), &config)?;
    let mut event_loop = EventLoop::new(session, base, &config);

    if let Some(fifo) = &config.control.fifo {
        match FifoChannel::open(fifo) {
            Ok(channel) => {
                info!(path = %fifo.display(), "Listening for control commands");
                event_loop = event_loop.with_commands(Box::new(channel));
            }
            Err(e) => warn!(path = %fifo.display(), error = %e, "Control FIFO unavailable"),
        }
    }

    event_loop.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use picam_mjpeg::config::{Codec, StillPolicy, StillSource};

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("picam-mjpeg").chain(args.iter().copied()))
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&[
            "--width",
            "1920",
            "--codec",
            "mjpeg",
            "--still-policy",
            "no-teardown",
            "--still-source",
            "video",
            "--quality",
            "60",
            "--hflip",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.capture.width, 1920);
        assert_eq!(config.video.codec, Codec::Mjpeg);
        assert_eq!(config.still.policy, StillPolicy::NoTeardown);
        assert_eq!(config.still.source, StillSource::Video);
        assert_eq!(config.preview.quality, 60);
        assert!(config.capture.hflip);
    }

    #[test]
    fn test_absent_flags_keep_values() {
        let mut config = Config::default();
        config.capture.framerate = 15.0;
        config.still.raw = true;
        parse(&[]).apply(&mut config);
        assert_eq!(config.capture.framerate, 15.0);
        assert!(config.still.raw);
        assert_eq!(config, {
            let mut expected = Config::default();
            expected.capture.framerate = 15.0;
            expected.still.raw = true;
            expected
        });
    }

    #[test]
    fn test_flags_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[capture]\nwidth = 1280\nheight = 720\n").unwrap();
        let cli = parse(&["--config", path.to_str().unwrap(), "--width", "640"]);
        let config = cli.base_config().unwrap();
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.height, 720);
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let cli = parse(&["--config", dir.path().join("missing.toml").to_str().unwrap()]);
        assert!(cli.base_config().is_err());
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(log_level(0), "info");
        assert_eq!(log_level(1), "debug");
        assert_eq!(log_level(5), "trace");
    }
}
