// SPDX-License-Identifier: GPL-3.0-only

//! Dispatcher loop
//!
//! One iteration per camera frame:
//!
//! 1. read one control line when the poll interval has elapsed
//! 2. sample signals and keypresses
//! 3. dispatch at most one pending control command
//! 4. wait for the next frame, restarting the camera on a hardware timeout
//! 5. check the exit conditions
//! 6. route the frame to lores and video, feed motion detection
//! 7. advance the demo cycle, surface encoder faults, capture a pending still

use crate::backends::camera::{CameraDriver, CameraMsg};
use crate::config::{Config, ConfigBuilder, LoopMode};
use crate::control::settings::{self, PersistedSettings};
use crate::control::{CommandSource, FifoCommand, KeyEvent, KeySource};
use crate::errors::AppResult;
use crate::pipelines::motion::MotionDetector;
use crate::session::{CaptureSession, DemoAction, DemoCycle, EncodePath};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// `capture.timeout_ms` elapsed
    Timeout,
    /// `capture.frames` frames processed
    FrameLimit,
    /// Shutdown key or signal
    Shutdown,
    /// `RU 0`
    Stopped,
    /// The demo cycle finished
    DemoComplete,
    /// The camera driver asked to quit
    CameraQuit,
}

pub struct EventLoop<C: CameraDriver> {
    session: CaptureSession<C>,
    /// Config before persisted settings, reused on restart
    base_config: Config,
    settings_path: Option<PathBuf>,
    commands: Option<Box<dyn CommandSource>>,
    keys: KeySource,
    /// Key sampled on an iteration whose frame wait timed out
    held_key: KeyEvent,
    fifo_interval: Duration,
    last_poll: Option<Instant>,
    pending: Option<FifoCommand>,
    frame_limit: u64,
    timeout: Option<Duration>,
    split: Option<Duration>,
    auto_stop: Option<Instant>,
    demo: Option<DemoCycle>,
    demo_phase: Duration,
    motion: Option<MotionDetector>,
    frames: u64,
}

impl<C: CameraDriver> EventLoop<C> {
    /// `config` is the effective configuration; `base_config` is the same
    /// without persisted settings
    pub fn new(session: CaptureSession<C>, base_config: Config, config: &Config) -> Self {
        let split = match config.video.split_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs.into())),
        };
        let timeout = match config.capture.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        Self {
            session,
            base_config,
            settings_path: config.settings_path(),
            commands: None,
            keys: KeySource::new(config.control.keypress, config.control.signals),
            held_key: KeyEvent::None,
            fifo_interval: Duration::from_millis(config.control.fifo_interval_ms),
            last_poll: None,
            pending: None,
            frame_limit: config.capture.frames,
            timeout,
            split,
            auto_stop: None,
            demo: None,
            demo_phase: Duration::from_millis(config.control.demo_phase_ms),
            motion: config.motion.enabled.then(|| MotionDetector::new(&config.motion)),
            frames: 0,
        }
        .with_mode(config.control.mode)
    }

    fn with_mode(mut self, mode: LoopMode) -> Self {
        if mode == LoopMode::Demo {
            self.demo = Some(DemoCycle::new(self.demo_phase, Instant::now()));
        }
        self
    }

    pub fn with_commands(mut self, source: Box<dyn CommandSource>) -> Self {
        self.commands = Some(source);
        self
    }

    pub fn session(&self) -> &CaptureSession<C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CaptureSession<C> {
        &mut self.session
    }

    pub fn into_session(self) -> CaptureSession<C> {
        self.session
    }

    /// Frames routed so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Start streaming and run until an exit condition
    pub fn run(&mut self) -> AppResult<LoopExit> {
        self.session.start()?;
        let started = Instant::now();
        if let Some(demo) = self.demo.as_mut() {
            *demo = DemoCycle::new(self.demo_phase, started);
        }
        info!(mode = if self.demo.is_some() { "demo" } else { "interactive" }, "Capture running");

        loop {
            self.poll_commands();
            let key = match std::mem::take(&mut self.held_key) {
                KeyEvent::None => self.keys.poll(),
                held => held,
            };
            if let Some(command) = self.pending.take()
                && let Some(exit) = self.dispatch(command)?
            {
                return Ok(exit);
            }
            self.check_video_deadlines()?;

            let request = match self.session.wait(self.session.camera_timeout()) {
                CameraMsg::RequestComplete(request) => request,
                CameraMsg::Timeout => {
                    error!("Device timeout detected, restarting camera");
                    self.session.restart_camera()?;
                    self.held_key = key;
                    continue;
                }
                CameraMsg::Quit => {
                    info!("Camera requested quit");
                    self.session.stop_all()?;
                    return Ok(LoopExit::CameraQuit);
                }
            };

            if key == KeyEvent::PauseToggle {
                self.session.toggle_video_pause();
            }

            trace!(frame = self.frames, sequence = request.sequence, "Frame");
            let timed_out =
                self.frame_limit == 0 && self.timeout.is_some_and(|t| started.elapsed() > t);
            let frame_limit = self.frame_limit > 0 && self.frames >= self.frame_limit;
            if timed_out || frame_limit || key == KeyEvent::Shutdown {
                let exit = if timed_out {
                    info!(timeout = ?self.timeout, "Halting: reached timeout");
                    LoopExit::Timeout
                } else if frame_limit {
                    info!(frames = self.frames, "Halting: reached frame limit");
                    LoopExit::FrameLimit
                } else {
                    info!("Halting: shutdown requested");
                    LoopExit::Shutdown
                };
                drop(request);
                self.session.stop_all()?;
                return Ok(exit);
            }

            self.session.route_request(&request)?;
            if let Some(motion) = self.motion.as_mut()
                && let Some((data, info)) = self.session.lores_view(&request)
            {
                motion.process(data, &info);
            }

            if let Some(exit) = self.demo_step()? {
                drop(request);
                self.session.stop_all()?;
                return Ok(exit);
            }

            self.session.check_faults()?;

            if self.session.is_still_pending() {
                let path = self.session.capture_still(&request)?;
                debug!(path = %path.display(), "Still capture complete");
                if let Some(motion) = self.motion.as_mut() {
                    motion.reset();
                }
            }
            self.frames += 1;
        }
    }

    fn poll_commands(&mut self) {
        if self.pending.is_some() {
            return;
        }
        let Some(source) = self.commands.as_mut() else {
            return;
        };
        let now = Instant::now();
        if self
            .last_poll
            .is_some_and(|last| now.duration_since(last) < self.fifo_interval)
        {
            return;
        }
        self.last_poll = Some(now);
        if let Some(line) = source.poll_line() {
            let command = crate::control::parse(&line);
            debug!(line = %line, ?command, "Control command");
            self.pending = Some(command);
        }
    }

    /// Act on one control command; `Some` ends the loop
    fn dispatch(&mut self, command: FifoCommand) -> AppResult<Option<LoopExit>> {
        match command {
            FifoCommand::Run(false) => {
                info!("Stop requested");
                self.session.stop_all()?;
                return Ok(Some(LoopExit::Stopped));
            }
            FifoCommand::Run(true) => {
                let config = self.reload_config()?;
                self.session.restart_session(&config)?;
                self.auto_stop = None;
                if let Some(motion) = self.motion.as_mut() {
                    motion.reset();
                }
            }
            FifoCommand::Capture { start: false, .. } => {
                self.auto_stop = None;
                if self.session.is_running(EncodePath::Video) {
                    self.session.stop_path(EncodePath::Video)?;
                }
            }
            FifoCommand::Capture {
                start: true,
                auto_stop,
            } => {
                if self.session.is_running(EncodePath::Video) {
                    self.auto_stop = None;
                    self.session.stop_path(EncodePath::Video)?;
                } else {
                    self.session.start_path(EncodePath::Video)?;
                    self.auto_stop = auto_stop.map(|d| Instant::now() + d);
                }
            }
            FifoCommand::Image => self.session.request_still_capture(),
            FifoCommand::SplitInterval(split) => {
                info!(?split, "Video split interval");
                self.split = split;
            }
            FifoCommand::Setting(setting) => match &self.settings_path {
                Some(path) => {
                    if let Err(w) = settings::persist(path, setting) {
                        warn!("{}", w);
                    } else {
                        info!(?setting, "Setting saved for next restart");
                    }
                }
                None => warn!(?setting, "No settings file, setting dropped"),
            },
            FifoCommand::Unknown(e) => warn!(error = %e, "Ignoring control command"),
        }
        Ok(None)
    }

    /// Base config with the persisted settings folded in again
    fn reload_config(&self) -> AppResult<Config> {
        let mut builder = ConfigBuilder::from_config(self.base_config.clone());
        if let Some(path) = &self.settings_path {
            builder = builder.with_settings(&PersistedSettings::load(path));
        }
        builder.build()
    }

    /// Auto-stop and split timers of the running recording
    fn check_video_deadlines(&mut self) -> AppResult<()> {
        if !self.session.is_running(EncodePath::Video) {
            return Ok(());
        }
        if self.auto_stop.is_some_and(|deadline| Instant::now() >= deadline) {
            info!("Recording auto-stop reached");
            self.auto_stop = None;
            return self.session.stop_path(EncodePath::Video);
        }
        if let Some(split) = self.split
            && self.session.video_elapsed().is_some_and(|e| e >= split)
        {
            info!(?split, "Splitting recording");
            self.session.stop_path(EncodePath::Video)?;
            self.session.start_path(EncodePath::Video)?;
        }
        Ok(())
    }

    fn demo_step(&mut self) -> AppResult<Option<LoopExit>> {
        let Some(demo) = self.demo.as_mut() else {
            return Ok(None);
        };
        match demo.step(Instant::now()) {
            // Control commands may already have moved the recording
            Some(DemoAction::StartVideo) => {
                if self.session.is_running(EncodePath::Video) {
                    debug!("Demo recording already running");
                } else {
                    self.session.start_path(EncodePath::Video)?;
                }
            }
            Some(DemoAction::StopVideo) => {
                self.auto_stop = None;
                if self.session.is_running(EncodePath::Video) {
                    self.session.stop_path(EncodePath::Video)?;
                } else {
                    debug!("Demo recording already stopped");
                }
            }
            Some(DemoAction::SaveImage) => self.session.request_still_capture(),
            Some(DemoAction::Shutdown) => {
                info!("Demo cycle complete");
                return Ok(Some(LoopExit::DemoComplete));
            }
            None => {}
        }
        Ok(None)
    }
}
