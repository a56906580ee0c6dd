// SPDX-License-Identifier: GPL-3.0-only

//! Motion detection on the lores stream
//!
//! Each frame's luma plane is compared with the previous one. A pixel changed
//! when its difference exceeds `noise`; a frame has motion when more than
//! `threshold` pixels per thousand changed. Events start after `start_frames`
//! consecutive motion frames and end after `stop_frames` quiet ones, and are
//! announced on the motion pipe as `1` / `0` lines.

use crate::backends::camera::StreamInfo;
use crate::backends::camera::format_converters::luma_rows;
use crate::config::MotionSection;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use tracing::{debug, info};

/// Change in motion state reported by [`MotionDetector::process`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionEvent {
    Started,
    Stopped,
}

pub struct MotionDetector {
    noise: u8,
    threshold: u32,
    init_frames: u32,
    start_frames: u32,
    stop_frames: u32,
    pipe: Option<PathBuf>,
    previous: Option<Vec<u8>>,
    frames_seen: u32,
    motion_run: u32,
    quiet_run: u32,
    active: bool,
}

impl MotionDetector {
    pub fn new(section: &MotionSection) -> Self {
        Self {
            noise: section.noise,
            threshold: section.threshold,
            init_frames: section.init_frames,
            start_frames: section.start_frames.max(1),
            stop_frames: section.stop_frames.max(1),
            pipe: Some(section.pipe.clone()),
            previous: None,
            frames_seen: 0,
            motion_run: 0,
            quiet_run: 0,
            active: false,
        }
    }

    /// Detector that reports events without writing them anywhere
    pub fn without_pipe(mut self) -> Self {
        self.pipe = None;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Changed pixels per thousand between two luma planes of equal size
    fn changed_per_mille(&self, previous: &[u8], current: &[u8]) -> u32 {
        if current.is_empty() {
            return 0;
        }
        let changed = previous
            .iter()
            .zip(current)
            .filter(|(a, b)| a.abs_diff(**b) > self.noise)
            .count();
        ((changed * 1000) / current.len()) as u32
    }

    /// Analyse one lores YUV420 frame
    pub fn process(&mut self, data: &[u8], info: &StreamInfo) -> Option<MotionEvent> {
        let luma: Vec<u8> = luma_rows(data, info).flatten().copied().collect();
        let previous = self.previous.replace(luma);
        self.frames_seen = self.frames_seen.saturating_add(1);
        if self.frames_seen <= self.init_frames {
            return None;
        }
        let (Some(previous), Some(current)) = (previous, self.previous.as_deref()) else {
            return None;
        };
        if previous.len() != current.len() {
            // Geometry changed across a reconfigure
            return None;
        }

        let moving = self.changed_per_mille(&previous, current) > self.threshold;
        if moving {
            self.motion_run += 1;
            self.quiet_run = 0;
        } else {
            self.quiet_run += 1;
            self.motion_run = 0;
        }

        let event = if !self.active && self.motion_run >= self.start_frames {
            self.active = true;
            Some(MotionEvent::Started)
        } else if self.active && self.quiet_run >= self.stop_frames {
            self.active = false;
            Some(MotionEvent::Stopped)
        } else {
            None
        };

        if let Some(event) = event {
            info!(?event, "Motion");
            self.announce(event);
        }
        event
    }

    /// Forget the reference frame, e.g. after the stream was reconfigured
    pub fn reset(&mut self) {
        self.previous = None;
        self.motion_run = 0;
        self.quiet_run = 0;
    }

    fn announce(&self, event: MotionEvent) {
        let Some(pipe) = &self.pipe else {
            return;
        };
        let line: &[u8] = match event {
            MotionEvent::Started => b"1\n",
            MotionEvent::Stopped => b"0\n",
        };
        // Without a reader the non-blocking open fails; the event is dropped
        let written = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(pipe)
            .and_then(|mut f| f.write_all(line));
        if let Err(e) = written {
            debug!(pipe = %pipe.display(), error = %e, "Motion event not delivered");
        }
    }
}
