// SPDX-License-Identifier: GPL-3.0-only

//! Demo cycle phases
//!
//! The demo mode walks a fixed sequence of output combinations, holding each
//! for one phase:
//!
//! ```text
//! None0 ─▶ Video0 ─▶ None1 ─▶ Image ─▶ None2 ─▶ Video1PrePhoto ─▶ Video1PostPhoto ─▶ None3 ─▶ exit
//! preview  +video    preview  still    preview  +video            +video (after still)  preview
//! ```
//!
//! `Image` lasts a single frame. Time is measured from the previous
//! transition, and [`DemoCycle::step`] makes at most one transition per call.

use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputState {
    #[default]
    None0,
    Video0,
    None1,
    Image,
    None2,
    Video1PrePhoto,
    Video1PostPhoto,
    None3,
}

impl OutputState {
    /// Whether the video path records during this phase
    pub fn records_video(&self) -> bool {
        matches!(
            self,
            OutputState::Video0 | OutputState::Video1PrePhoto | OutputState::Video1PostPhoto
        )
    }
}

/// What the dispatcher must do for a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoAction {
    StartVideo,
    StopVideo,
    SaveImage,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct DemoCycle {
    state: OutputState,
    phase: Duration,
    last_transition: Instant,
}

impl DemoCycle {
    pub fn new(phase: Duration, now: Instant) -> Self {
        Self {
            state: OutputState::None0,
            phase,
            last_transition: now,
        }
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    /// Advance at most one phase
    pub fn step(&mut self, now: Instant) -> Option<DemoAction> {
        let elapsed = now.saturating_duration_since(self.last_transition);
        let due = elapsed > self.phase;

        let (next, action) = match self.state {
            OutputState::Image => (OutputState::None2, None),
            _ if !due => return None,
            OutputState::None0 => (OutputState::Video0, Some(DemoAction::StartVideo)),
            OutputState::Video0 => (OutputState::None1, Some(DemoAction::StopVideo)),
            OutputState::None1 => (OutputState::Image, Some(DemoAction::SaveImage)),
            OutputState::None2 => (OutputState::Video1PrePhoto, Some(DemoAction::StartVideo)),
            OutputState::Video1PrePhoto => {
                (OutputState::Video1PostPhoto, Some(DemoAction::SaveImage))
            }
            OutputState::Video1PostPhoto => (OutputState::None3, Some(DemoAction::StopVideo)),
            OutputState::None3 => return Some(DemoAction::Shutdown),
        };

        info!(from = ?self.state, to = ?next, "Demo phase");
        self.state = next;
        self.last_transition = now;
        action
    }
}
