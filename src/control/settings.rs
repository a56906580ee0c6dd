// SPDX-License-Identifier: GPL-3.0-only

//! Numeric settings persisted by FIFO commands
//!
//! Settings commands never touch the live camera. They are written to a small
//! TOML file and folded into the configuration on the next session restart.

use crate::config::Config;
use crate::errors::PersistenceWarning;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// One persisted setting
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setting {
    Brightness(f32),
    Sharpness(f32),
    Contrast(f32),
    Saturation(f32),
    Rotation(u32),
    ShutterUs(u32),
    Bitrate(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    pub brightness: Option<f32>,
    pub sharpness: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    pub rotation: Option<u32>,
    pub shutter_us: Option<u32>,
    pub bitrate: Option<u32>,
}

impl PersistedSettings {
    /// Read the settings file; a missing or unreadable file yields no settings
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring malformed settings file");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read settings file");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistenceWarning> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceWarning::new("settings directory", parent, e))?;
        }
        let text = toml::to_string(self).map_err(|e| {
            PersistenceWarning::new(
                "settings file",
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        std::fs::write(path, text).map_err(|e| PersistenceWarning::new("settings file", path, e))?;
        debug!(path = %path.display(), "Settings persisted");
        Ok(())
    }

    pub fn set(&mut self, setting: Setting) {
        match setting {
            Setting::Brightness(v) => self.brightness = Some(v),
            Setting::Sharpness(v) => self.sharpness = Some(v),
            Setting::Contrast(v) => self.contrast = Some(v),
            Setting::Saturation(v) => self.saturation = Some(v),
            Setting::Rotation(v) => self.rotation = Some(v),
            Setting::ShutterUs(v) => self.shutter_us = Some(v),
            Setting::Bitrate(v) => self.bitrate = Some(v),
        }
    }

    /// Fold the stored values into a configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(v) = self.brightness {
            config.tuning.brightness = v;
        }
        if let Some(v) = self.sharpness {
            config.tuning.sharpness = v;
        }
        if let Some(v) = self.contrast {
            config.tuning.contrast = v;
        }
        if let Some(v) = self.saturation {
            config.tuning.saturation = v;
        }
        if let Some(v) = self.rotation {
            config.capture.rotation = v;
        }
        if let Some(v) = self.shutter_us {
            config.tuning.shutter_us = v;
        }
        if let Some(v) = self.bitrate {
            config.video.bitrate = v;
        }
    }
}

/// Record one setting in the file at `path`, keeping the others
pub fn persist(path: &Path, setting: Setting) -> Result<PersistedSettings, PersistenceWarning> {
    let mut settings = PersistedSettings::load(path);
    settings.set(setting);
    settings.save(path)?;
    Ok(settings)
}
