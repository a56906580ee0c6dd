// SPDX-License-Identifier: GPL-3.0-only

use super::FrameWriter;
use crate::errors::OutputError;
use std::path::{Path, PathBuf};

/// Writes each frame to `<path>.part` and renames it over `<path>`
///
/// Readers polling the preview file never see a half-written JPEG.
pub struct ReplaceFileWriter {
    path: PathBuf,
    part: PathBuf,
}

impl ReplaceFileWriter {
    pub fn new(path: &Path) -> Result<Self, OutputError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| OutputError::File {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut part = path.as_os_str().to_owned();
        part.push(".part");
        Ok(Self {
            path: path.to_path_buf(),
            part: PathBuf::from(part),
        })
    }
}

impl FrameWriter for ReplaceFileWriter {
    fn write_frame(&mut self, data: &[u8], _timestamp_us: i64, _keyframe: bool) -> Result<(), OutputError> {
        std::fs::write(&self.part, data).map_err(|source| OutputError::File {
            path: self.part.clone(),
            source,
        })?;
        std::fs::rename(&self.part, &self.path).map_err(|source| OutputError::File {
            path: self.path.clone(),
            source,
        })
    }
}
