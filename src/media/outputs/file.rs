// SPDX-License-Identifier: GPL-3.0-only

use super::FrameWriter;
use crate::errors::OutputError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

enum Sink {
    File(BufWriter<File>),
    Stdout(std::io::Stdout),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::File(f) => f,
            Sink::Stdout(s) => s,
        }
    }
}

/// `clip.h264` -> `clip_0003.h264`
pub fn segment_path(base: &Path, index: u32) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{}_{:04}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}_{:04}", stem, index),
    };
    base.with_file_name(name)
}

/// Appends every frame to a file or stdout
///
/// With a segment length the output rolls over to the next numbered file on
/// the first keyframe past the boundary, so every segment starts decodable.
pub struct FileWriter {
    sink: Sink,
    base: PathBuf,
    segment_us: i64,
    segment_index: u32,
    segment_start_us: Option<i64>,
}

impl FileWriter {
    pub fn create(path: &Path, segment_ms: u32) -> Result<Self, OutputError> {
        let segment_us = segment_ms as i64 * 1000;
        let first = if segment_us > 0 {
            segment_path(path, 0)
        } else {
            path.to_path_buf()
        };
        let sink = Sink::File(open(&first)?);
        info!(path = %first.display(), "Recording to file");
        Ok(Self {
            sink,
            base: path.to_path_buf(),
            segment_us,
            segment_index: 0,
            segment_start_us: None,
        })
    }

    pub fn stdout() -> Self {
        Self {
            sink: Sink::Stdout(std::io::stdout()),
            base: PathBuf::from("-"),
            segment_us: 0,
            segment_index: 0,
            segment_start_us: None,
        }
    }

    fn roll_over(&mut self) -> Result<(), OutputError> {
        self.flush()?;
        self.segment_index += 1;
        let next = segment_path(&self.base, self.segment_index);
        self.sink = Sink::File(open(&next)?);
        debug!(path = %next.display(), "Started new segment");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> OutputError {
        OutputError::File {
            path: self.base.clone(),
            source,
        }
    }
}

fn open(path: &Path) -> Result<BufWriter<File>, OutputError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| OutputError::File {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| OutputError::File {
            path: path.to_path_buf(),
            source,
        })
}

impl FrameWriter for FileWriter {
    fn write_frame(
        &mut self,
        data: &[u8],
        timestamp_us: i64,
        keyframe: bool,
    ) -> Result<(), OutputError> {
        if self.segment_us > 0 && matches!(self.sink, Sink::File(_)) {
            match self.segment_start_us {
                None => self.segment_start_us = Some(timestamp_us),
                Some(start) if keyframe && timestamp_us - start >= self.segment_us => {
                    self.roll_over()?;
                    self.segment_start_us = Some(timestamp_us);
                }
                Some(_) => {}
            }
        }
        let result = self.sink.writer().write_all(data);
        result.map_err(|e| self.io_error(e))
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        let result = self.sink.writer().flush();
        result.map_err(|e| self.io_error(e))
    }
}
