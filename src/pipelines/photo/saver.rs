// SPDX-License-Identifier: GPL-3.0-only

//! Still image saver
//!
//! Names, encodes and writes one still per call. Raw stills are written as DNG
//! right away; the JPEG preview of a raw still is rendered on a background
//! thread, and [`ImageSaver::stop`] joins any that are still running.

use super::encoding::{self, EncodingFormat, StillFrame};
use crate::backends::camera::format_converters::grbg10_to_rgb;
use crate::config::StillOptions;
use crate::errors::{PersistenceWarning, PhotoError};
use crate::naming::{self, NameContext};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Next image counter value, wrapping at `wrap` when it is non-zero
pub fn advance_counter(count: u32, wrap: u32) -> u32 {
    let next = count.wrapping_add(1);
    if wrap > 0 { next % wrap } else { next }
}

/// Point `link` at `target`, replacing whatever was there
pub fn update_latest(link: &Path, target: &Path) -> Result<(), PersistenceWarning> {
    match std::fs::remove_file(link) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(PersistenceWarning::new("latest link", link, e)),
    }
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| PersistenceWarning::new("latest link", link, e))
}

pub struct ImageSaver {
    options: StillOptions,
    camera_model: String,
    converters: Vec<JoinHandle<()>>,
}

impl ImageSaver {
    pub fn new(options: StillOptions, camera_model: impl Into<String>) -> Self {
        Self {
            options,
            camera_model: camera_model.into(),
            converters: Vec::new(),
        }
    }

    pub fn options(&self) -> &StillOptions {
        &self.options
    }

    /// Output path for the next still, before any raw extension change
    pub fn still_path(&self, video_count: u32, image_count: u32) -> PathBuf {
        let format = EncodingFormat::from(self.options.encoding);
        let template_path = naming::resolve(
            &self.options.output,
            &self.options.media_path,
            &NameContext::now(video_count, image_count),
        );

        if !self.options.datetime && !self.options.timestamp {
            return template_path;
        }
        // Date and timestamp names go in the folder of the template
        let folder = template_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.options.media_path.clone());
        let stem = if self.options.datetime {
            Local::now().format("%m%d%H%M%S").to_string()
        } else {
            Local::now().timestamp().to_string()
        };
        folder.join(format!("{}.{}", stem, format.extension()))
    }

    /// Save `frame`, plus `raw` as DNG alongside when given
    ///
    /// Returns the primary file written.
    pub fn save(
        &mut self,
        frame: StillFrame,
        raw: Option<StillFrame>,
        video_count: u32,
        image_count: u32,
    ) -> Result<PathBuf, PhotoError> {
        self.reap();
        let path = self.still_path(video_count, image_count);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| PhotoError::SaveFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let saved = if frame.is_raw() {
            let dng_path = path.with_extension(EncodingFormat::Dng.extension());
            self.write_dng(&frame, &dng_path)?;
            self.spawn_preview(frame, path.with_extension(EncodingFormat::Jpeg.extension()));
            dng_path
        } else {
            let format = EncodingFormat::from(self.options.encoding);
            let data = encoding::encode(&frame, format, self.options.quality, &self.camera_model)?;
            write_file(&path, &data)?;
            if let Some(raw) = raw {
                self.write_dng(&raw, &path.with_extension(EncodingFormat::Dng.extension()))?;
            }
            path
        };

        info!(path = %saved.display(), image = image_count, "Still saved");
        if let Some(link) = &self.options.latest
            && let Err(w) = update_latest(link, &saved)
        {
            warn!("{}", w);
        }
        Ok(saved)
    }

    fn write_dng(&self, frame: &StillFrame, path: &Path) -> Result<(), PhotoError> {
        let data = encoding::encode(frame, EncodingFormat::Dng, 0, &self.camera_model)?;
        write_file(path, &data)?;
        debug!(path = %path.display(), "DNG written");
        Ok(())
    }

    /// Render a JPEG preview of a raw still off the dispatcher thread
    fn spawn_preview(&mut self, frame: StillFrame, path: PathBuf) {
        let quality = self.options.quality;
        let spawned = std::thread::Builder::new()
            .name("raw-preview".into())
            .spawn(move || {
                let Some(rgb) = grbg10_to_rgb(frame.bytes(), &frame.info) else {
                    warn!(path = %path.display(), "Raw frame too short for preview");
                    return;
                };
                let mut jpeg = Vec::new();
                let encoded = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality)
                    .encode(
                        &rgb,
                        frame.info.width,
                        frame.info.height,
                        image::ExtendedColorType::Rgb8,
                    );
                match encoded {
                    Ok(()) => match std::fs::write(&path, &jpeg) {
                        Ok(()) => debug!(path = %path.display(), "Raw preview written"),
                        Err(e) => warn!(path = %path.display(), error = %e, "Raw preview write failed"),
                    },
                    Err(e) => warn!(error = %e, "Raw preview encode failed"),
                }
            });
        match spawned {
            Ok(handle) => self.converters.push(handle),
            Err(e) => error!(error = %e, "Could not start raw preview thread"),
        }
    }

    /// Drop handles of converters that already finished
    fn reap(&mut self) {
        let (done, running): (Vec<_>, Vec<_>) =
            self.converters.drain(..).partition(|h| h.is_finished());
        self.converters = running;
        for handle in done {
            let _ = handle.join();
        }
    }

    pub fn pending_conversions(&self) -> usize {
        self.converters.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every background conversion
    pub fn stop(&mut self) {
        for handle in self.converters.drain(..) {
            if handle.join().is_err() {
                error!("Raw preview thread panicked");
            }
        }
    }
}

impl Drop for ImageSaver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), PhotoError> {
    std::fs::write(path, data).map_err(|source| PhotoError::SaveFailed {
        path: path.to_path_buf(),
        source,
    })
}
