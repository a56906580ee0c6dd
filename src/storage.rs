// SPDX-License-Identifier: MPL-2.0

//! Media directory and persisted file counters

use crate::constants::{COUNT_FILE_NAME, STATE_DIR_NAME};
use crate::errors::PersistenceWarning;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Video and image sequence numbers used in file names
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaCounters {
    pub video: u32,
    pub image: u32,
}

impl MediaCounters {
    fn parse(text: &str) -> Option<Self> {
        let mut values = text.lines().map(|line| line.trim().parse::<u32>());
        let video = values.next()?.ok()?;
        let image = values.next()?.ok()?;
        Some(Self { video, image })
    }

    fn render(&self) -> String {
        format!("{}\n{}\n", self.video, self.image)
    }
}

/// `<media>/.picam-mjpeg/count.txt`
#[derive(Debug, Clone)]
pub struct CounterStore {
    path: PathBuf,
}

impl CounterStore {
    pub fn new(media_path: &Path) -> Self {
        Self {
            path: media_path.join(STATE_DIR_NAME).join(COUNT_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the counters, writing zeroes if the file does not exist yet
    pub fn load(&self) -> MediaCounters {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => MediaCounters::parse(&text).unwrap_or_else(|| {
                warn!(path = %self.path.display(), "Counter file unreadable, starting from zero");
                MediaCounters::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let counters = MediaCounters::default();
                if let Err(w) = self.save(&counters) {
                    warn!("{}", w);
                }
                counters
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read counter file");
                MediaCounters::default()
            }
        }
    }

    pub fn save(&self, counters: &MediaCounters) -> Result<(), PersistenceWarning> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceWarning::new("counter directory", parent, e))?;
        }
        std::fs::write(&self.path, counters.render())
            .map_err(|e| PersistenceWarning::new("counter file", &self.path, e))?;
        debug!(video = counters.video, image = counters.image, "Counters saved");
        Ok(())
    }
}

/// Create the media directory and open it up to the web server
///
/// Both steps only warn; capture still runs if the directory is unusable.
pub fn ensure_media_path(path: &Path) {
    if let Err(e) = std::fs::create_dir_all(path) {
        warn!(path = %path.display(), error = %e, "Could not create media directory");
        return;
    }
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)) {
        warn!(path = %path.display(), error = %e, "Could not set media directory permissions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::new(dir.path());
        let counters = MediaCounters { video: 7, image: 42 };
        store.save(&counters).unwrap();
        assert_eq!(CounterStore::new(dir.path()).load(), counters);
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "7\n42\n"
        );
    }

    #[test]
    fn test_missing_file_created_with_zeroes() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::new(dir.path());
        assert_eq!(store.load(), MediaCounters::default());
        assert!(store.path().exists());
    }

    #[test]
    fn test_garbage_file_yields_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::new(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "twelve\n").unwrap();
        assert_eq!(store.load(), MediaCounters::default());
    }

    #[test]
    fn test_save_failure_is_warning() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the state directory should be
        std::fs::write(dir.path().join(STATE_DIR_NAME), b"").unwrap();
        let store = CounterStore::new(dir.path());
        assert!(store.save(&MediaCounters::default()).is_err());
    }

    #[test]
    fn test_ensure_media_path_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("a/b/media");
        ensure_media_path(&media);
        let mode = std::fs::metadata(&media).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }
}
