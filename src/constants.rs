// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Default media root for recordings and stills
pub const DEFAULT_MEDIA_PATH: &str = "/var/www/media/";

/// Hidden folder under the media root holding persisted state
pub const STATE_DIR_NAME: &str = ".picam-mjpeg";

/// Counter file name inside [`STATE_DIR_NAME`]
pub const COUNT_FILE_NAME: &str = "count.txt";

/// Default preview (MJPEG) output, a single JPEG replaced every frame
pub const DEFAULT_PREVIEW_OUTPUT: &str = "/dev/shm/mjpeg/cam.jpg";

/// Default still filename template, relative to the media root
pub const DEFAULT_IMAGE_TEMPLATE: &str = "im_%i_%Y%M%D_%h%m%s.jpg";

/// Default video filename template, relative to the media root
pub const DEFAULT_VIDEO_TEMPLATE: &str = "vi_%v_%Y%M%D_%h%m%s.mp4";

/// Default control FIFO path
pub const DEFAULT_FIFO_PATH: &str = "/var/www/FIFO";

/// Default motion event FIFO path
pub const DEFAULT_MOTION_PIPE: &str = "/var/www/FIFO1";

/// Config directory name under the user config dir
pub const CONFIG_DIR_NAME: &str = "picam-mjpeg";

/// Main config file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Side settings written by FIFO commands
pub const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Video stream defaults
pub mod video {
    /// Buffers allocated for the video stream when not overridden
    pub const BUFFER_COUNT: u32 = 6;
    pub const WIDTH: u32 = 1920;
    pub const HEIGHT: u32 = 1080;
    pub const FRAMERATE: f32 = 30.0;
    /// Widths or heights at or above these use Rec.709
    pub const HD_WIDTH: u32 = 1280;
    pub const HD_HEIGHT: u32 = 720;
}

/// Lores (preview) stream defaults
pub mod lores {
    pub const WIDTH: u32 = 640;
    pub const HEIGHT: u32 = 480;
    /// MJPEG quality for preview frames
    pub const QUALITY: u8 = 50;
}

/// Still capture defaults
pub mod still {
    /// JPEG quality for stills
    pub const QUALITY: u8 = 93;
}

/// Motion detector defaults
pub mod motion {
    pub const NOISE: u8 = 5;
    pub const THRESHOLD: u32 = 10;
    pub const INIT_FRAMES: u32 = 0;
    pub const START_FRAMES: u32 = 5;
    pub const STOP_FRAMES: u32 = 50;
}

/// Accepted domains for FIFO numeric settings
pub mod ranges {
    pub const BRIGHTNESS: (f32, f32) = (-1.0, 1.0);
    pub const CONTRAST: (f32, f32) = (0.0, 32.0);
    pub const SATURATION: (f32, f32) = (0.0, 32.0);
    pub const SHARPNESS: (f32, f32) = (0.0, 16.0);
    /// Rotations the sensor can express without transposing
    pub const ROTATIONS: [u32; 2] = [0, 180];
}

/// Default bound on a single camera wait before it counts as a hardware timeout
pub const CAMERA_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between FIFO polls
pub const FIFO_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default phase length for the demo cycle
pub const DEMO_PHASE: Duration = Duration::from_secs(10);

/// Maximum bytes consumed from the FIFO per poll
pub const FIFO_READ_CHUNK: usize = 1024;

/// Longest control line kept while waiting for its newline
pub const FIFO_MAX_LINE: usize = 4096;
