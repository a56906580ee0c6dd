// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the dispatcher loop

mod common;

use common::{CountingFactory, MockCamera, files_with_extension, test_config};
use picam_mjpeg::backends::camera::CameraDriver;
use picam_mjpeg::config::{Config, LoopMode};
use picam_mjpeg::control::ScriptedSource;
use picam_mjpeg::event_loop::{EventLoop, LoopExit};
use picam_mjpeg::session::{CaptureSession, EncodePath};

fn event_loop(
    camera: MockCamera,
    config: &Config,
) -> (EventLoop<MockCamera>, std::sync::Arc<common::EncoderCounts>) {
    let (factory, counts) = CountingFactory::new();
    let session = CaptureSession::new(camera, Box::new(factory), config).unwrap();
    (EventLoop::new(session, config.clone(), config), counts)
}

#[test]
fn test_demo_cycle_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.control.mode = LoopMode::Demo;
    config.control.demo_phase_ms = 50;
    let (mut event_loop, counts) = event_loop(MockCamera::new(), &config);

    assert_eq!(event_loop.run().unwrap(), LoopExit::DemoComplete);

    // Video0, then Video1 split in two by the still taken while recording
    assert_eq!(
        files_with_extension(dir.path(), "mjpeg"),
        vec!["vi_0000.mjpeg", "vi_0001.mjpeg", "vi_0002.mjpeg"]
    );
    assert_eq!(
        files_with_extension(dir.path(), "jpg"),
        vec!["im_0000.jpg", "im_0001.jpg"]
    );
    assert!(dir.path().join("preview/cam.jpg").exists());

    let session = event_loop.session();
    assert_eq!(session.counters().video, 3);
    assert_eq!(session.counters().image, 2);
    assert_eq!(session.stats().stills_saved, 2);
    assert!(!session.is_running(EncodePath::Video));
    assert!(!session.is_running(EncodePath::Lores));
    assert!(!session.camera().is_running());
    assert_eq!(counts.video(), (3, 3));
}

#[test]
fn test_demo_tolerates_recording_commands() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.control.mode = LoopMode::Demo;
    config.control.demo_phase_ms = 50;
    let (event_loop, counts) = event_loop(MockCamera::new(), &config);
    // Recording already running when the demo starts its own
    let mut event_loop = event_loop.with_commands(Box::new(ScriptedSource::new(["CA 1"])));

    assert_eq!(event_loop.run().unwrap(), LoopExit::DemoComplete);
    assert!(!event_loop.session().is_running(EncodePath::Video));
    let (created, dropped) = counts.video();
    assert_eq!(created, dropped);
    assert_eq!(event_loop.session().counters().video, created);
}

#[test]
fn test_demo_tolerates_recording_stopped_early() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.control.mode = LoopMode::Demo;
    config.control.demo_phase_ms = 50;
    let (event_loop, counts) = event_loop(MockCamera::new(), &config);
    // One line per iteration: the stop lands somewhere inside the first recording
    let mut script: Vec<&str> = vec!["XX"; 7];
    script.push("CA 0");
    let mut event_loop = event_loop.with_commands(Box::new(ScriptedSource::new(script)));

    assert_eq!(event_loop.run().unwrap(), LoopExit::DemoComplete);
    assert!(!event_loop.session().is_running(EncodePath::Video));
    let (created, dropped) = counts.video();
    assert_eq!(created, dropped);
}

#[test]
fn test_split_interval_starts_next_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.capture.timeout_ms = 1500;
    let (event_loop, counts) = event_loop(MockCamera::new(), &config);
    let mut event_loop = event_loop.with_commands(Box::new(ScriptedSource::new(["VI 1", "CA 1"])));

    assert_eq!(event_loop.run().unwrap(), LoopExit::Timeout);
    assert_eq!(
        files_with_extension(dir.path(), "mjpeg"),
        vec!["vi_0000.mjpeg", "vi_0001.mjpeg"]
    );
    assert_eq!(counts.video(), (2, 2));
    assert_eq!(event_loop.session().counters().video, 2);
}

#[test]
fn test_split_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.capture.timeout_ms = 1500;
    config.video.split_secs = 1;
    let (event_loop, counts) = event_loop(MockCamera::new(), &config);
    let mut event_loop = event_loop.with_commands(Box::new(ScriptedSource::new(["CA 1"])));

    assert_eq!(event_loop.run().unwrap(), LoopExit::Timeout);
    assert_eq!(counts.video(), (2, 2));
}

#[test]
fn test_capture_auto_stop() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.capture.timeout_ms = 1500;
    let (event_loop, counts) = event_loop(MockCamera::new(), &config);
    let mut event_loop = event_loop.with_commands(Box::new(ScriptedSource::new(["CA 1 1"])));

    assert_eq!(event_loop.run().unwrap(), LoopExit::Timeout);
    assert_eq!(
        files_with_extension(dir.path(), "mjpeg"),
        vec!["vi_0000.mjpeg"]
    );
    // Stopped by its own deadline, so the final shutdown found nothing to stop
    assert_eq!(counts.video(), (1, 1));
    assert_eq!(event_loop.session().counters().video, 1);
    assert_eq!(event_loop.session().stats().video_stops, 1);
}

#[test]
fn test_hardware_timeout_restarts_camera_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.capture.frames = 10;
    let camera = MockCamera::new().with_timeout_at(3);
    let log = camera.log();
    let (mut event_loop, _) = event_loop(camera, &config);

    assert_eq!(event_loop.run().unwrap(), LoopExit::FrameLimit);
    // The timed out wait did not count as a frame
    assert_eq!(event_loop.frames(), 10);
    assert_eq!(event_loop.session().stats().camera_restarts, 1);

    let log = log.lock().unwrap();
    assert_eq!(log.injected_timeouts, 1);
    assert_eq!(log.starts, 2);
    assert_eq!(log.stops, 2);
    assert_eq!(log.configures, 1);
}

#[test]
fn test_run_zero_stops_everything() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let (event_loop, counts) = event_loop(MockCamera::new(), &config);
    let mut event_loop = event_loop.with_commands(Box::new(ScriptedSource::new(["ru 0"])));

    assert_eq!(event_loop.run().unwrap(), LoopExit::Stopped);
    assert!(!event_loop.session().camera().is_running());
    assert_eq!(counts.lores(), (1, 1));
    assert_eq!(counts.video(), (0, 0));
}

#[test]
fn test_capture_command_toggles_recording() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let (event_loop, counts) = event_loop(MockCamera::new(), &config);
    let mut event_loop = event_loop.with_commands(Box::new(ScriptedSource::new([
        "CA 1", "XX 5", "CA 1", "CA 0", "RU 0",
    ])));

    assert_eq!(event_loop.run().unwrap(), LoopExit::Stopped);
    // Second CA 1 stopped the recording, CA 0 found nothing to stop
    assert_eq!(counts.video(), (1, 1));
    assert_eq!(event_loop.session().counters().video, 1);
    assert_eq!(
        files_with_extension(dir.path(), "mjpeg"),
        vec!["vi_0000.mjpeg"]
    );
}

#[test]
fn test_image_command_saves_still() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.capture.frames = 5;
    let (event_loop, _) = event_loop(MockCamera::new(), &config);
    let mut event_loop = event_loop.with_commands(Box::new(ScriptedSource::new(["IM"])));

    assert_eq!(event_loop.run().unwrap(), LoopExit::FrameLimit);
    assert_eq!(files_with_extension(dir.path(), "jpg"), vec!["im_0000.jpg"]);
    assert_eq!(event_loop.session().counters().image, 1);
}

#[test]
fn test_timeout_ends_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.capture.timeout_ms = 100;
    let (mut event_loop, _) = event_loop(MockCamera::new(), &config);
    assert_eq!(event_loop.run().unwrap(), LoopExit::Timeout);
    assert!(event_loop.frames() > 0);
}

#[test]
fn test_frame_limit_wins_over_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.capture.timeout_ms = 1;
    config.capture.frames = 20;
    let (mut event_loop, _) = event_loop(MockCamera::new(), &config);
    assert_eq!(event_loop.run().unwrap(), LoopExit::FrameLimit);
    assert_eq!(event_loop.frames(), 20);
}

#[test]
fn test_restart_applies_persisted_settings() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.capture.frames = 10;
    let camera = MockCamera::new();
    let log = camera.log();
    let (event_loop, counts) = event_loop(camera, &config);
    let mut event_loop =
        event_loop.with_commands(Box::new(ScriptedSource::new(["BR 0.5", "RU 1"])));

    assert_eq!(event_loop.run().unwrap(), LoopExit::FrameLimit);
    assert!(dir.path().join("settings.toml").exists());
    assert_eq!(log.lock().unwrap().configures, 2);
    // Lores rebuilt for the new session
    assert_eq!(counts.lores(), (2, 2));
    assert_eq!(event_loop.session().stats().configurations, 2);
}
