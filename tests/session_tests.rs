// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the capture session state machine

mod common;

use common::{CountingFactory, MockCamera, files_with_extension, test_config};
use picam_mjpeg::backends::camera::{CameraDriver, CameraMsg, CompletedRequestPtr, StreamRole};
use picam_mjpeg::config::{StillPolicy, StillSource};
use picam_mjpeg::errors::{AppError, ConfigurationError, SessionError};
use picam_mjpeg::session::{CaptureSession, EncodePath, LayoutKind};
use std::time::Duration;

fn next_frame(session: &mut CaptureSession<MockCamera>) -> CompletedRequestPtr {
    match session.wait(Duration::from_secs(2)) {
        CameraMsg::RequestComplete(request) => request,
        other => panic!("expected a frame, got {:?}", other),
    }
}

#[test]
fn test_reconfigure_with_different_roles() {
    let dir = tempfile::tempdir().unwrap();
    let camera = MockCamera::new();
    let log = camera.log();
    let (factory, _) = CountingFactory::new();
    let mut session =
        CaptureSession::new(camera, Box::new(factory), &test_config(dir.path())).unwrap();

    session
        .configure_streams(
            &[StreamRole::VideoRecording, StreamRole::Viewfinder],
            LayoutKind::Steady,
        )
        .unwrap();
    // A second configure without teardown is rejected
    assert!(matches!(
        session.configure_streams(&[StreamRole::StillCapture], LayoutKind::Still),
        Err(AppError::Session(SessionError::InvalidTransition { .. }))
    ));

    session.teardown().unwrap();
    assert!(session.layout().is_none());
    session
        .configure_streams(&[StreamRole::StillCapture], LayoutKind::Still)
        .unwrap();
    assert_eq!(session.layout().unwrap().kind, LayoutKind::Still);

    let log = log.lock().unwrap().clone();
    assert_eq!(log.configures, 2);
    assert_eq!(log.teardowns, 1);
    assert_eq!(
        log.layouts,
        vec![
            vec![StreamRole::VideoRecording, StreamRole::Viewfinder],
            vec![StreamRole::StillCapture],
        ]
    );
}

#[test]
fn test_start_stop_start_creates_fresh_encoders() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, counts) = CountingFactory::new();
    let mut session =
        CaptureSession::new(MockCamera::new(), Box::new(factory), &test_config(dir.path()))
            .unwrap();

    // No layout yet, so no encoder may be built
    assert!(matches!(
        session.start_path(EncodePath::Video),
        Err(AppError::Configuration(ConfigurationError::StreamNotConfigured(
            StreamRole::VideoRecording
        )))
    ));
    assert_eq!(counts.video(), (0, 0));

    session.start().unwrap();
    assert_eq!(counts.lores(), (1, 0));

    session.start_path(EncodePath::Video).unwrap();
    session.stop_path(EncodePath::Video).unwrap();
    session.start_path(EncodePath::Video).unwrap();
    assert_eq!(counts.video(), (2, 1));
    assert_eq!(session.counters().video, 1);
    assert!(session.is_running(EncodePath::Video));

    session.stop_all().unwrap();
    assert_eq!(counts.video(), (2, 2));
    assert_eq!(counts.lores(), (1, 1));
    assert_eq!(session.counters().video, 2);
    assert_eq!(
        counts
            .unconfigured
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );

    let stats = session.stats();
    assert_eq!(stats.video_starts, 2);
    assert_eq!(stats.video_stops, 2);
    assert_eq!(stats.camera_starts, 1);
    assert_eq!(stats.camera_stops, 1);
}

#[test]
fn test_stop_of_idle_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, _) = CountingFactory::new();
    let mut session =
        CaptureSession::new(MockCamera::new(), Box::new(factory), &test_config(dir.path()))
            .unwrap();
    assert!(matches!(
        session.stop_path(EncodePath::Video),
        Err(AppError::Session(SessionError::NotRunning("video")))
    ));
}

#[test]
fn test_teardown_refused_while_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, _) = CountingFactory::new();
    let mut session =
        CaptureSession::new(MockCamera::new(), Box::new(factory), &test_config(dir.path()))
            .unwrap();
    session.start().unwrap();

    assert!(matches!(
        session.teardown(),
        Err(AppError::Session(SessionError::InvalidTransition { .. }))
    ));
    assert!(session.layout().is_some());

    session.teardown_all().unwrap();
    assert!(session.layout().is_none());
    assert!(!session.camera().is_running());
}

#[test]
fn test_lores_larger_than_video_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.preview.width = 640;
    config.preview.height = 480;
    let (factory, counts) = CountingFactory::new();
    let mut session = CaptureSession::new(MockCamera::new(), Box::new(factory), &config).unwrap();

    assert!(matches!(
        session.start(),
        Err(AppError::Configuration(
            ConfigurationError::LoresLargerThanVideo { .. }
        ))
    ));
    assert!(session.layout().is_none());
    assert_eq!(counts.lores(), (0, 0));
}

#[test]
fn test_no_teardown_requires_steady_source() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.still.policy = StillPolicy::NoTeardown;
    config.still.source = StillSource::Still;
    let (factory, _) = CountingFactory::new();
    assert!(matches!(
        CaptureSession::new(MockCamera::new(), Box::new(factory), &config),
        Err(AppError::Configuration(
            ConfigurationError::StillSourceUnavailable(StreamRole::StillCapture)
        ))
    ));

    config.still.source = StillSource::Lores;
    let (factory, _) = CountingFactory::new();
    assert!(CaptureSession::new(MockCamera::new(), Box::new(factory), &config).is_ok());
}

#[test]
fn test_counters_survive_a_new_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    {
        let (factory, _) = CountingFactory::new();
        let mut session =
            CaptureSession::new(MockCamera::new(), Box::new(factory), &config).unwrap();
        session.start().unwrap();
        session.start_path(EncodePath::Video).unwrap();
        session.stop_path(EncodePath::Video).unwrap();
    }
    let (factory, _) = CountingFactory::new();
    let session = CaptureSession::new(MockCamera::new(), Box::new(factory), &config).unwrap();
    assert_eq!(session.counters().video, 1);
}

#[test]
fn test_no_teardown_still_saves_from_running_stream() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.still.policy = StillPolicy::NoTeardown;
    config.still.source = StillSource::Video;
    let camera = MockCamera::new();
    let log = camera.log();
    let (factory, _) = CountingFactory::new();
    let mut session = CaptureSession::new(camera, Box::new(factory), &config).unwrap();
    session.start().unwrap();

    let request = next_frame(&mut session);
    session.request_still_capture();
    session.route_request(&request).unwrap();
    let path = session.capture_still(&request).unwrap();
    drop(request);

    assert!(path.exists());
    assert_eq!(path.file_name().unwrap(), "im_0000.jpg");
    assert_eq!(session.counters().image, 1);
    assert!(!session.is_still_pending());
    // Still taken without touching the layout
    assert_eq!(log.lock().unwrap().configures, 1);
    session.stop_all().unwrap();
}

#[test]
fn test_teardown_still_restores_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let camera = MockCamera::new();
    let log = camera.log();
    let (factory, counts) = CountingFactory::new();
    let mut session = CaptureSession::new(camera, Box::new(factory), &config).unwrap();
    session.start().unwrap();
    session.start_path(EncodePath::Video).unwrap();

    let request = next_frame(&mut session);
    session.route_request(&request).unwrap();
    session.request_still_capture();
    let path = session.capture_still(&request).unwrap();
    drop(request);

    assert!(path.exists());
    assert_eq!(session.layout().unwrap().kind, LayoutKind::Steady);
    assert!(session.is_running(EncodePath::Video));
    assert!(session.is_running(EncodePath::Lores));
    assert!(session.camera().is_running());

    {
        let log = log.lock().unwrap();
        assert_eq!(
            log.layouts,
            vec![
                vec![StreamRole::VideoRecording, StreamRole::Viewfinder],
                vec![StreamRole::StillCapture],
                vec![StreamRole::VideoRecording, StreamRole::Viewfinder],
            ]
        );
        assert_eq!(log.teardowns, 2);
    }
    // The interrupted recording was closed and a new one opened
    assert_eq!(counts.video(), (2, 1));
    assert_eq!(session.counters().video, 1);

    // The resumed paths keep encoding
    let request = next_frame(&mut session);
    session.route_request(&request).unwrap();
    drop(request);
    session.stop_all().unwrap();

    assert_eq!(files_with_extension(dir.path(), "jpg"), vec!["im_0000.jpg"]);
    assert_eq!(
        files_with_extension(dir.path(), "mjpeg"),
        vec!["vi_0000.mjpeg", "vi_0001.mjpeg"]
    );
}

#[test]
#[should_panic(expected = "video path started while already running")]
fn test_double_start_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let (factory, _) = CountingFactory::new();
    let mut session =
        CaptureSession::new(MockCamera::new(), Box::new(factory), &test_config(dir.path()))
            .unwrap();
    session.start().unwrap();
    session.start_path(EncodePath::Video).unwrap();
    let _ = session.start_path(EncodePath::Video);
}
