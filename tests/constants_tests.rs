// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use picam_mjpeg::constants;

#[test]
fn test_lores_fits_default_video() {
    // Default preview must be configurable alongside the default video stream
    assert!(constants::lores::WIDTH <= constants::video::WIDTH);
    assert!(constants::lores::HEIGHT <= constants::video::HEIGHT);
    assert_eq!(constants::lores::WIDTH % 2, 0, "Lores width must be even");
    assert_eq!(constants::lores::HEIGHT % 2, 0, "Lores height must be even");
}

#[test]
fn test_only_half_turns() {
    assert_eq!(constants::ranges::ROTATIONS, [0, 180]);
}

#[test]
fn test_quality_defaults_in_range() {
    for q in [constants::lores::QUALITY, constants::still::QUALITY] {
        assert!((1..=100).contains(&q), "Quality {} out of range", q);
    }
}

#[test]
fn test_motion_runs_are_positive() {
    assert!(constants::motion::START_FRAMES > 0);
    assert!(constants::motion::STOP_FRAMES > 0);
}

#[test]
fn test_default_templates_have_counters() {
    assert!(constants::DEFAULT_VIDEO_TEMPLATE.contains("%v"));
    assert!(constants::DEFAULT_IMAGE_TEMPLATE.contains("%i"));
}
