// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=PICAM_MJPEG_VERSION");

    // Packaged builds pin the version from outside
    let version = std::env::var("PICAM_MJPEG_VERSION").unwrap_or_else(|_| git_version());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// `git describe` output with the `v` prefix removed, or the crate version
fn git_version() -> String {
    let described = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty", "--match", "v*"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string());

    match described {
        Some(v) if !v.is_empty() => v.strip_prefix('v').unwrap_or(&v).to_string(),
        _ => env!("CARGO_PKG_VERSION").to_string(),
    }
}
