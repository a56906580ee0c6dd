// SPDX-License-Identifier: GPL-3.0-only

//! Filename templating for recordings and stills
//!
//! Templates use single-character `%` directives:
//!
//! | Directive | Expands to |
//! |-----------|------------|
//! | `%%` | a literal `%` |
//! | `%Y` | four digit year |
//! | `%y` | two digit year |
//! | `%M` | month, 01-12 |
//! | `%D` | day of month |
//! | `%h` | hour, 00-23 |
//! | `%m` | minute |
//! | `%s` | second |
//! | `%u` | milliseconds, three digits |
//! | `%v` | video counter, four digits |
//! | `%i` | image counter, four digits |
//!
//! Unknown directives expand to nothing. Relative templates resolve against
//! the media root.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use std::path::{Path, PathBuf};

/// Values a template can refer to
#[derive(Debug, Clone)]
pub struct NameContext<Tz: TimeZone = Local> {
    pub time: DateTime<Tz>,
    pub video_count: u32,
    pub image_count: u32,
}

impl NameContext<Local> {
    /// Context stamped with the current local time
    pub fn now(video_count: u32, image_count: u32) -> Self {
        Self {
            time: Local::now(),
            video_count,
            image_count,
        }
    }
}

/// Expand `%` directives in `template`
pub fn expand<Tz: TimeZone>(template: &str, ctx: &NameContext<Tz>) -> String {
    let t = &ctx.time;
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('Y') => out.push_str(&format!("{:04}", t.year())),
            Some('y') => out.push_str(&format!("{:02}", t.year().rem_euclid(100))),
            Some('M') => out.push_str(&format!("{:02}", t.month())),
            Some('D') => out.push_str(&format!("{:02}", t.day())),
            Some('h') => out.push_str(&format!("{:02}", t.hour())),
            Some('m') => out.push_str(&format!("{:02}", t.minute())),
            Some('s') => out.push_str(&format!("{:02}", t.second())),
            Some('u') => out.push_str(&format!("{:03}", t.timestamp_subsec_millis().min(999))),
            Some('v') => out.push_str(&format!("{:04}", ctx.video_count)),
            Some('i') => out.push_str(&format!("{:04}", ctx.image_count)),
            // Unknown directive, or a trailing '%'
            Some(_) | None => {}
        }
    }
    out
}

/// Expand `template` and anchor relative results under `media_path`
pub fn resolve<Tz: TimeZone>(template: &str, media_path: &Path, ctx: &NameContext<Tz>) -> PathBuf {
    let name = expand(template, ctx);
    if name.starts_with('/') {
        PathBuf::from(name)
    } else {
        media_path.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn ctx() -> NameContext<FixedOffset> {
        let tz = FixedOffset::east_opt(0).unwrap();
        let time = tz
            .with_ymd_and_hms(2024, 3, 7, 9, 5, 2)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(42))
            .unwrap();
        NameContext {
            time,
            video_count: 7,
            image_count: 123,
        }
    }

    #[test]
    fn test_default_video_template() {
        assert_eq!(
            expand("vi_%v_%Y%M%D_%h%m%s.mp4", &ctx()),
            "vi_0007_20240307_090502.mp4"
        );
    }

    #[test]
    fn test_default_image_template() {
        assert_eq!(
            expand("im_%i_%Y%M%D_%h%m%s.jpg", &ctx()),
            "im_0123_20240307_090502.jpg"
        );
    }

    #[test]
    fn test_short_year_and_millis() {
        assert_eq!(expand("%y-%u", &ctx()), "24-042");
    }

    #[test]
    fn test_percent_escape() {
        assert_eq!(expand("100%%", &ctx()), "100%");
    }

    #[test]
    fn test_unknown_directive_dropped() {
        assert_eq!(expand("a%qb%", &ctx()), "ab");
    }

    #[test]
    fn test_relative_resolves_under_media_path() {
        let path = resolve("im_%i.jpg", Path::new("/var/www/media"), &ctx());
        assert_eq!(path, PathBuf::from("/var/www/media/im_0123.jpg"));
    }

    #[test]
    fn test_absolute_template_kept() {
        let path = resolve("/tmp/x_%v.h264", Path::new("/var/www/media"), &ctx());
        assert_eq!(path, PathBuf::from("/tmp/x_0007.h264"));
    }

    #[test]
    fn test_counter_wider_than_four_digits() {
        let mut c = ctx();
        c.video_count = 123_456;
        assert_eq!(expand("%v", &c), "123456");
    }
}
