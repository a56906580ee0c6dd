// SPDX-License-Identifier: GPL-3.0-only

//! Control command parsing
//!
//! One line per command, case-insensitive, fields separated by whitespace:
//!
//! | Command | Args | Effect |
//! |---|---|---|
//! | `RU` | `0` / `1` | stop / restart session |
//! | `CA` | `0` / `1` `[secs]` | stop / toggle-start video, optional auto-stop |
//! | `IM` | | capture one still |
//! | `VI` | `secs` | video split interval, 0 disables |
//! | `BR` `SH` `CO` `SA` | float | persist brightness / sharpness / contrast / saturation |
//! | `RO` `SS` `BI` | integer | persist rotation / shutter (µs) / bitrate |

use super::settings::Setting;
use crate::constants::ranges;
use crate::errors::CommandParseError;
use std::time::Duration;

/// A parsed control line
#[derive(Debug, Clone, PartialEq)]
pub enum FifoCommand {
    /// `RU 0` stops, `RU 1` restarts the session
    Run(bool),
    /// `CA 1` toggles recording on, `CA 0` stops it
    Capture {
        start: bool,
        auto_stop: Option<Duration>,
    },
    /// `IM`
    Image,
    /// `VI n`, `None` disables splitting
    SplitInterval(Option<Duration>),
    /// Numeric setting for the next restart
    Setting(Setting),
    /// Anything that failed to parse
    Unknown(CommandParseError),
}

/// Parse one line read from the control channel
pub fn parse(line: &str) -> FifoCommand {
    match parse_inner(line) {
        Ok(cmd) => cmd,
        Err(e) => FifoCommand::Unknown(e),
    }
}

fn parse_inner(line: &str) -> Result<FifoCommand, CommandParseError> {
    let line = line.trim_end_matches(['\n', '\r']).to_ascii_uppercase();
    let mut tokens = line.split_whitespace();
    let cmd = tokens.next().ok_or(CommandParseError::Empty)?;
    let args: Vec<&str> = tokens.collect();

    let parsed = match cmd {
        "RU" => {
            let [arg] = exact::<1>("RU", &args)?;
            FifoCommand::Run(flag("RU", arg)?)
        }
        "CA" => {
            let (start, secs) = match args.as_slice() {
                [] => return Err(CommandParseError::MissingArgument("CA")),
                [start] => (flag("CA", start)?, 0),
                [start, secs] => (flag("CA", start)?, non_negative("CA", secs)?),
                [_, _, extra, ..] => return Err(invalid("CA", extra)),
            };
            FifoCommand::Capture {
                start,
                auto_stop: (secs > 0).then(|| Duration::from_secs(secs as u64)),
            }
        }
        "IM" => {
            if let Some(extra) = args.first() {
                return Err(invalid("IM", extra));
            }
            FifoCommand::Image
        }
        "VI" => {
            let [arg] = exact::<1>("VI", &args)?;
            let secs = non_negative("VI", arg)?;
            FifoCommand::SplitInterval((secs > 0).then(|| Duration::from_secs(secs as u64)))
        }
        "BR" => FifoCommand::Setting(Setting::Brightness(float_setting(
            "BR",
            &args,
            ranges::BRIGHTNESS,
            "-1..1",
        )?)),
        "SH" => FifoCommand::Setting(Setting::Sharpness(float_setting(
            "SH",
            &args,
            ranges::SHARPNESS,
            "0..16",
        )?)),
        "CO" => FifoCommand::Setting(Setting::Contrast(float_setting(
            "CO",
            &args,
            ranges::CONTRAST,
            "0..32",
        )?)),
        "SA" => FifoCommand::Setting(Setting::Saturation(float_setting(
            "SA",
            &args,
            ranges::SATURATION,
            "0..32",
        )?)),
        "RO" => {
            let [arg] = exact::<1>("RO", &args)?;
            let value = non_negative("RO", arg)?;
            if !ranges::ROTATIONS.contains(&value) {
                return Err(CommandParseError::OutOfRange {
                    command: "RO",
                    argument: arg.to_string(),
                    domain: "{0, 180}",
                });
            }
            FifoCommand::Setting(Setting::Rotation(value))
        }
        "SS" => {
            let [arg] = exact::<1>("SS", &args)?;
            FifoCommand::Setting(Setting::ShutterUs(non_negative("SS", arg)?))
        }
        "BI" => {
            let [arg] = exact::<1>("BI", &args)?;
            FifoCommand::Setting(Setting::Bitrate(non_negative("BI", arg)?))
        }
        other => return Err(CommandParseError::UnknownCommand(other.to_string())),
    };
    Ok(parsed)
}

fn invalid(command: &'static str, argument: &str) -> CommandParseError {
    CommandParseError::InvalidArgument {
        command,
        argument: argument.to_string(),
    }
}

fn exact<'a, const N: usize>(
    command: &'static str,
    args: &[&'a str],
) -> Result<[&'a str; N], CommandParseError> {
    if args.len() < N {
        return Err(CommandParseError::MissingArgument(command));
    }
    if args.len() > N {
        return Err(invalid(command, args[N]));
    }
    let mut out = [""; N];
    out.copy_from_slice(args);
    Ok(out)
}

fn flag(command: &'static str, arg: &str) -> Result<bool, CommandParseError> {
    match arg {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(CommandParseError::OutOfRange {
            command,
            argument: arg.to_string(),
            domain: "{0, 1}",
        }),
    }
}

fn non_negative(command: &'static str, arg: &str) -> Result<u32, CommandParseError> {
    let value: i64 = arg.parse().map_err(|_| invalid(command, arg))?;
    if value < 0 {
        return Err(CommandParseError::OutOfRange {
            command,
            argument: arg.to_string(),
            domain: ">= 0",
        });
    }
    u32::try_from(value).map_err(|_| invalid(command, arg))
}

fn float_setting(
    command: &'static str,
    args: &[&str],
    (min, max): (f32, f32),
    domain: &'static str,
) -> Result<f32, CommandParseError> {
    let [arg] = exact::<1>(command, args)?;
    let value: f32 = arg.parse().map_err(|_| invalid(command, arg))?;
    if !value.is_finite() || value < min || value > max {
        return Err(CommandParseError::OutOfRange {
            command,
            argument: arg.to_string(),
            domain,
        });
    }
    Ok(value)
}
