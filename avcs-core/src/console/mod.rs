#![allow(clippy::module_name_repetitions)]

//! Line-oriented operator commands.
//!
//! `winnow` combinators split a line into its keyword and arguments; the
//! keyword is looked up in [`catalog`] and the arguments are then checked
//! against the ranges the controller and the simulated engine accept.

pub mod catalog;

use core::fmt;
use core::ops::RangeInclusive;
use core::time::Duration;

use winnow::ascii::{dec_uint, float, space0};
use winnow::combinator::{alt, opt, preceded, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take_while;

use crate::capture::{CamSide, ShaftId};

use catalog::CommandTag;

type PResult<O> = Result<O, ErrMode<ContextError>>;

/// Highest engine speed the simulator accepts.
pub const MAX_RPM: u32 = 12_000;
const OIL_RANGE: RangeInclusive<f32> = -40.0..=200.0;
const TARGET_RANGE: RangeInclusive<f32> = -60.0..=60.0;
const PHASE_RANGE: RangeInclusive<f32> = -90.0..=90.0;
const MAX_DURATION: Duration = Duration::from_secs(600);

/// Which banks a fixed target applies to, or the RPM curve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TargetCommand {
    Auto,
    Fixed { side: Option<CamSide>, degrees: f32 },
}

/// Runtime policy switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Setting {
    /// Learn the cam baseline during calibration.
    MeasuredBaseline,
    /// Check against the factory baseline instead.
    FixedBaseline,
    /// Clear PID state when leaving `Running`.
    ResetFeedback,
    /// Keep PID state across recalibration.
    RetainFeedback,
    /// Smooth crank RPM harder at idle.
    AdaptiveFilter,
    FixedFilter,
}

/// Structured commands produced by the parser.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command<'a> {
    Rpm(u32),
    Oil(f32),
    Target(TargetCommand),
    Phase { side: CamSide, degrees: f32 },
    Run(Duration),
    Drop { shaft: ShaftId, duration: Duration },
    Glitch(ShaftId),
    Status,
    Faults,
    Set(Setting),
    Help(Option<&'a str>),
}

/// Reasons a line was not accepted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommandError<'a> {
    Empty,
    UnknownCommand(&'a str),
    /// Malformed arguments; `offset` is the byte position in the line.
    Parse { offset: usize },
    UnknownShaft(&'a str),
    UnknownSetting(&'a str),
    OutOfRange { name: &'static str, value: f32 },
}

impl fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Empty => f.write_str("empty command"),
            CommandError::UnknownCommand(name) => write!(f, "unknown command `{name}`"),
            CommandError::Parse { offset } => write!(f, "unexpected input at column {offset}"),
            CommandError::UnknownShaft(name) => write!(f, "unknown shaft `{name}`"),
            CommandError::UnknownSetting(name) => write!(f, "unknown setting `{name}`"),
            CommandError::OutOfRange { name, value } => write!(f, "{name} {value} out of range"),
        }
    }
}

/// Parses one console line.
///
/// # Errors
///
/// Returns a [`CommandError`] describing the first problem found.
pub fn parse(line: &str) -> Result<Command<'_>, CommandError<'_>> {
    let mut input = line.trim_end();
    let keyword = preceded(space0, word)
        .parse_next(&mut input)
        .map_err(|_| {
            if input.trim().is_empty() {
                CommandError::Empty
            } else {
                CommandError::Parse {
                    offset: line.len() - input.trim_start().len(),
                }
            }
        })?;
    let spec = catalog::find(keyword).ok_or(CommandError::UnknownCommand(keyword))?;
    let args = Arguments {
        input,
        offset: line.trim_end().len() - input.len(),
    };

    match spec.tag {
        CommandTag::Rpm => {
            let rpm: u32 = args.parse(preceded(space0, dec_uint))?;
            if rpm > MAX_RPM {
                return Err(CommandError::OutOfRange {
                    name: "rpm",
                    value: crate::timing::ticks_as_f32(rpm),
                });
            }
            Ok(Command::Rpm(rpm))
        }
        CommandTag::Oil => {
            let oil = args.parse(number)?;
            in_range("oil", oil, &OIL_RANGE).map(Command::Oil)
        }
        CommandTag::Target => {
            let (selector, degrees) = args.parse((preceded(space0, word), opt(number)))?;
            match degrees {
                None if selector.eq_ignore_ascii_case("auto") => {
                    Ok(Command::Target(TargetCommand::Auto))
                }
                None => Err(CommandError::Parse {
                    offset: line.trim_end().len(),
                }),
                Some(degrees) => {
                    let side = if selector.eq_ignore_ascii_case("both") {
                        None
                    } else {
                        Some(cam_side(selector)?)
                    };
                    let degrees = in_range("target", degrees, &TARGET_RANGE)?;
                    Ok(Command::Target(TargetCommand::Fixed { side, degrees }))
                }
            }
        }
        CommandTag::Phase => {
            let (side, degrees) = args.parse((preceded(space0, word), number))?;
            Ok(Command::Phase {
                side: cam_side(side)?,
                degrees: in_range("phase", degrees, &PHASE_RANGE)?,
            })
        }
        CommandTag::Run => args
            .parse(duration)
            .and_then(checked_duration)
            .map(Command::Run),
        CommandTag::Drop => {
            let (shaft, duration) = args.parse((preceded(space0, word), duration))?;
            Ok(Command::Drop {
                shaft: shaft_id(shaft)?,
                duration: checked_duration(duration)?,
            })
        }
        CommandTag::Glitch => {
            let shaft = args.parse(preceded(space0, word))?;
            shaft_id(shaft).map(Command::Glitch)
        }
        CommandTag::Status => args.finish().map(|()| Command::Status),
        CommandTag::Faults => args.finish().map(|()| Command::Faults),
        CommandTag::Set => {
            let (name, value) =
                args.parse((preceded(space0, word), preceded(space0, word)))?;
            setting(name, value).map(Command::Set)
        }
        CommandTag::Help => args
            .parse(opt(preceded(space0, word)))
            .map(Command::Help),
    }
}

/// Argument text following the command keyword.
struct Arguments<'a> {
    input: &'a str,
    offset: usize,
}

impl<'a> Arguments<'a> {
    fn parse<O, P>(&self, parser: P) -> Result<O, CommandError<'a>>
    where
        P: Parser<&'a str, O, ErrMode<ContextError>>,
    {
        terminated(parser, space0)
            .parse(self.input)
            .map_err(|error| CommandError::Parse {
                offset: self.offset + error.offset(),
            })
    }

    fn finish(&self) -> Result<(), CommandError<'a>> {
        if self.input.trim().is_empty() {
            Ok(())
        } else {
            Err(CommandError::Parse {
                offset: self.offset + (self.input.len() - self.input.trim_start().len()),
            })
        }
    }
}

fn word<'a>(input: &mut &'a str) -> PResult<&'a str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        .parse_next(input)
}

fn number(input: &mut &str) -> PResult<f32> {
    preceded(space0, float).parse_next(input)
}

fn duration(input: &mut &str) -> PResult<Duration> {
    preceded(
        space0,
        (
            dec_uint::<_, u32, _>,
            alt(("ms".value(1_u64), "s".value(1_000_u64))),
        ),
    )
    .map(|(value, scale)| Duration::from_millis(u64::from(value) * scale))
    .parse_next(input)
}

fn checked_duration<'a>(duration: Duration) -> Result<Duration, CommandError<'a>> {
    if duration > MAX_DURATION {
        #[allow(clippy::cast_precision_loss)]
        let value = duration.as_millis() as f32;
        Err(CommandError::OutOfRange {
            name: "duration ms",
            value,
        })
    } else {
        Ok(duration)
    }
}

fn in_range<'a>(
    name: &'static str,
    value: f32,
    range: &RangeInclusive<f32>,
) -> Result<f32, CommandError<'a>> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(CommandError::OutOfRange { name, value })
    }
}

fn cam_side(name: &str) -> Result<CamSide, CommandError<'_>> {
    CamSide::BOTH
        .into_iter()
        .find(|side| side_name(*side).eq_ignore_ascii_case(name))
        .ok_or(CommandError::UnknownShaft(name))
}

fn shaft_id(name: &str) -> Result<ShaftId, CommandError<'_>> {
    if name.eq_ignore_ascii_case("crank") {
        Ok(ShaftId::Crank)
    } else {
        cam_side(name).map(CamSide::shaft)
    }
}

const fn side_name(side: CamSide) -> &'static str {
    match side {
        CamSide::Left => "left",
        CamSide::Right => "right",
    }
}

fn setting<'a>(name: &'a str, value: &'a str) -> Result<Setting, CommandError<'a>> {
    const SETTINGS: [(&str, &str, Setting); 6] = [
        ("baseline", "measured", Setting::MeasuredBaseline),
        ("baseline", "fixed", Setting::FixedBaseline),
        ("feedback", "reset", Setting::ResetFeedback),
        ("feedback", "retain", Setting::RetainFeedback),
        ("filter", "adaptive", Setting::AdaptiveFilter),
        ("filter", "fixed", Setting::FixedFilter),
    ];

    if !SETTINGS
        .iter()
        .any(|(known, _, _)| known.eq_ignore_ascii_case(name))
    {
        return Err(CommandError::UnknownSetting(name));
    }
    SETTINGS
        .iter()
        .find(|(known, option, _)| {
            known.eq_ignore_ascii_case(name) && option.eq_ignore_ascii_case(value)
        })
        .map(|(_, _, setting)| *setting)
        .ok_or(CommandError::UnknownSetting(value))
}
