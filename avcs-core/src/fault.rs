//! Fault taxonomy reported to the supervisor.

use core::fmt::{self, Write as _};

use heapless::String;

use crate::capture::{CamSide, ShaftId};

/// Width of the operator display line that fault messages are cut to.
pub const MESSAGE_WIDTH: usize = 16;

/// Everything that can force the controller back into calibration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// The capture counter wrapped between two edges.
    Overflow(ShaftId),
    /// An edge was lost because the consumer fell behind.
    Overrun(ShaftId),
    /// No pulse start seen within the timeout window.
    Timeout(ShaftId),
    /// The measured phase strayed too far from the fixed baseline.
    Baseline(CamSide),
    /// More phase-bearing pulses than expected within one crank cycle.
    CamPattern(CamSide),
}

impl Fault {
    /// Shaft the fault was observed on.
    #[must_use]
    pub const fn shaft(self) -> ShaftId {
        match self {
            Fault::Overflow(shaft) | Fault::Overrun(shaft) | Fault::Timeout(shaft) => shaft,
            Fault::Baseline(side) | Fault::CamPattern(side) => side.shaft(),
        }
    }

    /// Sensor and timer faults, as opposed to calibration sanity checks.
    #[must_use]
    pub const fn is_sensor_fault(self) -> bool {
        matches!(
            self,
            Fault::Overflow(_) | Fault::Overrun(_) | Fault::Timeout(_)
        )
    }

    /// Operator message cut to the display width.
    #[must_use]
    pub fn message(self) -> String<MESSAGE_WIDTH> {
        let mut line = Truncating(String::new());
        // Truncating never reports an error.
        let _ = write!(line, "{self}");
        line.0
    }
}

struct Truncating(String<MESSAGE_WIDTH>);

impl fmt::Write for Truncating {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Overflow(shaft) => write!(f, "{} Overflow", short_name(*shaft)),
            Fault::Overrun(shaft) => write!(f, "{} Overrun", short_name(*shaft)),
            Fault::Timeout(shaft) => write!(f, "{shaft} Timeout"),
            Fault::Baseline(side) => write!(f, "{side} Baseline"),
            Fault::CamPattern(side) => write!(f, "{side} Cam Pattern"),
        }
    }
}

fn short_name(shaft: ShaftId) -> &'static str {
    match shaft {
        ShaftId::Crank => "Crank",
        ShaftId::LeftCam => "Left",
        ShaftId::RightCam => "Right",
    }
}
