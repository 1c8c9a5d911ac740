//! Oil control solenoid outputs.
//!
//! TIM3 channel 1 drives the left bank solenoid on PA6 and channel 2 the right
//! bank on PA7. The controller reports duty in percent.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

/// PWM carrier frequency for the solenoids.
pub const SOLENOID_PWM_HZ: u32 = 300;

/// Compare value for `percent` duty against a timer period of `max`.
///
/// Out-of-range and NaN duty fall back to the nearest limit (NaN is off).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn compare_for_duty(percent: f32, max: u16) -> u16 {
    let percent = if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    };
    (f32::from(max) * percent / 100.0 + 0.5) as u16
}

#[cfg(target_os = "none")]
pub use pwm::Solenoids;

#[cfg(target_os = "none")]
mod pwm {
    use avcs_core::capture::CamSide;
    use avcs_core::controller::TickOutput;
    use embassy_stm32::peripherals::TIM3;
    use embassy_stm32::timer::simple_pwm::{SimplePwm, SimplePwmChannel};

    /// Both bank solenoids, enabled and parked at 0 % on construction.
    pub struct Solenoids<'d> {
        left: SimplePwmChannel<'d, TIM3>,
        right: SimplePwmChannel<'d, TIM3>,
    }

    impl<'d> Solenoids<'d> {
        pub fn new(pwm: SimplePwm<'d, TIM3>) -> Self {
            let channels = pwm.split();
            let mut solenoids = Self {
                left: channels.ch1,
                right: channels.ch2,
            };
            solenoids.left.set_duty_cycle_fully_off();
            solenoids.right.set_duty_cycle_fully_off();
            solenoids.left.enable();
            solenoids.right.enable();
            solenoids
        }

        /// Applies the duty from one controller tick.
        pub fn apply(&mut self, output: &TickOutput) {
            for side in CamSide::BOTH {
                let channel = match side {
                    CamSide::Left => &mut self.left,
                    CamSide::Right => &mut self.right,
                };
                let compare = super::compare_for_duty(output.duty(side), channel.max_duty_cycle());
                channel.set_duty_cycle(compare);
            }
        }
    }
}
