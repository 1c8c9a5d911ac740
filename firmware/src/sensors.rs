//! Oil temperature sender conversion.
//!
//! The sender is a linear analog part (10 mV/°C, 500 mV at 0 °C) read through
//! the 12-bit ADC against a 3.3 V reference.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

/// ADC reference in millivolts.
pub const ADC_REFERENCE_MV: u32 = 3_300;
/// Largest raw reading of the 12-bit converter.
pub const ADC_FULL_SCALE: u32 = 4_095;

const SENDER_OFFSET_MV: f32 = 500.0;
const SENDER_MV_PER_DEGREE: f32 = 10.0;

/// Converts a raw ADC reading into millivolts.
pub fn raw_to_millivolts(raw: u16) -> u32 {
    u32::from(raw).min(ADC_FULL_SCALE) * ADC_REFERENCE_MV / ADC_FULL_SCALE
}

/// Oil temperature in °C for a raw ADC reading.
#[allow(clippy::cast_precision_loss)]
pub fn oil_temperature_from_raw(raw: u16) -> f32 {
    (raw_to_millivolts(raw) as f32 - SENDER_OFFSET_MV) / SENDER_MV_PER_DEGREE
}

#[cfg(target_os = "none")]
pub use adc::OilSender;

#[cfg(target_os = "none")]
mod adc {
    use embassy_stm32::Peri;
    use embassy_stm32::adc::{Adc, SampleTime};
    use embassy_stm32::peripherals::{ADC1, PA4};

    /// Oil temperature sender wired to PA4.
    pub struct OilSender<'d> {
        adc: Adc<'d, ADC1>,
        pin: Peri<'d, PA4>,
    }

    impl<'d> OilSender<'d> {
        pub fn new(mut adc: Adc<'d, ADC1>, pin: Peri<'d, PA4>) -> Self {
            adc.set_sample_time(SampleTime::CYCLES160_5);
            Self { adc, pin }
        }

        /// Blocking single conversion, in °C.
        pub fn read_celsius(&mut self) -> f32 {
            super::oil_temperature_from_raw(self.adc.blocking_read(&mut self.pin))
        }
    }
}
