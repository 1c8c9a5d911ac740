use avcs_core::capture::ShaftId;
use avcs_core::controller::TickInputs;
use avcs_core::curve::EXHAUST_CAM_TARGET_CURVE;
use embassy_time::{Duration, Ticker};

use super::{EDGES, FirmwareController, capture_timestamp};
use crate::solenoid::Solenoids;
use crate::status;
use crate::telemetry::{self, TelemetryDrain};

const TICK_PERIOD: Duration = Duration::from_millis(1);
/// Ticks between status lines.
const STATUS_INTERVAL: u32 = 1_000;

#[embassy_executor::task]
pub async fn run(controller: &'static mut FirmwareController, mut solenoids: Solenoids<'static>) -> ! {
    let mut ticker = Ticker::every(TICK_PERIOD);
    let mut drain = TelemetryDrain::new();
    let mut ticks_until_status = STATUS_INTERVAL;

    loop {
        ticker.next().await;

        // Without a sender reading the controller must not leave Warming.
        let oil_temperature = status::oil_temperature().unwrap_or(f32::MIN);
        #[allow(clippy::cast_precision_loss)]
        let rpm = controller.diagnostics().crank_rpm() as f32;
        let inputs = TickInputs::new(oil_temperature, EXHAUST_CAM_TARGET_CURVE.value_at(rpm));

        let output = controller.tick(capture_timestamp(), inputs);
        solenoids.apply(&output);

        status::record_diagnostics(&controller.diagnostics());
        drain.drain(controller.telemetry());

        ticks_until_status -= 1;
        if ticks_until_status == 0 {
            ticks_until_status = STATUS_INTERVAL;
            for shaft in ShaftId::ALL {
                status::record_ambiguous_bursts(shaft, EDGES.ambiguous_bursts(shaft));
            }
            telemetry::log_status(&status::snapshot());
        }
    }
}
