use avcs_core::capture::{PIN_SAMPLE_COUNT, ShaftId};
use embassy_futures::join::join3;
use embassy_stm32::exti::ExtiInput;

use super::{EDGES, capture_timestamp};

#[embassy_executor::task]
pub async fn run(
    crank: ExtiInput<'static>,
    left_cam: ExtiInput<'static>,
    right_cam: ExtiInput<'static>,
) {
    join3(
        watch(ShaftId::Crank, crank),
        watch(ShaftId::LeftCam, left_cam),
        watch(ShaftId::RightCam, right_cam),
    )
    .await;
}

/// Timestamps every edge on one sensor, then samples the pin to decide which
/// way it went.
async fn watch(shaft: ShaftId, mut pin: ExtiInput<'static>) -> ! {
    loop {
        pin.wait_for_any_edge().await;
        let timestamp = capture_timestamp();
        let samples = (0..PIN_SAMPLE_COUNT).map(|_| pin.is_high());
        if let Err(error) = EDGES.publish_sampled(shaft, timestamp, samples) {
            defmt::warn!("{}", defmt::Display2Format(&error));
        }
    }
}
