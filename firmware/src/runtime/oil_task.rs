use embassy_time::{Duration, Ticker};

use crate::sensors::OilSender;
use crate::status;

const OIL_SAMPLE_PERIOD: Duration = Duration::from_millis(100);

#[embassy_executor::task]
pub async fn run(mut sender: OilSender<'static>) -> ! {
    let mut ticker = Ticker::every(OIL_SAMPLE_PERIOD);
    loop {
        status::record_oil_temperature(sender.read_celsius());
        ticker.next().await;
    }
}
