use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{OutputType, Pull};
use embassy_stm32::time::hz;
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;
use static_cell::StaticCell;

use avcs_core::config::ControllerConfig;
use avcs_core::controller::Controller;

use crate::capture::{ChannelInbox, EdgeChannels};
use crate::sensors::OilSender;
use crate::solenoid::{SOLENOID_PWM_HZ, Solenoids};

mod control_task;
mod edge_task;
mod oil_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

type FirmwareController = Controller<ChannelInbox<'static, CriticalSectionRawMutex>>;

pub(super) static EDGES: EdgeChannels<CriticalSectionRawMutex> = EdgeChannels::new();
static CONTROLLER: StaticCell<FirmwareController> = StaticCell::new();

/// Microsecond capture clock; wraps every ~71.6 minutes.
#[allow(clippy::cast_possible_truncation)]
fn capture_timestamp() -> u32 {
    Instant::now().as_micros() as u32
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA8,
        EXTI0,
        EXTI1,
        EXTI8,
        PA4,
        ADC1,
        TIM3,
        PA6,
        PA7,
        ..
    } = hal::init(config);

    // Hall sensors pull low while a tooth passes.
    let crank = ExtiInput::new(PA0, EXTI0, Pull::Up);
    let left_cam = ExtiInput::new(PA1, EXTI1, Pull::Up);
    let right_cam = ExtiInput::new(PA8, EXTI8, Pull::Up);

    let pwm = SimplePwm::new(
        TIM3,
        Some(PwmPin::new(PA6, OutputType::PushPull)),
        Some(PwmPin::new(PA7, OutputType::PushPull)),
        None,
        None,
        hz(SOLENOID_PWM_HZ),
        CountingMode::EdgeAlignedUp,
    );
    let solenoids = Solenoids::new(pwm);
    let oil_sender = OilSender::new(Adc::new(ADC1), PA4);

    let controller = match Controller::new(ControllerConfig::new(), EDGES.inbox()) {
        Ok(controller) => controller,
        Err(error) => {
            defmt::error!("controller config rejected: {}", defmt::Display2Format(&error));
            return;
        }
    };
    let controller = CONTROLLER.init(controller);

    defmt::info!("avcs controller starting");

    spawner
        .spawn(edge_task::run(crank, left_cam, right_cam))
        .expect("edge task spawn");
    spawner
        .spawn(oil_task::run(oil_sender))
        .expect("oil task spawn");
    spawner
        .spawn(control_task::run(controller, solenoids))
        .expect("control task spawn");
}
