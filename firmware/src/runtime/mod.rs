use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_sync::channel::Channel;

use crate::hw::RelayBank;
use crate::valve;

mod control_task;
mod link_task;
mod valve_task;

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

pub(super) static COMMAND_QUEUE: valve::CommandQueue = Channel::new();
pub(super) static MOVE_QUEUE: valve::MoveQueue = Channel::new();
pub(super) static EVENT_QUEUE: valve::EventQueue = Channel::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA2,
        PA3,
        PB0,
        PB1,
        USART5,
        ..
    } = hal::init(config);

    let relays = RelayBank::new(
        Output::new(PA2, Level::Low, Speed::Low),
        Output::new(PA3, Level::Low, Speed::Low),
    );

    spawner
        .spawn(valve_task::run(
            MOVE_QUEUE.receiver(),
            EVENT_QUEUE.sender(),
            relays,
        ))
        .expect("failed to spawn valve driver task");

    spawner
        .spawn(control_task::run(
            COMMAND_QUEUE.receiver(),
            EVENT_QUEUE.receiver(),
            MOVE_QUEUE.sender(),
        ))
        .expect("failed to spawn control loop task");

    spawner
        .spawn(link_task::run(COMMAND_QUEUE.sender(), USART5, PB0, PB1))
        .expect("failed to spawn supervisory link task");

    core::future::pending::<()>().await;
}
