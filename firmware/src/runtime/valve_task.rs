use crate::hw::RelayBank;
use crate::valve::driver::ValveDriver;
use crate::valve::{EventSender, MoveReceiver};

#[embassy_executor::task]
pub async fn run(
    moves: MoveReceiver<'static>,
    events: EventSender<'static>,
    relays: RelayBank<'static>,
) -> ! {
    ValveDriver::new(moves, events, relays).run().await
}
