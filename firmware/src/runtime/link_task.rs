use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use static_cell::StaticCell;

use controller_core::console::HELP_TOPICS;

use crate::link::{LineBuffer, LineDisposition, LineError};
use crate::status;
use crate::valve::CommandSender;

const LINK_UART_BAUD: u32 = 115_200;
const LINK_BUFFER_SIZE: usize = 256;

static UART_TX_BUFFER: StaticCell<[u8; LINK_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; LINK_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

#[embassy_executor::task]
pub async fn run(
    commands: CommandSender<'static>,
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = LINK_UART_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let tx_buffer = UART_TX_BUFFER.init([0; LINK_BUFFER_SIZE]);
    let rx_buffer = UART_RX_BUFFER.init([0; LINK_BUFFER_SIZE]);

    let uart = BufferedUart::new(
        usart,
        rx_pin,
        tx_pin,
        tx_buffer,
        rx_buffer,
        UartIrqs,
        config,
    )
    .expect("failed to initialize supervisory UART");

    let (mut uart_tx, mut uart_rx) = uart.split();

    let mut lines = LineBuffer::new();
    let mut ingress = [0u8; 64];

    loop {
        match uart_rx.read(&mut ingress).await {
            Ok(count) if count > 0 => {
                for byte in &ingress[..count] {
                    let Some(completed) = lines.push(*byte) else {
                        continue;
                    };

                    match completed {
                        Ok(line) => {
                            if !line.trim().is_empty() {
                                handle_line(line.trim(), &commands, &mut uart_tx).await;
                            }
                        }
                        Err(error) => {
                            defmt::warn!("link: dropped line ({})", line_error_label(error));
                            write_line(&mut uart_tx, "ERR line").await;
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(_) => {
                defmt::warn!("link: UART read error");
                Timer::after(Duration::from_millis(5)).await;
            }
        }
    }
}

async fn handle_line<W: Write>(line: &str, commands: &CommandSender<'static>, tx: &mut W) {
    match crate::link::classify(line) {
        LineDisposition::Command(command) => {
            commands.send(command).await;
            write_line(tx, "OK").await;
        }
        LineDisposition::Reading { channel, value } => {
            // Readings stream continuously and are not acknowledged.
            status::record_reading(channel, value);
        }
        LineDisposition::StatusRequest => {
            let mut reply = heapless::String::<160>::new();
            let _ = core::fmt::write(&mut reply, format_args!("{}", status::snapshot()));
            write_line(tx, &reply).await;
        }
        LineDisposition::HelpRequest => {
            for &(_, text) in HELP_TOPICS {
                write_line(tx, text).await;
            }
        }
        LineDisposition::Rejected { offset } => {
            defmt::warn!("link: rejected line at column {}", offset);
            let mut reply = heapless::String::<48>::new();
            let _ = core::fmt::write(&mut reply, format_args!("ERR syntax at column {offset}"));
            write_line(tx, &reply).await;
        }
    }
}

async fn write_line<W: Write>(tx: &mut W, line: &str) {
    let data = line.as_bytes();
    let mut written = 0usize;

    while written < data.len() {
        match tx.write(&data[written..]).await {
            Ok(count) if count > 0 => written += count,
            Ok(_) => {}
            Err(_) => {
                defmt::warn!("link: UART write error");
                return;
            }
        }
    }

    if tx.write(b"\r\n").await.is_err() || tx.flush().await.is_err() {
        defmt::warn!("link: UART flush error");
    }
}

fn line_error_label(error: LineError) -> &'static str {
    match error {
        LineError::Overflow => "overflow",
        LineError::InvalidUtf8 => "invalid utf-8",
    }
}
