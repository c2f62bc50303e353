//! Half-duplex LoRa console link demo.
//!
//! Alternates between transmit and receive windows on a shared channel
//! using a 1-second-per-node time-division schedule: console input typed
//! during this node's slot goes out as a LoRa packet, and packets heard
//! outside the slot are printed. Runs on a Raspberry Pi with an
//! RFM95/SX1276 module (Dragino PiHAT wiring by default, overridable via
//! `config.toml`).

use anyhow::Context;
use env_logger::Builder;
use log::{LevelFilter, error, info};
use rppal::gpio::Gpio;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use std::path::Path;
use std::time::Duration;

use crate::config::{LinkConfig, RadioWiring};
use crate::console::StdioConsole;
use crate::link::DuplexLink;
use crate::radio::{IrqPinMonitor, RadioTransport, Rf95};

mod config;
mod console;
mod link;
mod radio;
mod schedule;
mod shutdown;

const CONFIG_PATH: &str = "config.toml";

fn spi_bus(bus: u8) -> Bus {
    match bus {
        1 => Bus::Spi1,
        2 => Bus::Spi2,
        _ => Bus::Spi0,
    }
}

fn spi_slave(slave: u8) -> SlaveSelect {
    match slave {
        1 => SlaveSelect::Ss1,
        2 => SlaveSelect::Ss2,
        _ => SlaveSelect::Ss0,
    }
}

fn run() -> anyhow::Result<()> {
    let config =
        LinkConfig::load_or_default(Path::new(CONFIG_PATH)).context("loading configuration")?;
    config.validate().context("validating configuration")?;
    info!(
        "node {} of {} @ {:.2} MHz, {} dBm",
        config.node_id, config.node_count, config.frequency_mhz, config.tx_power_dbm
    );

    let shutdown = shutdown::install();

    // Platform bring-up; failure here is fatal before the loop starts.
    let gpio = Gpio::new().context("initializing GPIO")?;
    let spi = Spi::new(
        spi_bus(config.spi_bus),
        spi_slave(config.spi_slave),
        1_000_000,
        Mode::Mode0,
    )
    .context("opening SPI bus")?;

    let reset = match config.reset_pin {
        Some(pin) => Some(
            gpio.get(pin)
                .context("claiming reset pin")?
                .into_output_high(),
        ),
        None => None,
    };

    let edge = match config.wiring() {
        RadioWiring::WithInterrupt(pin) => {
            info!("using rising-edge detection on GPIO{pin}");
            Some(IrqPinMonitor::new(&gpio, pin).context("arming interrupt pin")?)
        }
        RadioWiring::PollingOnly => {
            info!("no interrupt pin configured, polling the radio directly");
            None
        }
    };

    let mut radio = Rf95::new(spi, reset);
    radio
        .init()
        .context("initializing radio (verify wiring/module)")?;
    radio.set_tx_power(config.tx_power_dbm, config.use_rfo)?;
    radio.set_frequency(config.frequency_mhz)?;
    radio.set_node_address(config.node_id)?;
    radio.set_header_from(config.node_id)?;
    // Grab every node's packets; we are sniffing to display, it's a demo.
    radio.set_promiscuous(true)?;
    radio.set_mode_rx()?;

    console::set_stdin_nonblocking().context("switching stdin to non-blocking")?;

    let console = StdioConsole::new();
    let mut link = DuplexLink::new(radio, edge, console, config.node_id, config.node_count);

    info!("entering main loop (Ctrl-C to exit)");
    link::run(
        &mut link,
        shutdown,
        Duration::from_millis(config.tick_interval_ms),
    );
    Ok(())
}

fn main() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("lora_duplex"), LevelFilter::Debug)
        .init();

    if let Err(err) = run() {
        error!("{err:#}");
        std::process::exit(1);
    }
}
