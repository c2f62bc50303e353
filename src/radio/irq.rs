//! Rising-edge detection on the radio's DIO0 interrupt line.
//!
//! With DIO0 mapped to RxDone, a detected edge means a packet finished
//! arriving, so the loop only pays for an SPI register read after the GPIO
//! flag fires. Without the line wired, the loop falls back to querying the
//! radio directly every tick.

use log::warn;
use rppal::gpio::{Gpio, InputPin, Trigger};
use std::time::Duration;

/// Non-blocking check-and-clear of a rising-edge event.
pub trait EdgeMonitor {
    /// Returns true when an edge fired since the previous check, clearing
    /// the event in the process.
    fn check_and_clear(&mut self) -> bool;
}

/// Edge monitor over a BCM GPIO pin, pulled down and armed for rising
/// edges at construction.
pub struct IrqPinMonitor {
    pin: InputPin,
}

impl IrqPinMonitor {
    pub fn new(gpio: &Gpio, bcm_pin: u8) -> Result<Self, rppal::gpio::Error> {
        let mut pin = gpio.get(bcm_pin)?.into_input_pulldown();
        pin.set_interrupt(Trigger::RisingEdge)?;
        Ok(Self { pin })
    }
}

impl EdgeMonitor for IrqPinMonitor {
    fn check_and_clear(&mut self) -> bool {
        // Zero timeout: report a queued edge event, never wait for one.
        match self.pin.poll_interrupt(false, Some(Duration::ZERO)) {
            Ok(event) => event.is_some(),
            Err(err) => {
                warn!("edge poll failed: {err}");
                false
            }
        }
    }
}
