//! Radio transport abstraction and the RFM95 driver behind it.
//!
//! The main loop only ever sees the [`RadioTransport`] trait, so the
//! register-level driver can be swapped for a mock in tests. Packet framing
//! follows the RadioHead convention: every LoRa payload starts with a
//! four-byte TO/FROM/ID/FLAGS header, and promiscuous mode disables the
//! destination filter so the demo can display everyone's traffic.

pub mod irq;
pub mod rf95;

use thiserror::Error;

pub use irq::{EdgeMonitor, IrqPinMonitor};
pub use rf95::Rf95;

/// Destination address that every node accepts.
pub const BROADCAST_ADDRESS: u8 = 0xFF;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("SPI transfer failed: {0}")]
    Spi(#[from] rppal::spi::Error),
    #[error("GPIO access failed: {0}")]
    Gpio(#[from] rppal::gpio::Error),
    #[error("no LoRa radio detected (op-mode register read back {0:#04x})")]
    NotDetected(u8),
    #[error("payload of {0} bytes exceeds the maximum message length")]
    PayloadTooLong(usize),
    #[error("transmit completion not confirmed within the timeout")]
    TxTimeout,
}

/// A packet pulled out of the radio's FIFO, consumed immediately for
/// display and never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    pub from: u8,
    pub to: u8,
    pub id: u8,
    pub flags: u8,
    /// Signal strength of this packet in dBm
    pub rssi: i16,
    pub payload: Vec<u8>,
}

/// The half-duplex radio as the main loop sees it.
///
/// `wait_packet_sent` is the only call that may block; everything else is a
/// register poll or configuration write.
pub trait RadioTransport {
    fn init(&mut self) -> Result<(), RadioError>;
    fn set_frequency(&mut self, mhz: f64) -> Result<(), RadioError>;
    fn set_tx_power(&mut self, dbm: i8, use_rfo: bool) -> Result<(), RadioError>;
    fn set_node_address(&mut self, address: u8) -> Result<(), RadioError>;
    fn set_header_from(&mut self, from: u8) -> Result<(), RadioError>;
    fn set_promiscuous(&mut self, promiscuous: bool) -> Result<(), RadioError>;
    fn set_mode_tx(&mut self) -> Result<(), RadioError>;
    fn set_mode_rx(&mut self) -> Result<(), RadioError>;

    /// Non-blocking check for a complete, accepted packet.
    fn available(&mut self) -> Result<bool, RadioError>;
    /// Takes the pending packet, if any. A packet that was signalled as
    /// available but cannot be retrieved is simply dropped.
    fn recv(&mut self) -> Result<Option<ReceivedPacket>, RadioError>;

    /// Enqueues `payload` for transmission. Completion is confirmed
    /// separately by `wait_packet_sent`.
    fn send(&mut self, payload: &[u8]) -> Result<(), RadioError>;
    /// Blocks until the in-flight transmission completes, bounded by the
    /// driver's internal timeout.
    fn wait_packet_sent(&mut self) -> Result<(), RadioError>;

    /// Puts the radio into its lowest-power mode for shutdown.
    fn sleep(&mut self) -> Result<(), RadioError>;

    /// Largest payload `send` accepts, excluding the packet header.
    fn max_message_len(&self) -> usize;
}
