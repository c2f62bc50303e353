//! Register-level driver for the RFM95/SX1276 LoRa module over SPI.
//!
//! Implements the subset of the chip the link needs: the long-range modem
//! with the Bw125Cr45Sf128 profile (125 kHz bandwidth, 4/5 coding rate,
//! SF7, CRC on), RadioHead-compatible four-byte packet headers, and polled
//! IRQ flags. Receive runs in continuous mode; transmit is one-shot and
//! confirmed by polling TxDone with a bounded wait.

use log::{debug, trace, warn};
use rppal::gpio::OutputPin;
use rppal::spi::Spi;
use std::thread;
use std::time::{Duration, Instant};

use super::{BROADCAST_ADDRESS, RadioError, RadioTransport, ReceivedPacket};

// SPI register map (SX1276 datasheet, LoRa page)
const REG_00_FIFO: u8 = 0x00;
const REG_01_OP_MODE: u8 = 0x01;
const REG_06_FRF_MSB: u8 = 0x06;
const REG_07_FRF_MID: u8 = 0x07;
const REG_08_FRF_LSB: u8 = 0x08;
const REG_09_PA_CONFIG: u8 = 0x09;
const REG_0D_FIFO_ADDR_PTR: u8 = 0x0D;
const REG_0E_FIFO_TX_BASE_ADDR: u8 = 0x0E;
const REG_0F_FIFO_RX_BASE_ADDR: u8 = 0x0F;
const REG_10_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
const REG_12_IRQ_FLAGS: u8 = 0x12;
const REG_13_RX_NB_BYTES: u8 = 0x13;
const REG_1A_PKT_RSSI_VALUE: u8 = 0x1A;
const REG_1D_MODEM_CONFIG1: u8 = 0x1D;
const REG_1E_MODEM_CONFIG2: u8 = 0x1E;
const REG_20_PREAMBLE_MSB: u8 = 0x20;
const REG_21_PREAMBLE_LSB: u8 = 0x21;
const REG_22_PAYLOAD_LENGTH: u8 = 0x22;
const REG_26_MODEM_CONFIG3: u8 = 0x26;
const REG_40_DIO_MAPPING1: u8 = 0x40;
const REG_4D_PA_DAC: u8 = 0x4D;

const SPI_WRITE_MASK: u8 = 0x80;

// REG_01_OP_MODE bits
const LONG_RANGE_MODE: u8 = 0x80;
const MODE_SLEEP: u8 = 0x00;
const MODE_STDBY: u8 = 0x01;
const MODE_TX: u8 = 0x03;
const MODE_RXCONTINUOUS: u8 = 0x05;

// REG_12_IRQ_FLAGS bits
const IRQ_RX_DONE: u8 = 0x40;
const IRQ_PAYLOAD_CRC_ERROR: u8 = 0x20;
const IRQ_TX_DONE: u8 = 0x08;

// REG_09_PA_CONFIG bits
const PA_SELECT: u8 = 0x80;
const MAX_POWER: u8 = 0x70;

// REG_4D_PA_DAC values
const PA_DAC_DISABLE: u8 = 0x04;
const PA_DAC_ENABLE: u8 = 0x07;

// DIO0 mappings
const DIO0_RX_DONE: u8 = 0x00;
const DIO0_TX_DONE: u8 = 0x40;

// Bw125Cr45Sf128, explicit header, CRC on, AGC on
const MODEM_CONFIG1_BW125_CR45: u8 = 0x72;
const MODEM_CONFIG2_SF7_CRC_ON: u8 = 0x74;
const MODEM_CONFIG3_AGC_ON: u8 = 0x04;

// Synthesizer step: 32 MHz crystal over a 19-bit divider
const FSTEP_HZ: f64 = 32_000_000.0 / 524_288.0;

// RSSI correction for the high-frequency port
const RSSI_OFFSET: i16 = -137;

/// Largest LoRa payload the FIFO holds.
pub const MAX_PAYLOAD_LEN: usize = 255;
/// TO/FROM/ID/FLAGS header prepended to every packet.
pub const HEADER_LEN: usize = 4;
/// Largest user message per packet.
pub const MAX_MESSAGE_LEN: usize = MAX_PAYLOAD_LEN - HEADER_LEN;

const TX_CONFIRM_TIMEOUT: Duration = Duration::from_millis(2000);
const TX_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpMode {
    Sleep,
    Standby,
    Tx,
    Rx,
}

/// RFM95 driver instance. Owns the SPI handle and, when wired, the reset
/// pin; the DIO0 interrupt line is handled separately by `IrqPinMonitor`.
pub struct Rf95 {
    spi: Spi,
    reset: Option<OutputPin>,
    mode: OpMode,
    this_address: u8,
    tx_header_to: u8,
    tx_header_from: u8,
    tx_header_id: u8,
    tx_header_flags: u8,
    promiscuous: bool,
    rx_pending: Option<ReceivedPacket>,
}

impl Rf95 {
    pub fn new(spi: Spi, reset: Option<OutputPin>) -> Self {
        Self {
            spi,
            reset,
            mode: OpMode::Sleep,
            this_address: BROADCAST_ADDRESS,
            tx_header_to: BROADCAST_ADDRESS,
            tx_header_from: BROADCAST_ADDRESS,
            tx_header_id: 0,
            tx_header_flags: 0,
            promiscuous: false,
            rx_pending: None,
        }
    }

    fn read_register(&mut self, register: u8) -> Result<u8, RadioError> {
        let write_buf = [register & !SPI_WRITE_MASK, 0];
        let mut read_buf = [0u8; 2];
        self.spi.transfer(&mut read_buf, &write_buf)?;
        Ok(read_buf[1])
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), RadioError> {
        self.spi.write(&[register | SPI_WRITE_MASK, value])?;
        trace!("reg {register:#04x} <- {value:#04x}");
        Ok(())
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), RadioError> {
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.push(REG_00_FIFO | SPI_WRITE_MASK);
        buf.extend_from_slice(data);
        self.spi.write(&buf)?;
        Ok(())
    }

    fn read_fifo(&mut self, len: usize) -> Result<Vec<u8>, RadioError> {
        let mut write_buf = vec![0u8; len + 1];
        write_buf[0] = REG_00_FIFO & !SPI_WRITE_MASK;
        let mut read_buf = vec![0u8; len + 1];
        self.spi.transfer(&mut read_buf, &write_buf)?;
        read_buf.remove(0);
        Ok(read_buf)
    }

    fn set_op_mode(&mut self, bits: u8, mode: OpMode) -> Result<(), RadioError> {
        self.write_register(REG_01_OP_MODE, LONG_RANGE_MODE | bits)?;
        self.mode = mode;
        Ok(())
    }

    /// Pulses the reset line when one is wired, per the module datasheet.
    fn pulse_reset(&mut self) -> Result<(), RadioError> {
        if let Some(reset) = self.reset.as_mut() {
            reset.set_low();
            thread::sleep(Duration::from_millis(150));
            reset.set_high();
            thread::sleep(Duration::from_millis(100));
        }
        Ok(())
    }

    /// Pulls a just-arrived packet out of the FIFO, applying the CRC and
    /// destination filters. Returns whether a packet was accepted.
    fn take_rx_packet(&mut self, irq_flags: u8) -> Result<bool, RadioError> {
        // Clearing the flags also re-arms RxDone for the next packet.
        self.write_register(REG_12_IRQ_FLAGS, 0xFF)?;

        if irq_flags & IRQ_PAYLOAD_CRC_ERROR != 0 {
            warn!("dropping received packet with CRC error");
            return Ok(false);
        }

        let len = self.read_register(REG_13_RX_NB_BYTES)? as usize;
        if len < HEADER_LEN {
            warn!("dropping runt packet of {len} bytes");
            return Ok(false);
        }

        let current = self.read_register(REG_10_FIFO_RX_CURRENT_ADDR)?;
        self.write_register(REG_0D_FIFO_ADDR_PTR, current)?;
        let raw = self.read_fifo(len)?;

        let rssi = i16::from(self.read_register(REG_1A_PKT_RSSI_VALUE)?) + RSSI_OFFSET;

        let to = raw[0];
        if !self.promiscuous && to != self.this_address && to != BROADCAST_ADDRESS {
            trace!("ignoring packet addressed to {to}");
            return Ok(false);
        }

        self.rx_pending = Some(ReceivedPacket {
            to,
            from: raw[1],
            id: raw[2],
            flags: raw[3],
            rssi,
            payload: raw[HEADER_LEN..].to_vec(),
        });
        Ok(true)
    }
}

impl RadioTransport for Rf95 {
    fn init(&mut self) -> Result<(), RadioError> {
        self.pulse_reset()?;

        // Entering sleep with the long-range bit set switches the modem to
        // LoRa; the readback doubles as a presence check for the module.
        self.set_op_mode(MODE_SLEEP, OpMode::Sleep)?;
        thread::sleep(Duration::from_millis(10));
        let op_mode = self.read_register(REG_01_OP_MODE)?;
        if op_mode != LONG_RANGE_MODE | MODE_SLEEP {
            return Err(RadioError::NotDetected(op_mode));
        }

        // Use the whole FIFO for whichever direction is active.
        self.write_register(REG_0E_FIFO_TX_BASE_ADDR, 0)?;
        self.write_register(REG_0F_FIFO_RX_BASE_ADDR, 0)?;
        self.set_op_mode(MODE_STDBY, OpMode::Standby)?;

        self.write_register(REG_1D_MODEM_CONFIG1, MODEM_CONFIG1_BW125_CR45)?;
        self.write_register(REG_1E_MODEM_CONFIG2, MODEM_CONFIG2_SF7_CRC_ON)?;
        self.write_register(REG_26_MODEM_CONFIG3, MODEM_CONFIG3_AGC_ON)?;
        self.write_register(REG_20_PREAMBLE_MSB, 0)?;
        self.write_register(REG_21_PREAMBLE_LSB, 8)?;

        debug!("RFM95 initialized (Bw125Cr45Sf128, CRC on)");
        Ok(())
    }

    fn set_frequency(&mut self, mhz: f64) -> Result<(), RadioError> {
        let frf = frf_for(mhz);
        self.write_register(REG_06_FRF_MSB, (frf >> 16) as u8)?;
        self.write_register(REG_07_FRF_MID, (frf >> 8) as u8)?;
        self.write_register(REG_08_FRF_LSB, frf as u8)?;
        debug!("frequency set to {mhz:.2} MHz (FRF {frf:#08x})");
        Ok(())
    }

    fn set_tx_power(&mut self, dbm: i8, use_rfo: bool) -> Result<(), RadioError> {
        let (pa_config, pa_dac) = pa_config_for(dbm, use_rfo);
        self.write_register(REG_4D_PA_DAC, pa_dac)?;
        self.write_register(REG_09_PA_CONFIG, pa_config)?;
        debug!("tx power set to {dbm} dBm (rfo: {use_rfo})");
        Ok(())
    }

    fn set_node_address(&mut self, address: u8) -> Result<(), RadioError> {
        self.this_address = address;
        Ok(())
    }

    fn set_header_from(&mut self, from: u8) -> Result<(), RadioError> {
        self.tx_header_from = from;
        Ok(())
    }

    fn set_promiscuous(&mut self, promiscuous: bool) -> Result<(), RadioError> {
        self.promiscuous = promiscuous;
        Ok(())
    }

    fn set_mode_tx(&mut self) -> Result<(), RadioError> {
        if self.mode != OpMode::Tx {
            self.write_register(REG_40_DIO_MAPPING1, DIO0_TX_DONE)?;
            self.set_op_mode(MODE_TX, OpMode::Tx)?;
        }
        Ok(())
    }

    fn set_mode_rx(&mut self) -> Result<(), RadioError> {
        if self.mode != OpMode::Rx {
            self.write_register(REG_40_DIO_MAPPING1, DIO0_RX_DONE)?;
            self.set_op_mode(MODE_RXCONTINUOUS, OpMode::Rx)?;
        }
        Ok(())
    }

    fn available(&mut self) -> Result<bool, RadioError> {
        if self.rx_pending.is_some() {
            return Ok(true);
        }
        if self.mode == OpMode::Tx {
            return Ok(false);
        }
        self.set_mode_rx()?;

        let irq_flags = self.read_register(REG_12_IRQ_FLAGS)?;
        if irq_flags & IRQ_RX_DONE == 0 {
            return Ok(false);
        }
        self.take_rx_packet(irq_flags)
    }

    fn recv(&mut self) -> Result<Option<ReceivedPacket>, RadioError> {
        Ok(self.rx_pending.take())
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if payload.len() > MAX_MESSAGE_LEN {
            return Err(RadioError::PayloadTooLong(payload.len()));
        }

        self.set_op_mode(MODE_STDBY, OpMode::Standby)?;
        self.write_register(REG_0D_FIFO_ADDR_PTR, 0)?;

        let header = [
            self.tx_header_to,
            self.tx_header_from,
            self.tx_header_id,
            self.tx_header_flags,
        ];
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(payload);
        self.write_fifo(&frame)?;
        self.write_register(REG_22_PAYLOAD_LENGTH, frame.len() as u8)?;

        self.write_register(REG_40_DIO_MAPPING1, DIO0_TX_DONE)?;
        self.set_op_mode(MODE_TX, OpMode::Tx)?;
        Ok(())
    }

    fn wait_packet_sent(&mut self) -> Result<(), RadioError> {
        let deadline = Instant::now() + TX_CONFIRM_TIMEOUT;
        loop {
            let irq_flags = self.read_register(REG_12_IRQ_FLAGS)?;
            if irq_flags & IRQ_TX_DONE != 0 {
                self.write_register(REG_12_IRQ_FLAGS, 0xFF)?;
                // The chip drops to standby on its own after TxDone.
                self.mode = OpMode::Standby;
                return Ok(());
            }
            if Instant::now() >= deadline {
                self.mode = OpMode::Standby;
                return Err(RadioError::TxTimeout);
            }
            thread::sleep(TX_POLL_INTERVAL);
        }
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        self.set_op_mode(MODE_SLEEP, OpMode::Sleep)
    }

    fn max_message_len(&self) -> usize {
        MAX_MESSAGE_LEN
    }
}

/// Frequency synthesizer word for a channel centre in MHz.
fn frf_for(mhz: f64) -> u32 {
    ((mhz * 1_000_000.0) / FSTEP_HZ) as u32
}

/// PA_CONFIG and PA_DAC register values for a requested output power.
///
/// PA_BOOST covers +5..+23 dBm, the top three of which need the high-power
/// DAC; the RFO pin covers 0..+15 dBm. Out-of-range requests clamp, as the
/// reference driver does.
fn pa_config_for(dbm: i8, use_rfo: bool) -> (u8, u8) {
    if use_rfo {
        let power = dbm.clamp(0, 15) as u8;
        (MAX_POWER | power, PA_DAC_DISABLE)
    } else {
        let mut power = dbm.clamp(5, 23) as u8;
        let pa_dac = if power > 20 {
            power -= 3;
            PA_DAC_ENABLE
        } else {
            PA_DAC_DISABLE
        };
        (PA_SELECT | (power - 5), pa_dac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frf_matches_datasheet_values() {
        // 61.035 Hz steps: 868 MHz and 915 MHz land on well-known words
        assert_eq!(frf_for(868.0), 0xD9_0000);
        assert_eq!(frf_for(915.0), 0xE4_C000);
        assert_eq!(frf_for(434.0), 0x6C_8000);
    }

    #[test]
    fn pa_boost_power_maps_and_clamps() {
        // +14 dBm via PA_BOOST: PA_SELECT | (14 - 5)
        assert_eq!(pa_config_for(14, false), (0x89, PA_DAC_DISABLE));
        // Below the PA_BOOST floor clamps to +5
        assert_eq!(pa_config_for(2, false), (0x80, PA_DAC_DISABLE));
        // +23 dBm engages the high-power DAC and backs the PA off by 3
        assert_eq!(pa_config_for(23, false), (0x8F, PA_DAC_ENABLE));
        assert_eq!(pa_config_for(30, false), (0x8F, PA_DAC_ENABLE));
    }

    #[test]
    fn rfo_power_maps_and_clamps() {
        assert_eq!(pa_config_for(13, true), (MAX_POWER | 13, PA_DAC_DISABLE));
        assert_eq!(pa_config_for(-3, true), (MAX_POWER, PA_DAC_DISABLE));
        assert_eq!(pa_config_for(20, true), (MAX_POWER | 15, PA_DAC_DISABLE));
    }

    #[test]
    fn message_length_leaves_room_for_the_header() {
        assert_eq!(MAX_MESSAGE_LEN, 251);
        assert_eq!(MAX_MESSAGE_LEN + HEADER_LEN, MAX_PAYLOAD_LEN);
    }
}
