//! Runtime configuration for the link.
//!
//! The reference hardware setup is a Dragino LoRa/GPS PiHAT: RFM95 on
//! SPI0/CE1 with its DIO0 interrupt line on GPIO4. All of it can be
//! overridden from a `config.toml` in the working directory.

use anyhow::{Context, bail};
use serde::Deserialize;
use std::path::Path;

/// How the radio's interrupt line is wired, decided at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioWiring {
    /// DIO0 is connected; poll the GPIO edge flag instead of reading the
    /// radio's IRQ registers over SPI on every tick.
    WithInterrupt(u8),
    /// No interrupt line; query the radio directly each tick.
    PollingOnly,
}

/// Configuration passed to the main loop. Loaded from TOML, defaults
/// mirror the reference demo (868.00 MHz, node 0 of 2, +14 dBm PA_BOOST).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LinkConfig {
    /// Channel centre frequency in MHz
    pub frequency_mhz: f64,
    /// This node's identifier, also its transmit slot
    pub node_id: u8,
    /// Total number of participating nodes
    pub node_count: u8,
    /// Transmit power in dBm
    pub tx_power_dbm: i8,
    /// Route power through the RFO pin instead of PA_BOOST
    pub use_rfo: bool,
    /// SPI bus number (0 = /dev/spidev0.x)
    pub spi_bus: u8,
    /// SPI chip-select line on that bus
    pub spi_slave: u8,
    /// BCM pin wired to the radio's DIO0, if any
    pub irq_pin: Option<u8>,
    /// BCM pin wired to the radio's reset line, if any
    pub reset_pin: Option<u8>,
    /// Delay between main-loop ticks in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 868.00,
            node_id: 0,
            node_count: 2,
            tx_power_dbm: 14,
            use_rfo: false,
            spi_bus: 0,
            spi_slave: 1,
            irq_pin: Some(4),
            reset_pin: None,
            tick_interval_ms: 5,
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        Ok(config)
    }

    /// Load from `config_path` when the file exists, defaults otherwise.
    pub fn load_or_default(config_path: &Path) -> anyhow::Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Rejects configurations the slot schedule cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_count == 0 {
            bail!("node-count must be at least 1");
        }
        if self.node_id >= self.node_count {
            bail!(
                "node-id {} is out of range for node-count {}",
                self.node_id,
                self.node_count
            );
        }
        if self.tick_interval_ms == 0 {
            bail!("tick-interval-ms must be non-zero");
        }
        Ok(())
    }

    pub fn wiring(&self) -> RadioWiring {
        match self.irq_pin {
            Some(pin) => RadioWiring::WithInterrupt(pin),
            None => RadioWiring::PollingOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_case_toml_with_partial_keys() {
        let config: LinkConfig = toml::from_str(
            r#"
            frequency-mhz = 915.0
            node-id = 1
            node-count = 3
            irq-pin = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.frequency_mhz, 915.0);
        assert_eq!(config.node_id, 1);
        assert_eq!(config.node_count, 3);
        assert_eq!(config.wiring(), RadioWiring::WithInterrupt(25));
        // Unspecified keys fall back to the defaults
        assert_eq!(config.tx_power_dbm, 14);
        assert_eq!(config.tick_interval_ms, 5);
    }

    #[test]
    fn defaults_validate_and_use_the_interrupt_pin() {
        let config = LinkConfig::default();
        config.validate().unwrap();
        assert_eq!(config.wiring(), RadioWiring::WithInterrupt(4));
    }

    #[test]
    fn rejects_zero_nodes_and_out_of_range_id() {
        let mut config = LinkConfig::default();
        config.node_count = 0;
        assert!(config.validate().is_err());

        config.node_count = 2;
        config.node_id = 2;
        assert!(config.validate().is_err());

        config.node_id = 1;
        config.validate().unwrap();
    }

    #[test]
    fn absent_irq_pin_means_polling_only() {
        let config = LinkConfig {
            irq_pin: None,
            ..LinkConfig::default()
        };
        assert_eq!(config.wiring(), RadioWiring::PollingOnly);
    }
}
