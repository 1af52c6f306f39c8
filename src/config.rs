//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `TIGER_DAQ_`, nested keys
//!    separated by a double underscore
//!
//! # Example
//!
//! ```toml
//! [application]
//! name = "Tiger rig"
//! log_level = "info"
//!
//! [serial]
//! port = "/dev/ttyUSB0"
//!
//! [[devices]]
//! id = "shutter"
//! kind = "plogic"
//! address = "3"
//! axes = ["E"]
//! mode = "four_channel_shutter"
//! ```
//!
//! ```no_run
//! use tiger_daq::config::TigerConfig;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = TigerConfig::load_from("tiger.toml")?;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, bail, Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tiger_core::limits::{DEFAULT_BAUD_RATE, DEFAULT_REPLY_TIMEOUT};
use tiger_driver_asi::card::{check_address, check_axis};
use tiger_driver_asi::pmt::channel_char;
use tiger_driver_asi::PLogicMode;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "tiger.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "TIGER_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TigerConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial line to the controller
    pub serial: SerialConfig,
    /// Devices on the controller
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Serial line configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reply timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Kind of Tiger device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Programmable logic card
    Plogic,
    /// Two-axis stage
    XyStage,
    /// Single-axis stage
    ZStage,
    /// Photomultiplier channel
    Pmt,
}

impl DeviceKind {
    /// Driver factory key.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Plogic => "plogic",
            DeviceKind::XyStage => "xy_stage",
            DeviceKind::ZStage => "z_stage",
            DeviceKind::Pmt => "pmt",
        }
    }

    /// Number of axis letters a device of this kind takes.
    pub fn axis_count(self) -> usize {
        match self {
            DeviceKind::XyStage => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device on the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier
    pub id: String,
    /// Device kind
    pub kind: DeviceKind,
    /// Card address
    pub address: char,
    /// Axis letters
    pub axes: Vec<char>,
    /// PLogic pre-init mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// PMT channel, 1-6
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    /// Whether this device is opened
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl DeviceConfig {
    /// Section handed to the driver factory.
    pub fn driver_section(&self) -> Result<toml::Value> {
        toml::Value::try_from(self)
            .with_context(|| format!("Failed to convert device '{}' to a driver section", self.id))
    }

    /// Check the fields a driver factory cannot see without hardware.
    pub fn validate(&self) -> Result<()> {
        check_address(self.address).with_context(|| format!("device '{}'", self.id))?;
        if self.axes.len() != self.kind.axis_count() {
            bail!(
                "device '{}' ({}) needs {} axis letter(s), got {}",
                self.id,
                self.kind,
                self.kind.axis_count(),
                self.axes.len()
            );
        }
        for axis in &self.axes {
            check_axis(*axis).with_context(|| format!("device '{}'", self.id))?;
        }

        match (&self.mode, self.kind) {
            (Some(mode), DeviceKind::Plogic) => {
                mode.parse::<PLogicMode>()
                    .map_err(|e| anyhow!("device '{}': {}", self.id, e))?;
            }
            (Some(_), kind) => bail!("device '{}': 'mode' does not apply to {}", self.id, kind),
            (None, _) => {}
        }

        match (self.channel, self.kind) {
            (Some(channel), DeviceKind::Pmt) if channel_char(channel).is_none() => {
                bail!("device '{}': PMT channel {} is outside 1-6", self.id, channel)
            }
            (Some(_), DeviceKind::Pmt) | (None, _) => {}
            (Some(_), kind) => bail!("device '{}': 'channel' does not apply to {}", self.id, kind),
        }
        Ok(())
    }
}

// Default value functions
fn default_name() -> String {
    "tiger-daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> u64 {
    DEFAULT_REPLY_TIMEOUT.as_millis() as u64
}

fn default_enabled() -> bool {
    true
}

/// Accepted log levels.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl TigerConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables override file values, e.g.
    /// `TIGER_DAQ_SERIAL__PORT=/dev/ttyUSB1`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Self::figment(path)
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        let level = self.application.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            bail!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            );
        }
        if self.serial.port.trim().is_empty() {
            bail!("serial.port is empty");
        }

        let mut ids = HashSet::new();
        for device in &self.devices {
            if !ids.insert(&device.id) {
                bail!("Duplicate device ID: {}", device.id);
            }
            device.validate()?;
        }
        Ok(())
    }

    /// Devices with `enabled = true`.
    pub fn enabled_devices(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.devices.iter().filter(|d| d.enabled)
    }

    /// Device by id.
    pub fn device(&self, id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == id)
    }
}
