//! Open the configured devices on one controller.
//!
//! Every device shares the same [`WireAdapter`]; the serial hub behind it
//! keeps one command on the line at a time.

use crate::config::{DeviceConfig, TigerConfig};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tiger_core::driver::{DriverRegistry, PropertySurface};
use tiger_core::wire::WireAdapter;
use tracing::{info, instrument, warn};

/// Registry with every ASI device kind.
pub fn registry() -> DriverRegistry {
    let registry = DriverRegistry::new();
    tiger_driver_asi::register_all(&registry);
    registry
}

/// Validate every device section without touching hardware.
pub fn validate_devices(config: &TigerConfig) -> Result<()> {
    let registry = registry();
    for device in &config.devices {
        registry
            .validate(device.kind.as_str(), &device.driver_section()?)
            .with_context(|| format!("device '{}'", device.id))?;
    }
    Ok(())
}

/// Initialized devices by id.
pub struct Session {
    devices: BTreeMap<String, Box<dyn PropertySurface>>,
}

impl Session {
    /// Initialize every enabled device.
    #[instrument(skip_all, fields(devices = config.devices.len()))]
    pub async fn open(config: &TigerConfig, wire: Arc<dyn WireAdapter>) -> Result<Self> {
        let registry = registry();
        let mut devices = BTreeMap::new();
        for device in config.enabled_devices() {
            let surface = open_device(&registry, device, wire.clone()).await?;
            devices.insert(device.id.clone(), surface);
        }
        let skipped = config.devices.len() - devices.len();
        if skipped > 0 {
            warn!(skipped, "disabled devices not opened");
        }
        info!(opened = devices.len(), "session ready");
        Ok(Self { devices })
    }

    /// Initialize only the device `id`, enabled or not.
    pub async fn open_one(config: &TigerConfig, id: &str, wire: Arc<dyn WireAdapter>) -> Result<Self> {
        let device = config
            .device(id)
            .ok_or_else(|| anyhow!("no device '{}' in configuration", id))?;
        let surface = open_device(&registry(), device, wire).await?;
        let mut devices = BTreeMap::new();
        devices.insert(device.id.clone(), surface);
        Ok(Self { devices })
    }

    /// Device ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Device by id.
    pub fn device(&mut self, id: &str) -> Result<&mut (dyn PropertySurface + 'static)> {
        self.devices
            .get_mut(id)
            .map(|d| d.as_mut())
            .ok_or_else(|| anyhow!("device '{}' is not open", id))
    }

    /// Read `property` of device `id` as text.
    pub async fn get(&mut self, id: &str, property: &str) -> Result<String> {
        let value = self
            .device(id)?
            .get_property(property)
            .await
            .with_context(|| format!("{}: failed to read '{}'", id, property))?;
        Ok(value.to_string())
    }

    /// Write `property` of device `id` from text.
    pub async fn set(&mut self, id: &str, property: &str, text: &str) -> Result<()> {
        self.device(id)?
            .set_property(property, text)
            .await
            .with_context(|| format!("{}: failed to write '{}' = '{}'", id, property, text))
    }
}

async fn open_device(
    registry: &DriverRegistry,
    device: &DeviceConfig,
    wire: Arc<dyn WireAdapter>,
) -> Result<Box<dyn PropertySurface>> {
    device.validate()?;
    registry
        .build(device.kind.as_str(), device.driver_section()?, wire)
        .await
        .with_context(|| format!("Failed to open device '{}'", device.id))
}
