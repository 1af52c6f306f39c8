//! ASI Tiger single-axis (Z) stage.
//!
//! One motor axis with the generic motor properties, the single-axis
//! function generator and a joystick/wheel assignment.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tiger_driver_asi::z_stage::{ZStage, ZStageConfig};
//!
//! let mut focus = ZStage::initialize(&ZStageConfig::new("focus", '3', 'Z'), wire).await?;
//! focus.device_mut().set_text("SingleAxisAmplitude(um)", "20").await?;
//! ```

use crate::axis::{axis_group, measure_speed_range, read_unit_multiplier, speed_truth, AxisUnits, StageExt};
use crate::card::{card_group, check_address, check_axis};
use crate::input::{input_group, InputForm};
use crate::single_axis::single_axis_group;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiger_core::capability::CapabilityContext;
use tiger_core::dispatch::{Device, DeviceCapabilities};
use tiger_core::driver::{DeviceRole, DriverFactory, PropertySurface};
use tiger_core::error::{TigerError, TigerResult};
use tiger_core::property::{PropertyDescriptor, PropertyValue};
use tiger_core::wire::WireAdapter;
use tracing::{info, instrument};

/// Firmware that added the wheel to single-axis input groups.
const WHEEL_SINCE: f64 = 3.14;

/// Host-side state of a Z stage.
#[derive(Debug, Clone)]
pub struct ZStageExt {
    /// Unit multiplier of the axis
    pub units: AxisUnits,
    /// Axis letter
    pub axis: char,
}

impl StageExt for ZStageExt {
    fn units(&self) -> &AxisUnits {
        &self.units
    }

    fn units_mut(&mut self) -> &mut AxisUnits {
        &mut self.units
    }
}

/// An initialized Z stage.
pub struct ZStage {
    device: Device<ZStageExt>,
}

impl ZStage {
    /// Read the unit multiplier and speed range, then build the properties.
    #[instrument(skip(config, wire), fields(device = %config.id, address = %config.address))]
    pub async fn initialize(config: &ZStageConfig, wire: Arc<dyn WireAdapter>) -> TigerResult<Self> {
        let axis = config.axis()?;
        let identity = wire.card_identity(config.address).await?;
        let context = CapabilityContext::new(identity.version).with_build(identity.build.clone());

        let mut units = AxisUnits::default();
        units.set(axis, read_unit_multiplier(wire.as_ref(), axis).await?);
        let range = measure_speed_range(wire.as_ref(), axis).await?;
        let truth = speed_truth(&context);

        let description = format!("ASI Z Stage Axis={} HexAddr={}", axis, config.address);
        let mut device = Device::new(
            config.id.clone(),
            DeviceCapabilities::new(config.address, [axis]),
            wire,
            context,
            ZStageExt { units, axis },
        );
        device.install(card_group(&description, &identity, None));
        device.install(axis_group(axis, range, truth));
        device.install(single_axis_group(axis));
        device.install(input_group(InputForm::SingleAxis(axis), WHEEL_SINCE));

        let names = device.property_names();
        let failed = device.prime(&names).await;
        device.mark_initialized();

        info!(
            device = device.name(),
            version = identity.version.value(),
            failed,
            "Z stage initialized"
        );
        Ok(Self { device })
    }

    /// Axis letter.
    pub fn axis(&self) -> char {
        self.device.ext().axis
    }

    /// Underlying device.
    pub fn device(&self) -> &Device<ZStageExt> {
        &self.device
    }

    /// Underlying device, mutably.
    pub fn device_mut(&mut self) -> &mut Device<ZStageExt> {
        &mut self.device
    }
}

#[async_trait]
impl PropertySurface for ZStage {
    fn device_name(&self) -> &str {
        self.device.name()
    }

    fn descriptors(&self) -> Vec<PropertyDescriptor> {
        self.device.descriptors()
    }

    async fn get_property(&mut self, name: &str) -> TigerResult<PropertyValue> {
        self.device.get(name).await
    }

    async fn set_property(&mut self, name: &str, text: &str) -> TigerResult<()> {
        self.device.set_text(name, text).await
    }
}

/// Configuration for a Z stage.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZStageConfig {
    /// Device name
    pub id: String,
    /// Card address
    pub address: char,
    /// Axis letter; exactly one
    pub axes: Vec<char>,
}

impl ZStageConfig {
    /// Stage at `address` driving `axis`.
    pub fn new(id: impl Into<String>, address: char, axis: char) -> Self {
        Self {
            id: id.into(),
            address,
            axes: vec![axis],
        }
    }

    fn axis(&self) -> TigerResult<char> {
        match self.axes.as_slice() {
            [axis] => Ok(*axis),
            _ => Err(TigerError::invalid_value(
                "axes",
                format!("{:?}", self.axes),
                "a Z stage has exactly one axis letter",
            )),
        }
    }
}

/// Factory for [`ZStage`].
pub struct ZStageFactory;

static Z_STAGE_ROLES: &[DeviceRole] = &[DeviceRole::Stage];

impl DriverFactory for ZStageFactory {
    fn driver_type(&self) -> &'static str {
        "z_stage"
    }

    fn name(&self) -> &'static str {
        "ASI Tiger Z Stage"
    }

    fn roles(&self) -> &'static [DeviceRole] {
        Z_STAGE_ROLES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: ZStageConfig = config.clone().try_into()?;
        check_address(cfg.address)?;
        match cfg.axes.as_slice() {
            [axis] => check_axis(*axis),
            other => Err(anyhow!(
                "Z stage '{}' needs exactly one axis letter, got {}",
                cfg.id,
                other.len()
            )),
        }
    }

    fn build(
        &self,
        config: toml::Value,
        wire: Arc<dyn WireAdapter>,
    ) -> BoxFuture<'static, Result<Box<dyn PropertySurface>>> {
        Box::pin(async move {
            let cfg: ZStageConfig = config.try_into().context("Invalid Z stage config")?;
            let stage = ZStage::initialize(&cfg, wire)
                .await
                .with_context(|| format!("Failed to initialize Z stage '{}'", cfg.id))?;
            Ok(Box::new(stage) as Box<dyn PropertySurface>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{self, axis_property};
    use tiger_driver_mock::MockWire;

    async fn stage(version: f64) -> (Arc<MockWire>, ZStage) {
        let wire = MockWire::new()
            .with_card('3', version, "STD_ZF\rAxis Props: 0")
            .shared();
        wire.set_register("UM", 'Z', "10000");
        let stage = ZStage::initialize(&ZStageConfig::new("focus", '3', 'Z'), wire.clone())
            .await
            .unwrap();
        (wire, stage)
    }

    #[tokio::test]
    async fn test_groups_installed() {
        let (_wire, stage) = stage(3.30).await;
        let device = stage.device();
        assert!(device.has_property(&axis_property(labels::BACKLASH, 'Z')));
        assert!(device.has_property(labels::SA_AMPLITUDE));
        assert!(device.has_property(labels::JOYSTICK_INPUT));
        assert!(device.has_property(labels::WHEEL_FAST_SPEED));
        assert!(!device.has_property(labels::JOYSTICK_ENABLED));
        assert_eq!(
            device.cached_text(labels::DESCRIPTION).as_deref(),
            Some("ASI Z Stage Axis=Z HexAddr=3")
        );
    }

    #[tokio::test]
    async fn test_wheel_needs_314() {
        let (_wire, stage) = stage(3.13).await;
        assert!(!stage.device().has_property(labels::WHEEL_FAST_SPEED));
    }

    #[tokio::test]
    async fn test_amplitude_uses_unit_multiplier() {
        let (wire, mut stage) = stage(3.30).await;
        stage.set_property(labels::SA_AMPLITUDE, "20").await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("SAA Z=200"));

        stage
            .set_property(&axis_property(labels::AXIS_POLARITY, 'Z'), labels::POLARITY_REVERSED)
            .await
            .unwrap();
        stage.set_property(labels::SA_AMPLITUDE, "20").await.unwrap();
        assert_eq!(wire.last_command().as_deref(), Some("SAA Z=-200"));
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = ZStageFactory;
        let ok: toml::Value = toml::from_str("id = \"z\"\naddress = \"3\"\naxes = [\"Z\"]").unwrap();
        assert!(factory.validate(&ok).is_ok());
        let lower: toml::Value = toml::from_str("id = \"z\"\naddress = \"3\"\naxes = [\"z\"]").unwrap();
        assert!(factory.validate(&lower).is_err());
    }
}
