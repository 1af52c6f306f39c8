//! ASI Tiger photomultiplier card.
//!
//! A PMT card carries up to six detectors. Channel `n` (1-6) is addressed on
//! the wire by one of the axis characters `X Y Z F T R`; the averaging
//! filter instead uses the device's own axis letter without a card address.
//!
//! ```text
//! <addr>WRDAC <ch>=<n>   gain 0-1000
//! E <axis>=<n>           averaging 0-5
//! <addr>RA <ch>?         signal
//! <addr>LK <ch>?         0 while overloaded
//! <addr>LK <ch>          clear the overload latch
//! ```

use crate::card::{card_group, check_address, check_axis, ActionHandler};
use crate::labels::{self, NO, YES};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiger_core::binding::WireBinding;
use tiger_core::capability::{CapabilityContext, PropertyCandidate};
use tiger_core::dispatch::{Device, DeviceCapabilities, PropertyGroup, PropertyHandler, WriteOutcome};
use tiger_core::driver::{DeviceRole, DriverFactory, PropertySurface};
use tiger_core::error::{TigerError, TigerResult};
use tiger_core::limits::OVERLOAD_RESET_SETTLE;
use tiger_core::property::{PropertyDescriptor, PropertyValue};
use tiger_core::wire::{Marker, WireAdapter, ACK_PREFIX};
use tracing::{info, instrument};

/// Wire characters of channels 1 to 6.
const CHANNEL_CHARS: [char; 6] = ['X', 'Y', 'Z', 'F', 'T', 'R'];

/// Wire character of PMT `channel`, or `None` outside 1-6.
pub fn channel_char(channel: u8) -> Option<char> {
    CHANNEL_CHARS.get(usize::from(channel).checked_sub(1)?).copied()
}

/// Build the PMT properties.
fn pmt_group(address: char, axis: char, channel: char) -> PropertyGroup<()> {
    let mut group = PropertyGroup::new();
    group.add(
        PropertyCandidate::integer(labels::PMT_GAIN, 0).limits(0.0, 1000.0),
        WireBinding::query(format!("{}WRDAC {}?", address, channel), format!("{}=", channel))
            .command(format!("{}WRDAC {}={{}}", address, channel)),
    );
    group.add(
        PropertyCandidate::integer(labels::PMT_AVERAGE, 1).limits(0.0, 5.0),
        WireBinding::query(format!("E {}?", axis), format!(":{}=", axis))
            .command(format!("E {}={{}}", axis)),
    );
    group.add(
        PropertyCandidate::action(
            labels::PMT_OVERLOAD_RESET,
            labels::OFF,
            labels::ON,
            labels::OVERLOAD_RESET_DONE,
        ),
        ActionHandler::new(format!("{}LK {}", address, channel))
            .settle(OVERLOAD_RESET_SETTLE)
            .labels(labels::ON, labels::OVERLOAD_RESET_DONE),
    );
    group.add(
        PropertyCandidate::integer(labels::PMT_SIGNAL, 0)
            .read_only()
            .always_live(),
        WireBinding::query(format!("{}RA {}?", address, channel), ACK_PREFIX)
            .at(Marker::AfterPosition(2)),
    );
    group.add(
        PropertyCandidate::enumeration(labels::PMT_OVERLOAD, NO)
            .yes_no()
            .read_only()
            .always_live(),
        OverloadHandler { address, channel },
    );
    group
}

/// `LK <ch>?`: the latch reads 0 while the tube is overloaded.
struct OverloadHandler {
    address: char,
    channel: char,
}

#[async_trait]
impl PropertyHandler<()> for OverloadHandler {
    async fn read(
        &self,
        device: &mut Device<()>,
        _descriptor: &PropertyDescriptor,
    ) -> TigerResult<Option<PropertyValue>> {
        let latch = device
            .wire()
            .send_and_verify(&format!("{}LK {}?", self.address, self.channel), ACK_PREFIX)
            .await?
            .integer(Marker::AfterPosition(2))?;
        Ok(Some(if latch == 0 { YES } else { NO }.into()))
    }

    async fn write(
        &self,
        _device: &mut Device<()>,
        _descriptor: &PropertyDescriptor,
        _value: &PropertyValue,
    ) -> TigerResult<WriteOutcome> {
        Ok(WriteOutcome::Ignored)
    }
}

/// An initialized PMT channel.
pub struct Pmt {
    device: Device<()>,
    channel: u8,
}

impl Pmt {
    /// Query the card and build the PMT properties.
    #[instrument(skip(config, wire), fields(device = %config.id, address = %config.address))]
    pub async fn initialize(config: &PmtConfig, wire: Arc<dyn WireAdapter>) -> TigerResult<Self> {
        let axis = config.axis()?;
        let channel = config.channel_char()?;
        let identity = wire.card_identity(config.address).await?;
        let context = CapabilityContext::new(identity.version).with_build(identity.build.clone());

        let description = format!(
            "ASI PMT HexAddr={} Axis Char={} Channel={}:{}",
            config.address, axis, config.channel, channel
        );
        let mut device = Device::new(
            config.id.clone(),
            DeviceCapabilities::new(config.address, [axis]),
            wire,
            context,
            (),
        );
        device.install(card_group(&description, &identity, None));
        device.install(pmt_group(config.address, axis, channel));

        let names = device.property_names();
        let failed = device.prime(&names).await;
        device.mark_initialized();

        info!(
            device = device.name(),
            version = identity.version.value(),
            channel = config.channel,
            failed,
            "PMT initialized"
        );
        Ok(Self {
            device,
            channel: config.channel,
        })
    }

    /// Current signal, straight from the card.
    pub async fn signal(&mut self) -> TigerResult<i64> {
        self.device
            .get(labels::PMT_SIGNAL)
            .await?
            .as_i64()
            .ok_or_else(|| TigerError::parse("PMT signal", labels::PMT_SIGNAL))
    }

    /// Whether the overload latch is tripped.
    pub async fn is_overloaded(&mut self) -> TigerResult<bool> {
        Ok(self.device.get(labels::PMT_OVERLOAD).await?.as_str() == Some(YES))
    }

    /// Clear the overload latch.
    pub async fn reset_overload(&mut self) -> TigerResult<()> {
        self.device
            .set(labels::PMT_OVERLOAD_RESET, labels::ON.into())
            .await
    }

    /// Channel number, 1-6.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Underlying device.
    pub fn device(&self) -> &Device<()> {
        &self.device
    }

    /// Underlying device, mutably.
    pub fn device_mut(&mut self) -> &mut Device<()> {
        &mut self.device
    }
}

#[async_trait]
impl PropertySurface for Pmt {
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

fn default_channel() -> u8 {
    1
}

/// Configuration for one PMT channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PmtConfig {
    /// Device name
    pub id: String,
    /// Card address
    pub address: char,
    /// Axis letter used by the averaging filter; exactly one
    pub axes: Vec<char>,
    /// Channel on the card, 1-6
    #[serde(default = "default_channel")]
    pub channel: u8,
}

impl PmtConfig {
    /// PMT `channel` on the card at `address`.
    pub fn new(id: impl Into<String>, address: char, axis: char, channel: u8) -> Self {
        Self {
            id: id.into(),
            address,
            axes: vec![axis],
            channel,
        }
    }

    fn axis(&self) -> TigerResult<char> {
        match self.axes.as_slice() {
            [axis] => Ok(*axis),
            _ => Err(TigerError::invalid_value(
                "axes",
                format!("{:?}", self.axes),
                "a PMT has exactly one axis letter",
            )),
        }
    }

    fn channel_char(&self) -> TigerResult<char> {
        channel_char(self.channel)
            .ok_or_else(|| TigerError::invalid_value("channel", self.channel, "expected 1-6"))
    }
}

/// Factory for [`Pmt`].
pub struct PmtFactory;

static PMT_ROLES: &[DeviceRole] = &[DeviceRole::Detector];

impl DriverFactory for PmtFactory {
    fn driver_type(&self) -> &'static str {
        "pmt"
    }

    fn name(&self) -> &'static str {
        "ASI Tiger PMT"
    }

    fn roles(&self) -> &'static [DeviceRole] {
        PMT_ROLES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: PmtConfig = config.clone().try_into()?;
        check_address(cfg.address)?;
        if channel_char(cfg.channel).is_none() {
            return Err(anyhow!(
                "PMT '{}' channel {} is outside 1-6",
                cfg.id,
                cfg.channel
            ));
        }
        match cfg.axes.as_slice() {
            [axis] => check_axis(*axis),
            other => Err(anyhow!(
                "PMT '{}' needs exactly one axis letter, got {}",
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
            let cfg: PmtConfig = config.try_into().context("Invalid PMT config")?;
            let pmt = Pmt::initialize(&cfg, wire)
                .await
                .with_context(|| format!("Failed to initialize PMT '{}'", cfg.id))?;
            Ok(Box::new(pmt) as Box<dyn PropertySurface>)
        })
    }
}
