//! Host surface, driver factories and the factory registry.
//!
//! Device kinds implement [`DriverFactory`] and are registered with a
//! [`DriverRegistry`] at startup. Building a device yields a boxed
//! [`PropertySurface`], the only view the host has of it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Composition Root (tiger CLI)             │
//! │  registry.register(PLogicFactory);                       │
//! │  registry.register(XyStageFactory);                      │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                      DriverRegistry                      │
//! │  factories: HashMap<driver_type, Arc<dyn DriverFactory>> │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │              DriverFactory::build(config, wire)          │
//! │  parses TOML, queries firmware, builds the registry      │
//! └──────────────────────────────────────────────────────────┘
//! ```

use crate::dispatch::Device;
use crate::error::TigerResult;
use crate::property::{PropertyDescriptor, PropertyValue};
use crate::wire::WireAdapter;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// Device Roles (Runtime Introspection)
// =============================================================================

/// What a device kind is for, listed by factories for documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// Motorized stage
    Stage,
    /// Programmable logic card
    LogicCard,
    /// Shutter built on a logic card
    Shutter,
    /// Photomultiplier detector
    Detector,
}

impl DeviceRole {
    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceRole::Stage => "Stage",
            DeviceRole::LogicCard => "Logic Card",
            DeviceRole::Shutter => "Shutter",
            DeviceRole::Detector => "Detector",
        }
    }
}

// =============================================================================
// Property Surface
// =============================================================================

/// Host-facing property interface of one device.
#[async_trait]
pub trait PropertySurface: Send {
    /// Device name.
    fn device_name(&self) -> &str;

    /// Every property the device exposes.
    fn descriptors(&self) -> Vec<PropertyDescriptor>;

    /// Read a property.
    async fn get_property(&mut self, name: &str) -> TigerResult<PropertyValue>;

    /// Write a property from host text, parsed per the descriptor kind.
    async fn set_property(&mut self, name: &str, text: &str) -> TigerResult<()>;
}

#[async_trait]
impl<E: Send + Sync + 'static> PropertySurface for Device<E> {
    fn device_name(&self) -> &str {
        self.name()
    }

    fn descriptors(&self) -> Vec<PropertyDescriptor> {
        Device::descriptors(self)
    }

    async fn get_property(&mut self, name: &str) -> TigerResult<PropertyValue> {
        self.get(name).await
    }

    async fn set_property(&mut self, name: &str, text: &str) -> TigerResult<()> {
        self.set_text(name, text).await
    }
}

// =============================================================================
// Driver Factory
// =============================================================================

/// Builds one kind of device from its TOML section.
pub trait DriverFactory: Send + Sync + 'static {
    /// Kind name used in the config `kind` field.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// Roles this kind fills.
    fn roles(&self) -> &'static [DeviceRole] {
        &[]
    }

    /// Validate configuration without touching hardware.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Query the card, build the capability registry and return the device.
    fn build(
        &self,
        config: toml::Value,
        wire: Arc<dyn WireAdapter>,
    ) -> BoxFuture<'static, Result<Box<dyn PropertySurface>>>;
}

/// Maps `kind` strings to factories.
#[derive(Default)]
pub struct DriverRegistry {
    factories: RwLock<HashMap<&'static str, Arc<dyn DriverFactory>>>,
}

impl DriverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under its `driver_type`, replacing any previous one.
    pub fn register(&self, factory: impl DriverFactory) {
        let factory: Arc<dyn DriverFactory> = Arc::new(factory);
        self.factories.write().insert(factory.driver_type(), factory);
    }

    /// Factory for `kind`.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn DriverFactory>> {
        self.factories.read().get(kind).cloned()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.factories.read().keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Validate `config` with the factory for `kind`.
    pub fn validate(&self, kind: &str, config: &toml::Value) -> Result<()> {
        self.get(kind)
            .ok_or_else(|| anyhow!("unknown device kind '{}'", kind))?
            .validate(config)
    }

    /// Validate and build a device of `kind`.
    pub async fn build(
        &self,
        kind: &str,
        config: toml::Value,
        wire: Arc<dyn WireAdapter>,
    ) -> Result<Box<dyn PropertySurface>> {
        let factory = self
            .get(kind)
            .ok_or_else(|| anyhow!("unknown device kind '{}'", kind))?;
        factory.validate(&config)?;
        factory.build(config, wire).await
    }
}
