//! # tiger-core
//!
//! Firmware-gated property dispatch for ASI Tiger device adapters.
//!
//! Every device exposes named, typed properties. Which properties (and which
//! enumeration values) exist depends on the card's firmware version, its
//! build defines and the device's configured mode; that decision is made once
//! by the [`capability::CapabilityRegistry`]. Each property is bound to a
//! [`dispatch::PropertyHandler`] that translates host reads and writes into
//! ASCII commands sent through a [`wire::WireAdapter`].
//!
//! ## Modules
//!
//! - [`capability`]: firmware versions, build info, gates and the registry
//! - [`property`]: descriptors, values, allowed-value sets
//! - [`state`]: cached values and refresh policy flags
//! - [`dispatch`]: the [`dispatch::Device`] dispatcher and handler trait
//! - [`binding`]: declarative query/command handlers
//! - [`wire`]: wire adapter trait and reply parsing
//! - [`serial`]: serial-line wire adapter
//! - [`driver`]: host surface, factories, registry
//! - [`error`]: error taxonomy
//! - [`limits`]: shared constants

pub mod binding;
pub mod capability;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod limits;
pub mod property;
pub mod serial;
pub mod state;
pub mod wire;

pub use capability::{BuildInfo, CapabilityContext, CapabilityRegistry, FirmwareVersion, Gate};
pub use dispatch::{Device, DeviceCapabilities, PropertyGroup, PropertyHandler, WriteOutcome};
pub use error::{ErrorKind, TigerError, TigerResult};
pub use property::{PropertyDescriptor, PropertyKind, PropertyValue};
pub use wire::{RawResponse, WireAdapter};
